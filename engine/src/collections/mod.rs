//! Sparse integer keyed maps.

mod int_map;

pub use int_map::ConcurrentIntMap;

use crate::index::canonical_hash;

/// A map keyed by small non-negative integers, usually class index codes.
///
/// All methods take `&self`; implementations are safe to share between threads.
pub trait SparseIntMap<V> {
    /// Insert a value, returning the one it replaced.
    fn put(&self, key: u32, value: V) -> Option<V>;

    fn get(&self, key: u32) -> Option<V>;

    fn contains(&self, key: u32) -> bool;

    /// Get the value for `key`, inserting the result of `f` first if there is none.
    /// `f` runs at most once per key, even when called concurrently.
    fn compute_if_absent<F>(&self, key: u32, f: F) -> V
    where
        F: FnOnce(u32) -> V;

    fn remove(&self, key: u32) -> Option<V>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys in ascending order.
    fn keys(&self) -> Vec<u32>;

    /// All values in ascending key order.
    fn values(&self) -> Vec<V>;

    /// The canonical hash of the key set, see [`canonical_hash`].
    ///
    /// A map keyed by the class index codes of a type set hashes the same as
    /// [`ClassIndex::long_hash_code`](crate::index::ClassIndex::long_hash_code) of that
    /// set.
    fn sorted_keys_hash_code(&self) -> u64 {
        canonical_hash(self.keys())
    }
}
