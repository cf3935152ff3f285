//! Identity keyed type codes.
//!
//! [`ClassIndex`] assigns every key (by default a [`TypeId`]) a small integer code,
//! starting at 1 and increasing by one per new key. Code 0 means "absent".
//!
//! # Design
//!
//! Lookups normally go through a fixed-size raw table addressed by the top bits of the
//! key's hash. Each table slot holds a code, and a code-to-key side table confirms that
//! the hit belongs to the probed key. Every code is also written to an exact fallback
//! map. The first time two keys land in the same raw slot, the index flips to the
//! fallback map for good; since the map already holds every earlier code, nothing has
//! to be migrated.
//!
//! The flip is a one-way atomic flag. Racing collisions all set the same flag and the
//! map entry lock serialises code assignment per key, so no code is lost or assigned
//! twice.
//!
//! # Performance Considerations
//!
//! - A raw lookup is one hash, one shift and two reads under a sharded read lock. The
//!   fallback map costs a full `DashMap` lookup.
//! - The raw table holds `2^hash_bits` codes up front. The default of 20 bits is 4 MiB.
//! - [`ClassIndex::long_hash_code`] resolves every key and checks duplicates with a
//!   bitset sized to the largest code.

mod sort;

pub use sort::{ComponentIndex, TypeKey};

use std::{
    any::TypeId,
    fmt,
    hash::{BuildHasher, BuildHasherDefault, DefaultHasher, Hash},
    sync::{
        PoisonError,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use crossbeam::sync::ShardedLock;
use dashmap::{DashMap, Entry};
use fixedbitset::FixedBitSet;
use log::{debug, warn};

use crate::error::{ConfigError, IndexError};

/// Fold codes in ascending order into the canonical set hash.
///
/// `hash = hash * 31 + code`, starting from 0. Callers pass the codes sorted.
pub fn canonical_hash(sorted_codes: impl IntoIterator<Item = u32>) -> u64 {
    sorted_codes
        .into_iter()
        .fold(0u64, |hash, code| hash.wrapping_mul(31).wrapping_add(u64::from(code)))
}

/// Raw table state guarded by one lock.
struct RawTable<K> {
    /// Codes addressed by capped hash. 0 is an empty slot.
    slots: Box<[u32]>,
    /// Keys addressed by code, for verifying raw hits.
    keys: Vec<Option<K>>,
}

impl<K: Clone> RawTable<K> {
    fn new(hash_bits: u32) -> Self {
        Self {
            slots: vec![0; 1 << hash_bits].into_boxed_slice(),
            keys: Vec::new(),
        }
    }

    fn record(&mut self, slot: usize, code: u32, key: K) {
        self.slots[slot] = code;
        let code = code as usize;
        if self.keys.len() <= code {
            self.keys.resize(code + 1, None);
        }
        self.keys[code] = Some(key);
    }
}

/// Assigns stable integer codes to keys. See the [module docs](self).
pub struct ClassIndex<K = TypeId> {
    hash_bits: u32,
    raw: ShardedLock<RawTable<K>>,
    fallback: DashMap<K, u32>,
    use_fallback: AtomicBool,
    counter: AtomicU32,
    closed: AtomicBool,
}

impl<K> ClassIndex<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    /// Smallest supported raw table bit width.
    pub const MIN_HASH_BITS: u32 = 2;

    /// Largest supported raw table bit width.
    pub const MAX_HASH_BITS: u32 = 24;

    /// Raw table bit width used when nothing else is configured.
    pub const DEFAULT_HASH_BITS: u32 = 20;

    /// Construct an index whose raw table has `2^hash_bits` slots.
    pub fn new(hash_bits: u32) -> Result<Self, ConfigError> {
        if !(Self::MIN_HASH_BITS..=Self::MAX_HASH_BITS).contains(&hash_bits) {
            return Err(ConfigError::HashBitOutOfRange {
                bits: hash_bits,
                min: Self::MIN_HASH_BITS,
                max: Self::MAX_HASH_BITS,
            });
        }
        debug!("class index raw table with {} slots", 1u32 << hash_bits);
        Ok(Self {
            hash_bits,
            raw: ShardedLock::new(RawTable::new(hash_bits)),
            fallback: DashMap::new(),
            use_fallback: AtomicBool::new(false),
            counter: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// The configured raw table bit width.
    #[inline]
    pub fn hash_bits(&self) -> u32 {
        self.hash_bits
    }

    #[inline]
    fn slot_of(&self, key: &K) -> usize {
        let hash = BuildHasherDefault::<DefaultHasher>::default().hash_one(key);
        (hash >> (u64::BITS - self.hash_bits)) as usize
    }

    #[inline]
    fn next_code(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    fn ensure_open(&self) -> Result<(), IndexError> {
        if self.is_closed() {
            Err(IndexError::Closed)
        } else {
            Ok(())
        }
    }

    /// Assign a code to a key. A key that already has one keeps it.
    pub fn add(&self, key: K) -> Result<u32, IndexError> {
        self.ensure_open()?;
        if self.is_using_fallback() {
            return Ok(*self.fallback.entry(key).or_insert_with(|| self.next_code()));
        }

        let slot = self.slot_of(&key);
        match self.fallback.entry(key) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let mut raw = self.raw.write().unwrap_or_else(PoisonError::into_inner);
                if self.is_closed() {
                    return Err(IndexError::Closed);
                }
                let code = self.next_code();
                if raw.slots[slot] == 0 {
                    raw.record(slot, code, entry.key().clone());
                } else {
                    self.flip(slot);
                }
                drop(raw);
                entry.insert(code);
                Ok(code)
            }
        }
    }

    fn flip(&self, slot: usize) {
        if !self.use_fallback.swap(true, Ordering::AcqRel) {
            warn!(
                "class index collision at raw slot {} with {} codes assigned, using exact map from now on",
                slot,
                self.len()
            );
        }
    }

    /// The code of a key, or 0 if it has none.
    pub fn get_index(&self, key: &K) -> u32 {
        if !self.is_using_fallback() {
            let slot = self.slot_of(key);
            // The raw guard must be released before touching the map.
            let hit = {
                let raw = self.raw.read().unwrap_or_else(PoisonError::into_inner);
                match raw.slots.get(slot) {
                    Some(&0) | None => return 0,
                    Some(&code) => raw
                        .keys
                        .get(code as usize)
                        .and_then(Option::as_ref)
                        .is_some_and(|k| k == key)
                        .then_some(code),
                }
            };
            if let Some(code) = hit {
                return code;
            }
        }
        self.fallback.get(key).map_or(0, |code| *code)
    }

    /// The code of a key, assigning one if it has none.
    pub fn get_index_or_add(&self, key: &K) -> Result<u32, IndexError> {
        match self.get_index(key) {
            0 => self.add(key.clone()),
            code => Ok(code),
        }
    }

    /// [`get_index_or_add`](Self::get_index_or_add) for every key, in order.
    pub fn get_index_or_add_batch(&self, keys: &[K]) -> Result<Vec<u32>, IndexError> {
        keys.iter().map(|key| self.get_index_or_add(key)).collect()
    }

    /// Order independent hash of a set of distinct keys.
    ///
    /// Every key is resolved (and added if needed) to its code, and the codes are
    /// folded in ascending order with [`canonical_hash`]. The same set in any order
    /// produces the same hash. A key given twice is an error.
    pub fn long_hash_code(&self, keys: &[K]) -> Result<u64, IndexError> {
        let codes = self.get_index_or_add_batch(keys)?;
        let max = codes.iter().copied().max().unwrap_or(0);
        let mut seen = FixedBitSet::with_capacity(max as usize + 1);
        for code in codes {
            if seen.put(code as usize) {
                return Err(IndexError::DuplicateType { code });
            }
        }
        Ok(canonical_hash(seen.ones().map(|code| code as u32)))
    }

    /// Number of codes assigned.
    #[inline]
    pub fn len(&self) -> usize {
        self.counter.load(Ordering::Relaxed) as usize
    }

    /// Check if no code has been assigned.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abandon the raw table and use the exact map from now on.
    pub fn use_fallback_map(&self) {
        self.use_fallback.store(true, Ordering::Release);
    }

    /// Check if lookups go through the fallback map.
    #[inline]
    pub fn is_using_fallback(&self) -> bool {
        self.use_fallback.load(Ordering::Acquire)
    }

    /// Check if the index has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the raw table and forget every code. Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut raw = self.raw.write().unwrap_or_else(PoisonError::into_inner);
        raw.slots = Box::default();
        raw.keys = Vec::new();
        drop(raw);
        self.fallback.clear();
        debug!("class index closed");
    }
}

impl ClassIndex<TypeId> {
    /// Assign a code to `T`.
    pub fn add_type<T: ?Sized + 'static>(&self) -> Result<u32, IndexError> {
        self.add(TypeId::of::<T>())
    }

    /// The code of `T`, or 0 if it has none.
    pub fn type_index<T: ?Sized + 'static>(&self) -> u32 {
        self.get_index(&TypeId::of::<T>())
    }

    /// The code of `T`, assigning one if it has none.
    pub fn type_index_or_add<T: ?Sized + 'static>(&self) -> Result<u32, IndexError> {
        self.get_index_or_add(&TypeId::of::<T>())
    }
}

impl<K> Default for ClassIndex<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn default() -> Self {
        Self {
            hash_bits: Self::DEFAULT_HASH_BITS,
            raw: ShardedLock::new(RawTable::new(Self::DEFAULT_HASH_BITS)),
            fallback: DashMap::new(),
            use_fallback: AtomicBool::new(false),
            counter: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }
}

impl<K> fmt::Debug for ClassIndex<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassIndex")
            .field("hash_bits", &self.hash_bits)
            .field("codes", &self.counter.load(Ordering::Relaxed))
            .field("use_fallback", &self.use_fallback.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
