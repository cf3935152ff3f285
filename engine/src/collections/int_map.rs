use dashmap::DashMap;

use crate::collections::SparseIntMap;

/// A [`SparseIntMap`] backed by a sharded concurrent hash map.
///
/// Cloning copies every entry; the copy and the original are independent afterwards.
#[derive(Debug, Clone)]
pub struct ConcurrentIntMap<V> {
    data: DashMap<u32, V>,
}

impl<V: Clone> ConcurrentIntMap<V> {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: DashMap::with_capacity(capacity),
        }
    }
}

impl<V: Clone> Default for ConcurrentIntMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> SparseIntMap<V> for ConcurrentIntMap<V> {
    fn put(&self, key: u32, value: V) -> Option<V> {
        self.data.insert(key, value)
    }

    fn get(&self, key: u32) -> Option<V> {
        self.data.get(&key).map(|value| value.clone())
    }

    fn contains(&self, key: u32) -> bool {
        self.data.contains_key(&key)
    }

    fn compute_if_absent<F>(&self, key: u32, f: F) -> V
    where
        F: FnOnce(u32) -> V,
    {
        if let Some(value) = self.data.get(&key) {
            return value.clone();
        }
        self.data.entry(key).or_insert_with(|| f(key)).clone()
    }

    fn remove(&self, key: u32) -> Option<V> {
        self.data.remove(&key).map(|(_, value)| value)
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn keys(&self) -> Vec<u32> {
        let mut keys: Vec<_> = self.data.iter().map(|entry| *entry.key()).collect();
        keys.sort_unstable();
        keys
    }

    fn values(&self) -> Vec<V> {
        let mut entries: Vec<_> = self
            .data
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_unstable_by_key(|(key, _)| *key);
        entries.into_iter().map(|(_, value)| value).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn put_returns_previous() {
        // Given
        let map = ConcurrentIntMap::new();
        assert!(map.is_empty());

        // When / Then
        assert_eq!(map.put(0, 0), None);
        assert_eq!(map.len(), 1);
        assert_eq!(map.put(1, 1), None);
        assert_eq!(map.put(1, 2), Some(1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn get_and_contains() {
        // Given
        let map = ConcurrentIntMap::new();
        map.put(0, 0);
        map.put(1, 1);

        // When
        map.put(1, 2);

        // Then
        assert_eq!(map.get(0), Some(0));
        assert_eq!(map.get(1), Some(2));
        assert_eq!(map.get(5), None);
        assert!(map.contains(1));
        assert!(!map.contains(5));
    }

    #[test]
    fn compute_if_absent_keeps_existing() {
        // Given
        let map = ConcurrentIntMap::new();

        // When
        let first = map.compute_if_absent(3, |k| k * 10);
        let second = map.compute_if_absent(3, |_| 99);

        // Then
        assert_eq!(first, 30);
        assert_eq!(second, 30);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_returns_value() {
        let map = ConcurrentIntMap::new();
        map.put(4, "four");

        assert_eq!(map.remove(4), Some("four"));
        assert_eq!(map.remove(4), None);
        assert!(map.is_empty());
    }

    #[test]
    fn clone_is_independent() {
        // Given
        let map = ConcurrentIntMap::new();
        map.put(0, 0);

        // When
        let cloned = map.clone();
        map.put(1, 1);

        // Then
        assert_eq!(cloned.get(0), Some(0));
        assert_eq!(cloned.get(1), None);
        assert_eq!(map.get(1), Some(1));
    }

    #[test]
    fn values_follow_key_order() {
        // Given
        let map = ConcurrentIntMap::new();
        for key in [7, 0, 3, 1] {
            map.put(key, key + 10);
        }

        // Then
        assert_eq!(map.keys(), vec![0, 1, 3, 7]);
        assert_eq!(map.values(), vec![10, 11, 13, 17]);
    }

    #[test]
    fn sorted_keys_hash_code_ignores_insertion_order() {
        // Given
        let map1 = ConcurrentIntMap::new();
        map1.put(1, 0);
        map1.put(2, 0);
        assert_eq!(map1.sorted_keys_hash_code(), 31 + 2);
        for key in 3..=5 {
            map1.put(key, 0);
        }

        // When
        let map2 = ConcurrentIntMap::new();
        for key in (1..=5).rev() {
            map2.put(key, 0);
        }

        // Then
        assert_eq!(map1.sorted_keys_hash_code(), map2.sorted_keys_hash_code());
    }

    #[test]
    fn concurrent_compute_if_absent_runs_once_per_key() {
        // Given
        let map = Arc::new(ConcurrentIntMap::with_capacity(1 << 12));

        // When
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for key in 0..(1 << 12) {
                        map.compute_if_absent(key, |_| t);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Then - one winner per key, and every thread sees it
        assert_eq!(map.len(), 1 << 12);
        let winner = map.get(17).unwrap();
        assert_eq!(map.compute_if_absent(17, |_| 100), winner);
    }
}
