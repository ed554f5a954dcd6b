// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A small keyed table (grounded on `original_source/newbrt/hashtable.c`)
//! used by [`crate::cachetable::Cachetable`] to index resident pages by
//! `(file_id, blocknum)`.
//!
//! The original is a chaining hashtable built by hand; this crate
//! reuses [`rustc_hash::FxHashMap`], the same fast non-cryptographic
//! hasher the rest of the core already depends on, rather than
//! reimplementing chaining.

use rustc_hash::FxHashMap;
use std::hash::Hash;

/// A thin, hash-keyed table with a sampling lookup for eviction scans.
#[derive(Debug, Default)]
pub struct HashTable<K, V> {
    map: FxHashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> HashTable<K, V> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts or replaces an entry, returning the prior value if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.map.insert(key, value)
    }

    /// Borrows the value for a key.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Mutably borrows the value for a key.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.map.get_mut(key)
    }

    /// `true` if the key is present.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Removes an entry, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Iterates entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    /// Picks an entry by an externally supplied ordinal, wrapped to
    /// the table's current size (`toku_hashtable_random_pick`; the
    /// original drew this index from its own RNG, this crate leaves
    /// the source of randomness to the caller — the cachetable's
    /// eviction scan supplies a rolling counter).
    #[must_use]
    pub fn pick_at(&self, ordinal: usize) -> Option<(&K, &V)> {
        if self.map.is_empty() {
            return None;
        }
        self.map.iter().nth(ordinal % self.map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut table = HashTable::new();
        assert_eq!(None, table.insert(1, "a"));
        assert_eq!(Some(&"a"), table.get(&1));
        assert_eq!(Some("a"), table.remove(&1));
        assert_eq!(None, table.get(&1));
    }

    #[test]
    fn pick_at_wraps_to_table_size() {
        let mut table = HashTable::new();
        table.insert(1, "a");
        table.insert(2, "b");
        assert!(table.pick_at(0).is_some());
        assert!(table.pick_at(5).is_some());
        assert_eq!(None, HashTable::<i32, &str>::new().pick_at(0));
    }
}
