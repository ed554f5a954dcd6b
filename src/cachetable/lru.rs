// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::collections::VecDeque;

/// Tracks recency order for a set of keys without owning their data.
#[derive(Debug, Default)]
pub(super) struct LruList<T: Clone + Eq>(VecDeque<T>);

impl<T: Clone + Eq> LruList<T> {
    pub(super) fn with_capacity(n: usize) -> Self {
        Self(VecDeque::with_capacity(n))
    }

    pub(super) fn remove(&mut self, item: &T) {
        self.0.retain(|x| x != item);
    }

    /// Marks `item` as the most recently used.
    pub(super) fn refresh(&mut self, item: T) {
        self.remove(&item);
        self.0.push_back(item);
    }

    /// Returns the least recently used item without removing it from
    /// the list; the caller decides whether it can actually be evicted
    /// (e.g. it may still be pinned) and calls [`Self::remove`] itself.
    pub(super) fn peek_least_recently_used(&self) -> Option<&T> {
        self.0.front()
    }

    pub(super) fn iter_oldest_first(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_moves_item_to_most_recent() {
        let mut lru = LruList::with_capacity(4);
        lru.refresh(1);
        lru.refresh(2);
        lru.refresh(3);
        assert_eq!(Some(&1), lru.peek_least_recently_used());

        lru.refresh(1);
        assert_eq!(Some(&2), lru.peek_least_recently_used());
    }
}
