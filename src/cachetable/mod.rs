// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The page cache (spec §5): a concurrent, write-back cache of
//! deserialized nodes keyed by `(file_id, blocknum)`, with pin-counted
//! RAII guards and capacity-triggered LRU eviction.
//!
//! Structured like a keyed file descriptor table: an `RwLock` over the
//! keyed table plus a separate `Mutex`-guarded LRU list, and a
//! `Drop`-releasing guard type standing in for a borrowed handle. The
//! difference is that a cachetable entry also needs write-back: a
//! dirty, unpinned page picked for eviction is serialized back out
//! through a [`PageStore`] before its slot is reused.

mod lru;

use crate::node::BlockNum;
use lru::LruList;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Identifies one open BRT file within a cachetable shared across
/// several open trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u64);

impl FileId {
    /// Wraps a raw id, typically derived from the file's inode or a
    /// monotonic counter kept by the opener.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

type PageKey = (FileId, BlockNum);

/// Loads and persists the pages a [`Cachetable`] holds in memory.
///
/// A miss calls [`PageStore::fetch`]; evicting a page that was
/// mutated since it was loaded calls [`PageStore::flush`] first.
pub trait PageStore<V>: Send + Sync {
    /// Reads a page from backing storage.
    fn fetch(&self, key: (FileId, BlockNum)) -> crate::Result<V>;

    /// Writes a page back to backing storage.
    fn flush(&self, key: (FileId, BlockNum), value: &V) -> crate::Result<()>;
}

struct CacheEntry<V> {
    data: Arc<RwLock<V>>,
    pin_count: Arc<AtomicUsize>,
    dirty: Arc<AtomicBool>,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            pin_count: Arc::clone(&self.pin_count),
            dirty: Arc::clone(&self.dirty),
        }
    }
}

/// A pin on one resident page. Dropping it releases the pin; the page
/// stays resident in the cache until evicted on some later capacity
/// check.
pub struct PinnedPage<V> {
    key: PageKey,
    data: Arc<RwLock<V>>,
    pin_count: Arc<AtomicUsize>,
    dirty: Arc<AtomicBool>,
}

impl<V> PinnedPage<V> {
    /// The key this page is cached under.
    #[must_use]
    pub fn key(&self) -> PageKey {
        self.key
    }

    /// Read access to the page.
    pub fn read(&self) -> RwLockReadGuard<'_, V> {
        self.data.read().expect("cache entry lock is poisoned")
    }

    /// Write access to the page; marks it dirty so a later eviction
    /// flushes it before the slot is reused.
    pub fn write(&self) -> RwLockWriteGuard<'_, V> {
        self.dirty.store(true, AtomicOrdering::Release);
        self.data.write().expect("cache entry lock is poisoned")
    }
}

impl<V> Drop for PinnedPage<V> {
    fn drop(&mut self) {
        self.pin_count.fetch_sub(1, AtomicOrdering::AcqRel);
    }
}

/// Running counters for cache effectiveness (spec §5, "cache metrics").
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheMetrics {
    /// Pages found already resident.
    pub hits: u64,
    /// Pages loaded via [`PageStore::fetch`].
    pub misses: u64,
    /// Pages written back via [`PageStore::flush`] on eviction.
    pub flushes: u64,
    /// Eviction scans that found nothing unpinned to evict.
    pub stalled_evictions: u64,
}

struct Inner<V> {
    table: std::collections::HashMap<PageKey, CacheEntry<V>, rustc_hash::FxBuildHasher>,
    lru: LruList<PageKey>,
    metrics: CacheMetrics,
}

/// A capacity-bounded, pin-counted cache of deserialized pages.
pub struct Cachetable<V> {
    inner: RwLock<Inner<V>>,
    capacity: usize,
    size: AtomicUsize,
    store: Arc<dyn PageStore<V> + Send + Sync>,
}

impl<V> Cachetable<V> {
    /// Creates a cache holding at most `capacity` resident pages
    /// before eviction kicks in.
    #[must_use]
    pub fn new(capacity: usize, store: Arc<dyn PageStore<V> + Send + Sync>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                table: std::collections::HashMap::with_hasher(rustc_hash::FxBuildHasher),
                lru: LruList::with_capacity(capacity),
                metrics: CacheMetrics::default(),
            }),
            capacity,
            size: AtomicUsize::new(0),
            store,
        }
    }

    /// Number of pages currently resident.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size.load(AtomicOrdering::Acquire)
    }

    /// `true` if nothing is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of the running cache metrics.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        self.inner.read().expect("lock is poisoned").metrics
    }

    /// Pins a page, fetching it through the store on a miss, and
    /// triggers an eviction pass if the cache is now over capacity.
    pub fn get_and_pin(&self, key: PageKey) -> crate::Result<PinnedPage<V>> {
        {
            let mut lock = self.inner.write().expect("lock is poisoned");
            if let Some(entry) = lock.table.get(&key).cloned() {
                entry.pin_count.fetch_add(1, AtomicOrdering::AcqRel);
                lock.lru.refresh(key);
                lock.metrics.hits += 1;
                return Ok(PinnedPage {
                    key,
                    data: entry.data,
                    pin_count: entry.pin_count,
                    dirty: entry.dirty,
                });
            }
        }

        let value = self.store.fetch(key)?;

        let mut lock = self.inner.write().expect("lock is poisoned");
        lock.metrics.misses += 1;
        let entry = CacheEntry {
            data: Arc::new(RwLock::new(value)),
            pin_count: Arc::new(AtomicUsize::new(1)),
            dirty: Arc::new(AtomicBool::new(false)),
        };
        lock.table.insert(key, entry.clone());
        lock.lru.refresh(key);
        self.size.fetch_add(1, AtomicOrdering::AcqRel);
        drop(lock);

        self.evict_if_over_capacity()?;

        Ok(PinnedPage {
            key,
            data: entry.data,
            pin_count: entry.pin_count,
            dirty: entry.dirty,
        })
    }

    /// Registers a freshly created value that has no prior backing
    /// store representation, pinning it immediately (spec §4.1,
    /// `put`).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AlreadyThere`] if `key` is already
    /// resident, leaving the existing entry untouched.
    pub fn put(&self, key: PageKey, value: V) -> crate::Result<PinnedPage<V>> {
        let mut lock = self.inner.write().expect("lock is poisoned");
        if lock.table.contains_key(&key) {
            return Err(crate::Error::AlreadyThere);
        }

        let entry = CacheEntry {
            data: Arc::new(RwLock::new(value)),
            pin_count: Arc::new(AtomicUsize::new(1)),
            dirty: Arc::new(AtomicBool::new(true)),
        };
        lock.table.insert(key, entry.clone());
        lock.lru.refresh(key);
        self.size.fetch_add(1, AtomicOrdering::AcqRel);
        drop(lock);

        self.evict_if_over_capacity()?;

        Ok(PinnedPage {
            key,
            data: entry.data,
            pin_count: entry.pin_count,
            dirty: entry.dirty,
        })
    }

    /// Pins `key` only if it is already resident, without touching
    /// the backing store on a miss (spec §4.1, `maybe_get_and_pin`) —
    /// used for the opportunistic direct-forward attempt in a
    /// nonleaf put.
    pub fn maybe_get_and_pin(&self, key: PageKey) -> Option<PinnedPage<V>> {
        let mut lock = self.inner.write().expect("lock is poisoned");
        let entry = lock.table.get(&key)?.clone();
        entry.pin_count.fetch_add(1, AtomicOrdering::AcqRel);
        lock.lru.refresh(key);
        lock.metrics.hits += 1;
        Some(PinnedPage {
            key,
            data: entry.data,
            pin_count: entry.pin_count,
            dirty: entry.dirty,
        })
    }

    /// Rekeys a resident, unpinned entry in place (spec §4.1,
    /// `rename`) — used when a node is spliced out of the tree and
    /// its blocknum is retired without a round trip through the
    /// backing store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadFormat`] if `old_key` isn't
    /// resident or `new_key` is already taken.
    ///
    /// # Panics
    ///
    /// Panics if the entry at `old_key` is still pinned.
    pub fn rename(&self, old_key: PageKey, new_key: PageKey) -> crate::Result<()> {
        let mut lock = self.inner.write().expect("lock is poisoned");
        if lock.table.contains_key(&new_key) {
            return Err(crate::Error::BadFormat("rename: destination key already resident"));
        }
        let Some(entry) = lock.table.remove(&old_key) else {
            return Err(crate::Error::BadFormat("rename: source key is not resident"));
        };
        assert_eq!(
            0,
            entry.pin_count.load(AtomicOrdering::Acquire),
            "rename: page is still pinned"
        );
        lock.lru.remove(&old_key);
        lock.table.insert(new_key, entry);
        lock.lru.refresh(new_key);
        Ok(())
    }

    /// Drops a page from the cache without flushing it, regardless of
    /// its dirty bit — used when a node is deleted or superseded
    /// (e.g. after a split writes out two replacement blocknums).
    ///
    /// # Panics
    ///
    /// Panics if the page is still pinned.
    pub fn discard(&self, key: PageKey) {
        let mut lock = self.inner.write().expect("lock is poisoned");
        if let Some(entry) = lock.table.remove(&key) {
            assert_eq!(
                0,
                entry.pin_count.load(AtomicOrdering::Acquire),
                "discard: page is still pinned"
            );
            lock.lru.remove(&key);
            self.size.fetch_sub(1, AtomicOrdering::AcqRel);
        }
    }

    /// Flushes and evicts unpinned pages, least-recently-used first,
    /// until the cache is back at or under capacity.
    fn evict_if_over_capacity(&self) -> crate::Result<()> {
        while self.size.load(AtomicOrdering::Acquire) > self.capacity {
            let victim = {
                let lock = self.inner.read().expect("lock is poisoned");
                lock.lru
                    .iter_oldest_first()
                    .find(|key| {
                        lock.table
                            .get(key)
                            .is_some_and(|e| e.pin_count.load(AtomicOrdering::Acquire) == 0)
                    })
                    .copied()
            };

            let Some(victim) = victim else {
                log::trace!("eviction pass found nothing unpinned to reclaim, cache left over capacity");
                let mut lock = self.inner.write().expect("lock is poisoned");
                lock.metrics.stalled_evictions += 1;
                break;
            };

            log::trace!("evicting page {victim:?}");
            self.flush_and_remove(victim)?;
        }
        Ok(())
    }

    fn flush_and_remove(&self, key: PageKey) -> crate::Result<()> {
        let entry = {
            let lock = self.inner.read().expect("lock is poisoned");
            lock.table.get(&key).cloned()
        };
        let Some(entry) = entry else { return Ok(()) };

        if entry.dirty.load(AtomicOrdering::Acquire) {
            log::debug!("flushing dirty page {key:?} before eviction");
            let value = entry.data.read().expect("cache entry lock is poisoned");
            self.store.flush(key, &value)?;
            drop(value);
            let mut lock = self.inner.write().expect("lock is poisoned");
            lock.metrics.flushes += 1;
        }

        let mut lock = self.inner.write().expect("lock is poisoned");
        lock.table.remove(&key);
        lock.lru.remove(&key);
        self.size.fetch_sub(1, AtomicOrdering::AcqRel);
        Ok(())
    }

    /// Flushes every resident dirty page without evicting it
    /// (checkpoint support).
    pub fn flush_all(&self) -> crate::Result<()> {
        let keys: Vec<PageKey> = {
            let lock = self.inner.read().expect("lock is poisoned");
            lock.table.keys().copied().collect()
        };

        for key in keys {
            let entry = {
                let lock = self.inner.read().expect("lock is poisoned");
                lock.table.get(&key).cloned()
            };
            let Some(entry) = entry else { continue };
            if entry.dirty.swap(false, AtomicOrdering::AcqRel) {
                let value = entry.data.read().expect("cache entry lock is poisoned");
                self.store.flush(key, &value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BlockNum;
    use std::sync::Mutex as StdMutex;

    struct RecordingStore {
        flushed: StdMutex<Vec<PageKey>>,
    }

    impl PageStore<u64> for RecordingStore {
        fn fetch(&self, key: PageKey) -> crate::Result<u64> {
            Ok(key.1.as_u64())
        }

        fn flush(&self, key: PageKey, value: &u64) -> crate::Result<()> {
            self.flushed.lock().expect("lock is poisoned").push(key);
            assert_eq!(key.1.as_u64(), *value);
            Ok(())
        }
    }

    fn key(block: u64) -> PageKey {
        (FileId::new(0), BlockNum::new(block))
    }

    #[test]
    fn miss_then_hit_updates_metrics() {
        let store = Arc::new(RecordingStore {
            flushed: StdMutex::new(Vec::new()),
        });
        let cache = Cachetable::new(10, store);

        {
            let page = cache.get_and_pin(key(1)).unwrap();
            assert_eq!(1, *page.read());
        }
        assert_eq!(1, cache.metrics().misses);

        {
            let _page = cache.get_and_pin(key(1)).unwrap();
        }
        assert_eq!(1, cache.metrics().hits);
        assert_eq!(1, cache.len());
    }

    #[test]
    fn eviction_flushes_dirty_unpinned_pages_first() {
        let store = Arc::new(RecordingStore {
            flushed: StdMutex::new(Vec::new()),
        });
        let cache = Cachetable::new(2, Arc::clone(&store));

        {
            let page = cache.get_and_pin(key(1)).unwrap();
            *page.write() = 100;
        }
        {
            let _ = cache.get_and_pin(key(2)).unwrap();
        }
        assert_eq!(2, cache.len());

        // A third page forces eviction of the least-recently-used one (key 1).
        {
            let _ = cache.get_and_pin(key(3)).unwrap();
        }
        assert_eq!(2, cache.len());
        assert_eq!(vec![key(1)], *store.flushed.lock().expect("lock is poisoned"));
        assert_eq!(1, cache.metrics().flushes);
    }

    #[test]
    fn put_registers_a_fresh_value_pinned_and_dirty() {
        let store = Arc::new(RecordingStore {
            flushed: StdMutex::new(Vec::new()),
        });
        let cache = Cachetable::new(10, store);

        {
            let page = cache.put(key(42), 999).unwrap();
            assert_eq!(999, *page.read());
        }
        assert_eq!(1, cache.len());
        assert_eq!(0, cache.metrics().misses, "put never goes through fetch");
    }

    #[test]
    fn put_rejects_a_key_already_resident() {
        let store = Arc::new(RecordingStore {
            flushed: StdMutex::new(Vec::new()),
        });
        let cache = Cachetable::new(10, store);

        let _first = cache.put(key(1), 1).unwrap();
        assert!(matches!(cache.put(key(1), 2), Err(crate::Error::AlreadyThere)));
    }

    #[test]
    fn maybe_get_and_pin_only_succeeds_when_resident() {
        let store = Arc::new(RecordingStore {
            flushed: StdMutex::new(Vec::new()),
        });
        let cache = Cachetable::new(10, Arc::clone(&store));

        assert!(cache.maybe_get_and_pin(key(7)).is_none());

        let _pin = cache.get_and_pin(key(7)).unwrap();
        assert!(cache.maybe_get_and_pin(key(7)).is_some());
    }

    #[test]
    fn rename_moves_an_unpinned_entry_to_a_new_key() {
        let store = Arc::new(RecordingStore {
            flushed: StdMutex::new(Vec::new()),
        });
        let cache = Cachetable::new(10, store);

        {
            let _pin = cache.get_and_pin(key(1)).unwrap();
        }
        cache.rename(key(1), key(2)).unwrap();

        assert!(cache.maybe_get_and_pin(key(1)).is_none());
        let renamed = cache.get_and_pin(key(2)).unwrap();
        assert_eq!(1, *renamed.read());
    }

    #[test]
    fn pinned_pages_are_never_evicted() {
        let store = Arc::new(RecordingStore {
            flushed: StdMutex::new(Vec::new()),
        });
        let cache = Cachetable::new(1, Arc::clone(&store));

        let pinned = cache.get_and_pin(key(1)).unwrap();
        let _second = cache.get_and_pin(key(2)).unwrap();

        assert_eq!(2, cache.len());
        assert_eq!(1, cache.metrics().stalled_evictions);
        drop(pinned);
    }
}
