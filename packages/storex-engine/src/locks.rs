//! Per-key lock table (spec §4.2): a bounded LRU of `tokio::sync::Mutex`es
//! keyed by `K`, with get-or-create under one internal guard lock. Eviction
//! never removes a lock currently held.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

/// Default maximum number of distinct locks retained (spec §4.2).
pub const DEFAULT_MAX_LOCKS: usize = 1000;

/// A bounded mapping from `K` to an independent async mutex.
pub struct LockTable<K> {
    inner: SyncMutex<LruCache<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Hash + Eq + Clone> LockTable<K> {
    /// Build a lock table holding at most `max_locks` distinct locks.
    #[must_use]
    pub fn new(max_locks: usize) -> Self {
        let cap = NonZeroUsize::new(max_locks.max(1)).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: SyncMutex::new(LruCache::new(cap)),
        }
    }

    /// Get-or-create the mutex for `key`, atomically.
    ///
    /// Eviction, when the table is at capacity and `key` is new, targets the
    /// least-recently-used entry whose `Arc` strong count is 1 (i.e. not
    /// currently held by any caller); if every entry is held, the table is
    /// allowed to temporarily exceed capacity rather than evict a held lock.
    pub fn for_key(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut guard = self.inner.lock();
        if let Some(existing) = guard.get(key) {
            return existing.clone();
        }
        if guard.len() >= guard.cap().get() {
            self.evict_one_idle(&mut guard);
        }
        let lock = Arc::new(AsyncMutex::new(()));
        guard.put(key.clone(), lock.clone());
        lock
    }

    fn evict_one_idle(&self, guard: &mut LruCache<K, Arc<AsyncMutex<()>>>) {
        // Scan from least-recently-used; `lru` iterates LRU-to-MRU in `iter()`... actually
        // most-recent-first, so walk in reverse to start from the coldest entry.
        let idle_key = guard
            .iter()
            .rev()
            .find(|(_, lock)| Arc::strong_count(lock) == 1)
            .map(|(k, _)| k.clone());
        if let Some(k) = idle_key {
            guard.pop(&k);
        }
        // If none are idle, leave the table over capacity momentarily: a held
        // lock is never evicted (spec invariant).
    }

    /// Remove every currently-idle entry (no outstanding `Arc` clone held by a
    /// caller), returning how many were dropped. Used by the background GC
    /// sweep; never touches a lock currently held.
    pub fn sweep_idle(&self) -> usize {
        let mut guard = self.inner.lock();
        let idle_keys: Vec<K> = guard
            .iter()
            .filter(|(_, lock)| Arc::strong_count(lock) == 1)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &idle_keys {
            guard.pop(k);
        }
        idle_keys.len()
    }

    /// Current number of distinct keys tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
