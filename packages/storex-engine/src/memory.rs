//! Bounded in-memory cache (spec §4.1): strict LRU, O(1) operations, never
//! suspends on anything but its own short mutex.

use std::hash::Hash;

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use storex_core::Instant;

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// A bounded, strictly-LRU memory cache from `K` to `V`.
///
/// All operations are mutually exclusive under one internal mutex; none may
/// suspend beyond trivial map manipulation (spec §4.1, §5).
pub struct MemoryCache<K, V> {
    inner: Mutex<LruCache<K, Entry<V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> MemoryCache<K, V> {
    /// Build a cache holding at most `max_size` entries (minimum 1).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let cap = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Fetch `key`, marking it most-recently-used.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        guard.get(key).map(|e| e.value.clone())
    }

    /// Fetch `key` along with when it was stored, without updating recency
    /// (used by the validator to compute freshness without disturbing LRU order).
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<(V, Instant)> {
        let guard = self.inner.lock();
        guard.peek(key).map(|e| (e.value.clone(), e.stored_at))
    }

    /// Insert or update `key`. Returns `true` if this grew the cache (new
    /// key), `false` if it updated an existing entry.
    pub fn put(&self, key: K, value: V, stored_at: Instant) -> bool {
        let mut guard = self.inner.lock();
        let is_new = guard.peek(&key).is_none();
        guard.put(key, Entry { value, stored_at });
        is_new
    }

    /// Remove `key`, if present.
    pub fn invalidate(&self, key: &K) {
        let mut guard = self.inner.lock();
        guard.pop(key);
    }

    /// Remove every entry.
    pub fn invalidate_all(&self) {
        let mut guard = self.inner.lock();
        guard.clear();
    }

    /// Remove every entry whose key satisfies `predicate` (used for
    /// namespace-scoped invalidation, where the predicate checks the key's
    /// namespace).
    pub fn invalidate_matching(&self, predicate: impl Fn(&K) -> bool) {
        let mut guard = self.inner.lock();
        let victims: Vec<K> = guard.iter().map(|(k, _)| k.clone()).filter(|k| predicate(k)).collect();
        for k in victims {
            guard.pop(&k);
        }
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_reports_new_vs_update() {
        let cache = MemoryCache::<u32, &str>::new(2);
        assert!(cache.put(1, "a", Instant::ZERO));
        assert!(!cache.put(1, "a2", Instant::ZERO));
    }

    #[test]
    fn never_exceeds_max_size() {
        let cache = MemoryCache::<u32, u32>::new(2);
        cache.put(1, 1, Instant::ZERO);
        cache.put(2, 2, Instant::ZERO);
        cache.put(3, 3, Instant::ZERO);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn eviction_is_strict_lru() {
        let cache = MemoryCache::<u32, u32>::new(2);
        cache.put(1, 1, Instant::ZERO);
        cache.put(2, 2, Instant::ZERO);
        // touch 1 so 2 becomes least-recently-used
        assert_eq!(cache.get(&1), Some(1));
        cache.put(3, 3, Instant::ZERO);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(1));
        assert_eq!(cache.get(&3), Some(3));
    }

    #[test]
    fn empty_cache_get_never_panics() {
        let cache = MemoryCache::<u32, u32>::new(4);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn invalidate_matching_scopes_by_predicate() {
        let cache = MemoryCache::<(u32, u32), u32>::new(8);
        cache.put((1, 1), 1, Instant::ZERO);
        cache.put((1, 2), 2, Instant::ZERO);
        cache.put((2, 1), 3, Instant::ZERO);
        cache.invalidate_matching(|(ns, _)| *ns == 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&(2, 1)), Some(3));
    }
}
