//! Service lifecycle and wiring (SPEC_FULL §4.11): the top-level handle an
//! embedding application holds for the engine's shared, long-lived state.
//!
//! Mirrors the teacher's `NetworkModule` deferred-startup shape (`new()`
//! allocates, `start()`/`serve()` bring the service up, a shutdown signal
//! tears it down) and its `ShutdownController` watch-channel signalling, but
//! scoped to the engine's own long-lived collaborators rather than a network
//! listener: the per-key lock table, the bookkeeper, and the background GC
//! sweep.
//!
//! `Store`, `MutationEngine`, and `PageStore` each still build their own
//! private memory cache / lock table / single-flight registry sized from
//! [`crate::config::EngineConfig`] — that per-pipeline ownership is
//! unaffected by this type. `StorexRuntime` exists for collaborators that
//! want to share one lock table and bookkeeper instance across multiple
//! pipelines keyed on the same `K`, and for owning the one resource every
//! engine instance needs regardless of pipeline shape: the GC task.

use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use storex_core::ClockSource;

use crate::config::EngineConfig;
use crate::freshness::Bookkeeper;
use crate::gc;
use crate::locks::LockTable;
use crate::metrics::StoreMetrics;

/// A long-lived subsystem with an explicit start/stop lifecycle, so an
/// embedding application can bring every collaborator up and tear it down in
/// a known order instead of relying on `Drop`.
#[async_trait]
pub trait Managed: Send + Sync {
    /// Bring the subsystem up. Called once, before any traffic is routed to it.
    async fn init(&self) {}
    /// Tear the subsystem down, releasing any background tasks it owns.
    /// Called once, after traffic has stopped being routed to it.
    async fn shutdown(&self) {}
}

/// Owns the engine's shared, process-lifetime state for one key type `K`: the
/// per-key lock table, the freshness bookkeeper, and the background GC sweep
/// over both. Construct one per distinct `K` an application uses.
pub struct StorexRuntime<K> {
    config: EngineConfig,
    locks: Arc<LockTable<K>>,
    bookkeeper: Arc<Bookkeeper<K>>,
    clock: Arc<dyn ClockSource>,
    metrics: Arc<dyn StoreMetrics>,
    shutdown_tx: watch::Sender<bool>,
    gc_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<K> StorexRuntime<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    /// Allocate the shared state. Does not start the GC task; call
    /// [`Managed::init`] (or [`StorexRuntime::start`]) to do that.
    #[must_use]
    pub fn new(config: EngineConfig, clock: Arc<dyn ClockSource>, metrics: Arc<dyn StoreMetrics>) -> Self {
        let locks = Arc::new(LockTable::new(config.max_locks));
        let bookkeeper = Arc::new(Bookkeeper::new());
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            config,
            locks,
            bookkeeper,
            clock,
            metrics,
            shutdown_tx,
            gc_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// The shared lock table, for collaborators that want to coalesce
    /// concurrent access to the same key across multiple pipelines.
    #[must_use]
    pub fn locks(&self) -> Arc<LockTable<K>> {
        self.locks.clone()
    }

    /// The shared freshness bookkeeper.
    #[must_use]
    pub fn bookkeeper(&self) -> Arc<Bookkeeper<K>> {
        self.bookkeeper.clone()
    }

    /// Starts the background GC sweep, idempotently: a second call while one
    /// is already running is a no-op.
    pub async fn start(&self) {
        let mut guard = self.gc_handle.lock().await;
        if guard.is_some() {
            return;
        }
        info!(interval_ms = self.config.gc_interval.as_millis() as u64, "starting storex runtime gc task");
        let handle = gc::spawn(
            self.locks.clone(),
            self.bookkeeper.clone(),
            self.clock.clone(),
            self.metrics.clone(),
            self.config.gc_interval,
            self.config.gc_entry_ttl,
            self.shutdown_tx.subscribe(),
        );
        *guard = Some(handle);
    }

    /// Signals the GC task to stop and waits for it to finish.
    pub async fn stop(&self) {
        let handle = self.gc_handle.lock().await.take();
        let Some(handle) = handle else { return };
        let _ = self.shutdown_tx.send(true);
        let _ = handle.await;
    }
}

#[async_trait]
impl<K> Managed for StorexRuntime<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    async fn init(&self) {
        self.start().await;
    }

    async fn shutdown(&self) {
        self.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use storex_core::{FakeClock, Instant};

    fn runtime() -> StorexRuntime<u32> {
        StorexRuntime::new(EngineConfig::default(), Arc::new(FakeClock::new(Instant(0))), Arc::new(NoopMetrics))
    }

    #[test]
    fn locks_and_bookkeeper_are_shared_handles() {
        let rt = runtime();
        let a = rt.locks();
        let b = rt.locks();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_joins_the_task() {
        let rt = runtime();
        rt.start().await;
        rt.start().await; // second call is a no-op, not a second task.
        rt.stop().await;
        // stopping twice is safe.
        rt.stop().await;
    }

    #[tokio::test]
    async fn managed_init_and_shutdown_drive_the_gc_task() {
        let rt = runtime();
        Managed::init(&rt).await;
        Managed::shutdown(&rt).await;
    }
}
