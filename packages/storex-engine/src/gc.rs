//! Background garbage collection (SPEC_FULL supplement): a periodic sweep
//! that drops idle lock-table entries and bookkeeper metadata past its TTL,
//! so long-lived processes don't accumulate unbounded per-key state for keys
//! nobody reads anymore.
//!
//! Mirrors the teacher's `BackgroundWorker`/interval-driven task shape: a
//! plain `tokio::spawn`ed loop, woken by `tokio::time::interval`, that exits
//! as soon as its shutdown signal fires.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, Instrument};

use storex_core::ClockSource;

use crate::freshness::Bookkeeper;
use crate::locks::LockTable;
use crate::metrics::StoreMetrics;

/// Spawn the periodic sweep. The returned handle completes once `shutdown`
/// observes `true`; drop the sender or send `true` to stop the loop.
pub fn spawn<K>(
    locks: Arc<LockTable<K>>,
    bookkeeper: Arc<Bookkeeper<K>>,
    clock: Arc<dyn ClockSource>,
    metrics: Arc<dyn StoreMetrics>,
    interval: Duration,
    entry_ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately; consume it so the first real
            // sweep happens one interval after startup, not at t=0.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_once(&locks, &bookkeeper, clock.as_ref(), metrics.as_ref(), entry_ttl);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("gc task shutting down");
                            return;
                        }
                    }
                }
            }
        }
        .instrument(debug_span!("storex_gc")),
    )
}

fn sweep_once<K>(
    locks: &LockTable<K>,
    bookkeeper: &Bookkeeper<K>,
    clock: &dyn ClockSource,
    metrics: &dyn StoreMetrics,
    entry_ttl: Duration,
) where
    K: Hash + Eq + Clone,
{
    let now = clock.now();
    let cutoff = storex_core::Instant(now.0.saturating_sub(entry_ttl.as_millis() as u64));
    let locks_dropped = locks.sweep_idle();
    let bookkeeper_dropped = bookkeeper.sweep_older_than(cutoff);
    debug!(locks_dropped, bookkeeper_dropped, "gc sweep complete");
    metrics.record_gc_sweep(locks_dropped, bookkeeper_dropped);
}
