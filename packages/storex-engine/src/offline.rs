//! The offline mutation queue (spec §4.7): a durable, ordered log keyed by
//! `K`, drained in insertion order on reconnect. Failures retain their
//! position so a later drain retries from the same spot rather than
//! reordering around them.
//!
//! The durability itself is an external-collaborator concern (the same way
//! the on-disk database is out of scope per spec §1); this module provides
//! the in-memory reference shape consumers can back with a real log.

use std::collections::VecDeque;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use storex_core::{Instant, StorexError};

/// A replay thunk: rebuilds and re-awaits the dispatch for one queued
/// mutation. Implemented as a `Fn` rather than `FnOnce` so a failed replay
/// can be retried on the next drain without losing its place in the queue.
pub type ReplayFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), StorexError>> + Send + Sync>;

/// One mutation parked for later delivery.
pub struct QueuedMutation<K> {
    /// The request key this mutation targets.
    pub key: K,
    /// When this mutation was enqueued.
    pub enqueued_at: Instant,
    replay: ReplayFn,
}

impl<K> QueuedMutation<K> {
    /// Build a queued mutation from its key, enqueue time, and replay thunk.
    #[must_use]
    pub fn new(key: K, enqueued_at: Instant, replay: ReplayFn) -> Self {
        Self { key, enqueued_at, replay }
    }
}

/// An ordered, per-`K` log of mutations awaiting redelivery.
pub struct OfflineQueue<K> {
    entries: Mutex<VecDeque<QueuedMutation<K>>>,
}

impl<K> Default for OfflineQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> OfflineQueue<K> {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a mutation to the tail of the log.
    pub fn enqueue(&self, entry: QueuedMutation<K>) {
        self.entries.lock().push_back(entry);
    }

    /// Number of mutations currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue has no pending mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drain the queue in insertion order. Each entry's replay is awaited in
    /// turn; the first failure is pushed back to the front of the queue
    /// (retaining its position) and draining stops there, so the next drain
    /// resumes from the same failed entry rather than skipping ahead.
    pub async fn drain(&self) -> Vec<Result<(), StorexError>> {
        let mut results = Vec::new();
        loop {
            let next = self.entries.lock().pop_front();
            let Some(entry) = next else { break };
            let outcome = (entry.replay)().await;
            match outcome {
                Ok(()) => results.push(Ok(())),
                Err(cause) => {
                    results.push(Err(cause));
                    self.entries.lock().push_front(entry);
                    break;
                }
            }
        }
        results
    }
}
