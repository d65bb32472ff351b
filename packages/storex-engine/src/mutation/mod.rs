//! Mutation engine (spec §4.7): optimistic apply, remote dispatch, echo
//! reconciliation, rollback, provisional-key rekeying, and offline queueing.

pub mod policy;

use std::hash::Hash;
use std::sync::Arc;

use futures_util::StreamExt;

use storex_core::contracts::{MutationAdapter, Persistence, Precondition, RemoteMutator, RemoteOutcome};
use storex_core::{ClockSource, StorexError};

use crate::freshness::Bookkeeper;
use crate::locks::LockTable;
use crate::memory::MemoryCache;
use crate::metrics::{Outcome, StoreMetrics};
use crate::offline::{OfflineQueue, QueuedMutation};

pub use policy::{
    CreatePolicy, CreateResult, DeletePolicy, DeleteResult, MutationOutcome, MutationPolicy, ReplacePolicy,
    ReplaceResult, UpdatePolicy, UpdateResult, UpsertPolicy, UpsertResult,
};

/// An error is treated as a connectivity failure (enqueue-eligible) unless it
/// is one of these semantic rejections, which are always rolled back
/// immediately regardless of `require_online` — retrying them unchanged would
/// just fail again.
fn is_always_terminal(cause: &StorexError) -> bool {
    matches!(cause, StorexError::PreconditionFailed | StorexError::Conflict)
}

/// Bound a remote dispatch by the operation's policy timeout, exactly as
/// `TimeoutService` bounds a request in the teacher's middleware stack: an
/// elapsed deadline surfaces as `StorexError::Timeout` through the same
/// `RemoteOutcome::Error` path every other dispatch failure takes.
async fn with_timeout<T>(
    timeout: std::time::Duration,
    fut: impl std::future::Future<Output = RemoteOutcome<T>>,
) -> RemoteOutcome<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(outcome) => outcome,
        Err(_elapsed) => RemoteOutcome::Error { cause: StorexError::Timeout },
    }
}

/// The write-path coordinator: `update`/`create`/`delete`/`upsert`/`replace`
/// over a consumer-supplied persistence layer, remote mutator, and adapter.
pub struct MutationEngine<K, Patch, Draft, Echo, ReadDb, WriteDb, V> {
    locks: Arc<LockTable<K>>,
    memory: Arc<MemoryCache<K, V>>,
    bookkeeper: Arc<Bookkeeper<K>>,
    persistence: Arc<dyn Persistence<K, ReadDb, WriteDb>>,
    remote: Arc<dyn RemoteMutator<K, Patch, Draft, Echo>>,
    adapter: Arc<dyn MutationAdapter<K, Patch, Draft, Echo, ReadDb, WriteDb, V>>,
    offline: Arc<OfflineQueue<K>>,
    provisional_key_factory: Arc<dyn Fn() -> K + Send + Sync>,
    clock: Arc<dyn ClockSource>,
    metrics: Arc<dyn StoreMetrics>,
}

impl<K, Patch, Draft, Echo, ReadDb, WriteDb, V> Clone for MutationEngine<K, Patch, Draft, Echo, ReadDb, WriteDb, V> {
    fn clone(&self) -> Self {
        Self {
            locks: self.locks.clone(),
            memory: self.memory.clone(),
            bookkeeper: self.bookkeeper.clone(),
            persistence: self.persistence.clone(),
            remote: self.remote.clone(),
            adapter: self.adapter.clone(),
            offline: self.offline.clone(),
            provisional_key_factory: self.provisional_key_factory.clone(),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<K, Patch, Draft, Echo, ReadDb, WriteDb, V> MutationEngine<K, Patch, Draft, Echo, ReadDb, WriteDb, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    Patch: Clone + Send + Sync + 'static,
    Draft: Clone + Send + Sync + 'static,
    Echo: Clone + Send + Sync + 'static,
    ReadDb: Send + Sync + Clone + 'static,
    WriteDb: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Wire a mutation engine over its collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        locks: Arc<LockTable<K>>,
        memory: Arc<MemoryCache<K, V>>,
        bookkeeper: Arc<Bookkeeper<K>>,
        persistence: Arc<dyn Persistence<K, ReadDb, WriteDb>>,
        remote: Arc<dyn RemoteMutator<K, Patch, Draft, Echo>>,
        adapter: Arc<dyn MutationAdapter<K, Patch, Draft, Echo, ReadDb, WriteDb, V>>,
        offline: Arc<OfflineQueue<K>>,
        provisional_key_factory: Arc<dyn Fn() -> K + Send + Sync>,
        clock: Arc<dyn ClockSource>,
        metrics: Arc<dyn StoreMetrics>,
    ) -> Self {
        Self {
            locks,
            memory,
            bookkeeper,
            persistence,
            remote,
            adapter,
            offline,
            provisional_key_factory,
            clock,
            metrics,
        }
    }

    /// Drain every mutation waiting in the offline queue, in insertion order.
    pub async fn drain_offline_queue(&self) -> Vec<Result<(), StorexError>> {
        self.offline.drain().await
    }

    /// Current offline-queue depth.
    #[must_use]
    pub fn offline_queue_len(&self) -> usize {
        self.offline.len()
    }

    async fn read_current_domain(&self, key: &K) -> Result<Option<V>, StorexError> {
        let mut reader = self.persistence.reader(key).await;
        match reader.next().await {
            Some(Ok(Some(read_db))) => Ok(Some(self.adapter.read_to_domain(key, &read_db))),
            Some(Ok(None)) | None => Ok(None),
            Some(Err(cause)) => Err(cause),
        }
    }

    /// Roll back `key` to `previous` (the domain value before this operation
    /// started, `None` meaning "didn't exist"), undoing an optimistic write.
    async fn rollback(&self, key: &K, previous: Option<V>) {
        let write_result = match previous.as_ref().and_then(|v| self.adapter.domain_to_write(key, v)) {
            Some(write_db) => self.persistence.write(key, write_db).await,
            None => self.persistence.delete(key).await,
        };
        if write_result.is_err() {
            // The rollback write itself failed; the memory cache is still
            // corrected below so subscribers at least see a consistent value.
        }
        match previous {
            Some(v) => {
                self.memory.put(key.clone(), v, self.clock.now());
            }
            None => self.memory.invalidate(key),
        }
    }

    /// Optimistically apply `patch`, dispatch it to the remote, reconcile the
    /// echo, and roll back on failure (or enqueue when offline).
    pub async fn update(&self, key: K, patch: Patch, policy: UpdatePolicy) -> UpdateResult {
        let lock = self.locks.for_key(&key);
        let _guard = lock.lock().await;

        let mut snapshot: Option<Option<V>> = None;
        if policy.optimistic {
            let current = match self.read_current_domain(&key).await {
                Ok(v) => v,
                Err(cause) => return MutationOutcome::Failed { cause },
            };
            let optimistic_v = self.adapter.apply_patch(&key, current.as_ref(), &patch);
            if let Some(write_db) = self.adapter.domain_to_write(&key, &optimistic_v) {
                if let Err(cause) = self.persistence.write(&key, write_db).await {
                    return MutationOutcome::Failed { cause };
                }
            }
            self.memory.put(key.clone(), optimistic_v, self.clock.now());
            snapshot = Some(current);
        }

        let outcome = with_timeout(policy.timeout, self.remote.update(&key, patch.clone(), policy.precondition.clone())).await;

        match outcome {
            RemoteOutcome::Success { echo, etag } => {
                if let Err(cause) = self.persistence.write(&key, self.adapter.echo_to_write(&key, &echo)).await {
                    if let Some(previous) = snapshot {
                        self.rollback(&key, previous).await;
                    }
                    self.metrics.record_mutation(Outcome::Failure);
                    return MutationOutcome::Failed { cause };
                }
                self.bookkeeper.record_success(&key, self.clock.now(), etag);
                self.memory.put(key.clone(), self.adapter.echo_to_domain(&key, &echo), self.clock.now());
                self.metrics.record_mutation(Outcome::Success);
                MutationOutcome::Synced(())
            }
            RemoteOutcome::Error { cause } => {
                self.bookkeeper.record_failure(&key, self.clock.now(), cause.clone());
                self.metrics.record_mutation(Outcome::Failure);
                if policy.require_online || is_always_terminal(&cause) {
                    if let Some(previous) = snapshot {
                        self.rollback(&key, previous).await;
                    }
                    MutationOutcome::Failed { cause }
                } else {
                    self.enqueue_update(key, patch, policy.precondition);
                    MutationOutcome::Enqueued
                }
            }
        }
    }

    fn enqueue_update(&self, key: K, patch: Patch, precondition: Option<Precondition>) {
        let engine = self.clone();
        let key2 = key.clone();
        self.offline.enqueue(QueuedMutation::new(
            key.clone(),
            self.clock.now(),
            Box::new(move || {
                let engine = engine.clone();
                let key = key2.clone();
                let patch = patch.clone();
                let precondition = precondition.clone();
                Box::pin(async move {
                    match engine.remote.update(&key, patch, precondition).await {
                        RemoteOutcome::Success { echo, etag } => {
                            engine.persistence.write(&key, engine.adapter.echo_to_write(&key, &echo)).await?;
                            engine.bookkeeper.record_success(&key, engine.clock.now(), etag);
                            engine.memory.put(key, engine.adapter.echo_to_domain(&key, &echo), engine.clock.now());
                            Ok(())
                        }
                        RemoteOutcome::Error { cause } => Err(cause),
                    }
                })
            }),
        ));
    }

    /// Create a draft under a provisional key, then rekey to the server's
    /// canonical key once the remote echoes it back.
    pub async fn create(&self, draft: Draft, policy: CreatePolicy) -> CreateResult<K> {
        let provisional = (self.provisional_key_factory)();
        let lock = self.locks.for_key(&provisional);
        let _guard = lock.lock().await;

        let optimistic_v = self.adapter.draft_to_domain(&draft);
        if let Some(write_db) = self.adapter.domain_to_write(&provisional, &optimistic_v) {
            if let Err(cause) = self.persistence.write(&provisional, write_db).await {
                return MutationOutcome::Failed { cause };
            }
        }
        self.memory.put(provisional.clone(), optimistic_v, self.clock.now());

        let outcome = with_timeout(policy.timeout, self.remote.create(draft.clone())).await;
        match outcome {
            RemoteOutcome::Success { echo: (canonical, echo), etag } => {
                let adapter = self.adapter.clone();
                let canonical_for_reconcile = canonical.clone();
                let echo_for_reconcile = echo.clone();
                let reconcile: Box<dyn FnOnce(Option<WriteDb>) -> WriteDb + Send> =
                    Box::new(move |_old| adapter.echo_to_write(&canonical_for_reconcile, &echo_for_reconcile));
                if let Err(cause) = self.persistence.rekey(&provisional, &canonical, reconcile).await {
                    self.memory.invalidate(&provisional);
                    self.metrics.record_mutation(Outcome::Failure);
                    return MutationOutcome::Failed { cause };
                }
                self.bookkeeper.record_success(&canonical, self.clock.now(), etag);
                self.memory.invalidate(&provisional);
                self.memory.put(canonical.clone(), self.adapter.echo_to_domain(&canonical, &echo), self.clock.now());
                self.metrics.record_mutation(Outcome::Success);
                MutationOutcome::Synced(canonical)
            }
            RemoteOutcome::Error { cause } => {
                self.bookkeeper.record_failure(&provisional, self.clock.now(), cause.clone());
                self.metrics.record_mutation(Outcome::Failure);
                if policy.require_online || is_always_terminal(&cause) {
                    let _ = self.persistence.delete(&provisional).await;
                    self.memory.invalidate(&provisional);
                    MutationOutcome::Failed { cause }
                } else {
                    self.enqueue_create(provisional.clone(), draft);
                    MutationOutcome::Enqueued
                }
            }
        }
    }

    fn enqueue_create(&self, provisional: K, draft: Draft) {
        let engine = self.clone();
        self.offline.enqueue(QueuedMutation::new(
            provisional.clone(),
            self.clock.now(),
            Box::new(move || {
                let engine = engine.clone();
                let provisional = provisional.clone();
                let draft = draft.clone();
                Box::pin(async move {
                    match engine.remote.create(draft).await {
                        RemoteOutcome::Success { echo: (canonical, echo), etag } => {
                            let adapter = engine.adapter.clone();
                            let canonical2 = canonical.clone();
                            let echo2 = echo.clone();
                            let reconcile: Box<dyn FnOnce(Option<WriteDb>) -> WriteDb + Send> =
                                Box::new(move |_old| adapter.echo_to_write(&canonical2, &echo2));
                            engine.persistence.rekey(&provisional, &canonical, reconcile).await?;
                            engine.bookkeeper.record_success(&canonical, engine.clock.now(), etag);
                            engine.memory.invalidate(&provisional);
                            engine.memory.put(
                                canonical.clone(),
                                engine.adapter.echo_to_domain(&canonical, &echo),
                                engine.clock.now(),
                            );
                            Ok(())
                        }
                        RemoteOutcome::Error { cause } => Err(cause),
                    }
                })
            }),
        ));
    }

    /// Delete `key`, optimistically if `policy.optimistic`, rolling back the
    /// local delete on a non-enqueueable failure.
    pub async fn delete(&self, key: K, policy: DeletePolicy) -> DeleteResult {
        let lock = self.locks.for_key(&key);
        let _guard = lock.lock().await;

        let mut snapshot: Option<Option<V>> = None;
        if policy.optimistic {
            let current = match self.read_current_domain(&key).await {
                Ok(v) => v,
                Err(cause) => return MutationOutcome::Failed { cause },
            };
            if let Err(cause) = self.persistence.delete(&key).await {
                return MutationOutcome::Failed { cause };
            }
            self.memory.invalidate(&key);
            snapshot = Some(current);
        }

        let outcome = with_timeout(policy.timeout, self.remote.delete(&key, policy.precondition.clone())).await;
        match outcome {
            RemoteOutcome::Success { .. } => {
                if let Err(cause) = self.persistence.delete(&key).await {
                    if let Some(previous) = snapshot {
                        self.rollback(&key, previous).await;
                    }
                    self.metrics.record_mutation(Outcome::Failure);
                    return MutationOutcome::Failed { cause };
                }
                self.memory.invalidate(&key);
                self.bookkeeper.invalidate(&key);
                self.metrics.record_mutation(Outcome::Success);
                MutationOutcome::Synced(())
            }
            RemoteOutcome::Error { cause } => {
                self.bookkeeper.record_failure(&key, self.clock.now(), cause.clone());
                self.metrics.record_mutation(Outcome::Failure);
                if policy.require_online || is_always_terminal(&cause) {
                    if let Some(previous) = snapshot {
                        self.rollback(&key, previous).await;
                    }
                    MutationOutcome::Failed { cause }
                } else {
                    self.enqueue_delete(key, policy.precondition);
                    MutationOutcome::Enqueued
                }
            }
        }
    }

    fn enqueue_delete(&self, key: K, precondition: Option<Precondition>) {
        let engine = self.clone();
        self.offline.enqueue(QueuedMutation::new(
            key.clone(),
            self.clock.now(),
            Box::new(move || {
                let engine = engine.clone();
                let key = key.clone();
                let precondition = precondition.clone();
                Box::pin(async move {
                    match engine.remote.delete(&key, precondition).await {
                        RemoteOutcome::Success { .. } => {
                            engine.persistence.delete(&key).await?;
                            engine.memory.invalidate(&key);
                            engine.bookkeeper.invalidate(&key);
                            Ok(())
                        }
                        RemoteOutcome::Error { cause } => Err(cause),
                    }
                })
            }),
        ));
    }

    /// Replace the full value at `key`, optimistically writing it locally
    /// before dispatching to the remote.
    pub async fn upsert(&self, key: K, value: V, policy: UpsertPolicy) -> UpsertResult {
        self.full_value_write(key, value, policy, FullWriteKind::Upsert).await
    }

    /// Replace the full value at `key`, identical to [`Self::upsert`] except
    /// for which remote operation is dispatched (`replace` vs `upsert`).
    pub async fn replace(&self, key: K, value: V, policy: ReplacePolicy) -> ReplaceResult {
        self.full_value_write(key, value, policy, FullWriteKind::Replace).await
    }

    async fn full_value_write(&self, key: K, value: V, policy: MutationPolicy, kind: FullWriteKind) -> MutationOutcome<()> {
        let lock = self.locks.for_key(&key);
        let _guard = lock.lock().await;

        let mut snapshot: Option<Option<V>> = None;
        if policy.optimistic {
            let current = match self.read_current_domain(&key).await {
                Ok(v) => v,
                Err(cause) => return MutationOutcome::Failed { cause },
            };
            if let Some(write_db) = self.adapter.domain_to_write(&key, &value) {
                if let Err(cause) = self.persistence.write(&key, write_db).await {
                    return MutationOutcome::Failed { cause };
                }
            }
            self.memory.put(key.clone(), value.clone(), self.clock.now());
            snapshot = Some(current);
        }

        let echo_value = self.adapter.domain_to_echo(&key, &value);
        let outcome = match kind {
            FullWriteKind::Upsert => {
                with_timeout(policy.timeout, self.remote.upsert(&key, echo_value, policy.precondition.clone())).await
            }
            FullWriteKind::Replace => {
                with_timeout(policy.timeout, self.remote.replace(&key, echo_value, policy.precondition.clone())).await
            }
        };

        match outcome {
            RemoteOutcome::Success { echo, etag } => {
                if let Err(cause) = self.persistence.write(&key, self.adapter.echo_to_write(&key, &echo)).await {
                    if let Some(previous) = snapshot {
                        self.rollback(&key, previous).await;
                    }
                    self.metrics.record_mutation(Outcome::Failure);
                    return MutationOutcome::Failed { cause };
                }
                self.bookkeeper.record_success(&key, self.clock.now(), etag);
                self.memory.put(key.clone(), self.adapter.echo_to_domain(&key, &echo), self.clock.now());
                self.metrics.record_mutation(Outcome::Success);
                MutationOutcome::Synced(())
            }
            RemoteOutcome::Error { cause } => {
                self.bookkeeper.record_failure(&key, self.clock.now(), cause.clone());
                self.metrics.record_mutation(Outcome::Failure);
                if policy.require_online || is_always_terminal(&cause) {
                    if let Some(previous) = snapshot {
                        self.rollback(&key, previous).await;
                    }
                    MutationOutcome::Failed { cause }
                } else {
                    self.enqueue_full_write(key, value, policy.precondition, kind);
                    MutationOutcome::Enqueued
                }
            }
        }
    }

    fn enqueue_full_write(&self, key: K, value: V, precondition: Option<Precondition>, kind: FullWriteKind) {
        let engine = self.clone();
        self.offline.enqueue(QueuedMutation::new(
            key.clone(),
            self.clock.now(),
            Box::new(move || {
                let engine = engine.clone();
                let key = key.clone();
                let value = value.clone();
                let precondition = precondition.clone();
                Box::pin(async move {
                    let echo_value = engine.adapter.domain_to_echo(&key, &value);
                    let outcome = match kind {
                        FullWriteKind::Upsert => engine.remote.upsert(&key, echo_value, precondition).await,
                        FullWriteKind::Replace => engine.remote.replace(&key, echo_value, precondition).await,
                    };
                    match outcome {
                        RemoteOutcome::Success { echo, etag } => {
                            engine.persistence.write(&key, engine.adapter.echo_to_write(&key, &echo)).await?;
                            engine.bookkeeper.record_success(&key, engine.clock.now(), etag);
                            engine.memory.put(key, engine.adapter.echo_to_domain(&key, &echo), engine.clock.now());
                            Ok(())
                        }
                        RemoteOutcome::Error { cause } => Err(cause),
                    }
                })
            }),
        ));
    }
}

#[derive(Debug, Clone, Copy)]
enum FullWriteKind {
    Upsert,
    Replace,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;
    use dashmap::DashMap;

    use storex_core::contracts::BoxStream;
    use storex_core::FakeClock;

    // A minimal string-keyed domain: K=u32, Patch/Draft/Echo/ReadDb/WriteDb/V all String.
    struct FakePersistence {
        data: DashMap<u32, String>,
    }

    impl FakePersistence {
        fn new() -> Self {
            Self { data: DashMap::new() }
        }
    }

    #[async_trait]
    impl storex_core::contracts::PersistenceReader<u32, String> for FakePersistence {
        async fn reader(&self, key: &u32) -> BoxStream<'static, Result<Option<String>, StorexError>> {
            let value = self.data.get(key).map(|v| v.clone());
            Box::pin(futures_util::stream::once(async move { Ok(value) }))
        }
    }

    #[async_trait]
    impl storex_core::contracts::PersistenceWriter<u32, String> for FakePersistence {
        async fn write(&self, key: &u32, value: String) -> Result<(), StorexError> {
            self.data.insert(*key, value);
            Ok(())
        }

        async fn delete(&self, key: &u32) -> Result<(), StorexError> {
            self.data.remove(key);
            Ok(())
        }

        async fn rekey(
            &self,
            old: &u32,
            new: &u32,
            reconcile: Box<dyn FnOnce(Option<String>) -> String + Send>,
        ) -> Result<(), StorexError> {
            let old_value = self.data.remove(old).map(|(_, v)| v);
            self.data.insert(*new, reconcile(old_value));
            Ok(())
        }
    }

    struct FakeRemote {
        fail: AtomicBool,
        calls: AtomicU32,
    }

    impl FakeRemote {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteMutator<u32, String, String, String> for FakeRemote {
        async fn update(&self, _key: &u32, patch: String, _precondition: Option<Precondition>) -> RemoteOutcome<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                RemoteOutcome::Error { cause: StorexError::network("unreachable") }
            } else {
                RemoteOutcome::Success { echo: patch, etag: None }
            }
        }

        async fn create(&self, draft: String) -> RemoteOutcome<(u32, String)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                RemoteOutcome::Error { cause: StorexError::network("unreachable") }
            } else {
                RemoteOutcome::Success { echo: (42, draft), etag: None }
            }
        }

        async fn delete(&self, _key: &u32, _precondition: Option<Precondition>) -> RemoteOutcome<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                RemoteOutcome::Error { cause: StorexError::network("unreachable") }
            } else {
                RemoteOutcome::Success { echo: (), etag: None }
            }
        }

        async fn upsert(&self, _key: &u32, value: String, _precondition: Option<Precondition>) -> RemoteOutcome<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                RemoteOutcome::Error { cause: StorexError::network("unreachable") }
            } else {
                RemoteOutcome::Success { echo: value, etag: None }
            }
        }

        async fn replace(&self, key: &u32, value: String, precondition: Option<Precondition>) -> RemoteOutcome<String> {
            self.upsert(key, value, precondition).await
        }
    }

    struct StringAdapter;

    impl MutationAdapter<u32, String, String, String, String, String, String> for StringAdapter {
        fn read_to_domain(&self, _key: &u32, read: &String) -> String {
            read.clone()
        }

        fn apply_patch(&self, _key: &u32, _current: Option<&String>, patch: &String) -> String {
            patch.clone()
        }

        fn draft_to_domain(&self, draft: &String) -> String {
            draft.clone()
        }

        fn domain_to_write(&self, _key: &u32, value: &String) -> Option<String> {
            Some(value.clone())
        }

        fn echo_to_write(&self, _key: &u32, echo: &String) -> String {
            echo.clone()
        }

        fn echo_to_domain(&self, _key: &u32, echo: &String) -> String {
            echo.clone()
        }

        fn domain_to_echo(&self, _key: &u32, value: &String) -> String {
            value.clone()
        }
    }

    fn harness() -> (MutationEngine<u32, String, String, String, String, String, String>, Arc<FakePersistence>, Arc<FakeRemote>) {
        let persistence = Arc::new(FakePersistence::new());
        let remote = Arc::new(FakeRemote::new());
        let next_provisional = Arc::new(AtomicU32::new(1_000_000));
        let engine = MutationEngine::new(
            Arc::new(LockTable::new(16)),
            Arc::new(MemoryCache::new(16)),
            Arc::new(Bookkeeper::new()),
            persistence.clone(),
            remote.clone(),
            Arc::new(StringAdapter),
            Arc::new(OfflineQueue::new()),
            Arc::new(move || next_provisional.fetch_add(1, Ordering::SeqCst)),
            Arc::new(FakeClock::new(storex_core::Instant::ZERO)),
            Arc::new(crate::metrics::NoopMetrics),
        );
        (engine, persistence, remote)
    }

    #[tokio::test]
    async fn update_success_writes_echo_and_caches_it() {
        let (engine, persistence, _remote) = harness();
        persistence.data.insert(1, "alice".into());

        let outcome = engine.update(1, "bob".into(), MutationPolicy::default()).await;
        assert!(matches!(outcome, MutationOutcome::Synced(())));
        assert_eq!(persistence.data.get(&1).map(|v| v.clone()), Some("bob".into()));
        assert_eq!(engine.memory.get(&1), Some("bob".into()));
    }

    #[tokio::test]
    async fn update_failure_with_require_online_rolls_back() {
        let (engine, persistence, remote) = harness();
        persistence.data.insert(1, "alice".into());
        remote.fail.store(true, Ordering::SeqCst);

        let policy = MutationPolicy { require_online: true, ..Default::default() };
        let outcome = engine.update(1, "bob".into(), policy).await;
        assert!(matches!(outcome, MutationOutcome::Failed { .. }));
        assert_eq!(persistence.data.get(&1).map(|v| v.clone()), Some("alice".into()));
        assert_eq!(engine.memory.get(&1), Some("alice".into()));
    }

    #[tokio::test]
    async fn update_failure_without_require_online_enqueues_and_later_drains() {
        let (engine, persistence, remote) = harness();
        persistence.data.insert(1, "alice".into());
        remote.fail.store(true, Ordering::SeqCst);

        let outcome = engine.update(1, "bob".into(), MutationPolicy::default()).await;
        assert!(matches!(outcome, MutationOutcome::Enqueued));
        // optimistic write already landed locally even though the remote failed.
        assert_eq!(persistence.data.get(&1).map(|v| v.clone()), Some("bob".into()));
        assert_eq!(engine.offline_queue_len(), 1);

        remote.fail.store(false, Ordering::SeqCst);
        let results = engine.drain_offline_queue().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(engine.offline_queue_len(), 0);
        assert_eq!(persistence.data.get(&1).map(|v| v.clone()), Some("bob".into()));
    }

    #[tokio::test]
    async fn create_rekeys_provisional_to_canonical() {
        let (engine, persistence, _remote) = harness();

        let outcome = engine.create("carol".into(), MutationPolicy::default()).await;
        let canonical = match outcome {
            MutationOutcome::Synced(k) => k,
            other => panic!("expected Synced, got {other:?}"),
        };
        assert_eq!(canonical, 42);
        assert_eq!(persistence.data.get(&42).map(|v| v.clone()), Some("carol".into()));
        assert_eq!(engine.memory.get(&42), Some("carol".into()));
        assert!(persistence.data.get(&1_000_000).is_none(), "provisional record must be gone after rekey");
    }

    #[tokio::test]
    async fn delete_success_removes_from_persistence_and_memory() {
        let (engine, persistence, _remote) = harness();
        persistence.data.insert(1, "alice".into());
        engine.memory.put(1, "alice".into(), storex_core::Instant::ZERO);

        let outcome = engine.delete(1, MutationPolicy::default()).await;
        assert!(matches!(outcome, MutationOutcome::Synced(())));
        assert!(persistence.data.get(&1).is_none());
        assert_eq!(engine.memory.get(&1), None);
    }

    #[tokio::test]
    async fn upsert_success_round_trips_through_echo() {
        let (engine, persistence, _remote) = harness();

        let outcome = engine.upsert(7, "dana".into(), MutationPolicy::default()).await;
        assert!(matches!(outcome, MutationOutcome::Synced(())));
        assert_eq!(persistence.data.get(&7).map(|v| v.clone()), Some("dana".into()));
    }
}
