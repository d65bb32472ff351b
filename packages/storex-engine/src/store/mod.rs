//! Store coordinator (spec §4.6): the read pipeline orchestrating memory,
//! persistence, and the fetcher behind one reactive stream per subscription.

pub mod result;

use std::hash::Hash;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug_span, Instrument};

use storex_core::contracts::{BoxStream, Converter, FetchRequest, Fetcher, FetcherOutcome, NetOut, Persistence};
use storex_core::{ClockSource, Key, StorexError};

use crate::freshness::{Bookkeeper, FetchPlan, FreshnessPolicy, Validator, ValidatorContext};
use crate::locks::LockTable;
use crate::memory::MemoryCache;
use crate::metrics::{Outcome, StoreMetrics};
use crate::single_flight::SingleFlight;

pub use result::{Origin, StoreResult};

/// The read-path coordinator: memory cache, per-key locks, single-flight
/// fetch coalescing, freshness bookkeeping, and reactive emission, wired
/// over a consumer-supplied persistence layer, fetcher, and converter.
pub struct Store<K, B, ReadDb, WriteDb, V> {
    memory: Arc<MemoryCache<K, V>>,
    locks: Arc<LockTable<K>>,
    single_flight: Arc<SingleFlight<K, ()>>,
    bookkeeper: Arc<Bookkeeper<K>>,
    persistence: Arc<dyn Persistence<K, ReadDb, WriteDb>>,
    fetcher: Arc<dyn Fetcher<K, B>>,
    converter: Arc<dyn Converter<K, B, ReadDb, WriteDb, V>>,
    clock: Arc<dyn ClockSource>,
    metrics: Arc<dyn StoreMetrics>,
}

impl<K, B, ReadDb, WriteDb, V> Store<K, B, ReadDb, WriteDb, V>
where
    K: Hash + Eq + Clone + Send + Sync + AsKeyView + 'static,
    B: Send + 'static,
    ReadDb: Send + Sync + Clone + 'static,
    WriteDb: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Wire a coordinator over its collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        max_memory_entries: usize,
        max_locks: usize,
        persistence: Arc<dyn Persistence<K, ReadDb, WriteDb>>,
        fetcher: Arc<dyn Fetcher<K, B>>,
        converter: Arc<dyn Converter<K, B, ReadDb, WriteDb, V>>,
        clock: Arc<dyn ClockSource>,
        metrics: Arc<dyn StoreMetrics>,
    ) -> Self {
        Self {
            memory: Arc::new(MemoryCache::new(max_memory_entries)),
            locks: Arc::new(LockTable::new(max_locks)),
            single_flight: Arc::new(SingleFlight::new()),
            bookkeeper: Arc::new(Bookkeeper::new()),
            persistence,
            fetcher,
            converter,
            clock,
            metrics,
        }
    }

    /// Suspend until a value is available (or a non-recoverable error occurs).
    pub async fn get(&self, key: K, freshness: FreshnessPolicy) -> Result<V, StorexError> {
        let mut stream = self.stream(key, freshness);
        while let Some(item) = stream.next().await {
            match item {
                StoreResult::Data { value, .. } => return Ok(value),
                StoreResult::Error { cause, .. } => return Err(cause),
                StoreResult::Loading { .. } => continue,
            }
        }
        Err(StorexError::NotFound)
    }

    /// A reactive, restartable stream of results for `key`.
    ///
    /// Emission order per spec §4.6: `Memory?` (if cached), then `Persisted*`
    /// (every persistence-reader emission, including the one the fetch's own
    /// write produces). Background fetches are spawned as children of this
    /// stream's lifetime: dropping the returned stream aborts them.
    pub fn stream(&self, key: K, freshness: FreshnessPolicy) -> BoxStream<'static, StoreResult<V>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let memory = self.memory.clone();
        let locks = self.locks.clone();
        let single_flight = self.single_flight.clone();
        let bookkeeper = self.bookkeeper.clone();
        let persistence = self.persistence.clone();
        let fetcher = self.fetcher.clone();
        let converter = self.converter.clone();
        let clock = self.clock.clone();
        let metrics = self.metrics.clone();

        // Scopes this subscription's background children: cancelled the
        // moment the forward loop notices the subscriber dropped `rx`, so
        // that children don't outlive the returned stream.
        let cancel = CancellationToken::new();

        tokio::spawn(
            async move {
                drive_subscription(
                    key,
                    freshness,
                    tx,
                    memory,
                    locks,
                    single_flight,
                    bookkeeper,
                    persistence,
                    fetcher,
                    converter,
                    clock,
                    metrics,
                    cancel,
                )
                .await;
            }
            .instrument(debug_span!("store_subscription")),
        );

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    /// Drop the memory entry and freshness metadata for `key`.
    pub fn invalidate(&self, key: &K) {
        self.memory.invalidate(key);
        self.bookkeeper.invalidate(key);
    }

    /// Drop every memory entry and freshness metadata whose key belongs to `namespace`.
    pub fn invalidate_namespace(&self, namespace: &str) {
        let ns = namespace.to_string();
        self.memory.invalidate_matching(|k| k.namespace_str() == ns);
    }

    /// Drop every memory entry and all freshness metadata.
    pub fn invalidate_all(&self) {
        self.memory.invalidate_all();
        self.bookkeeper.clear();
    }

}

/// Narrow accessor `Store<K, ..>` needs from its key type to scope namespace
/// invalidation without depending on `storex_core::Key` directly in generic code.
pub trait AsKeyView {
    /// The namespace this key belongs to, as a plain string for comparison.
    fn namespace_str(&self) -> &str;
}

impl AsKeyView for Key {
    fn namespace_str(&self) -> &str {
        match self {
            Key::ByIdentity { namespace, .. } | Key::ByQuery { namespace, .. } => namespace,
            Key::Custom(_) => "",
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive_subscription<K, B, ReadDb, WriteDb, V>(
    key: K,
    freshness: FreshnessPolicy,
    tx: mpsc::UnboundedSender<StoreResult<V>>,
    memory: Arc<MemoryCache<K, V>>,
    locks: Arc<LockTable<K>>,
    single_flight: Arc<SingleFlight<K, ()>>,
    bookkeeper: Arc<Bookkeeper<K>>,
    persistence: Arc<dyn Persistence<K, ReadDb, WriteDb>>,
    fetcher: Arc<dyn Fetcher<K, B>>,
    converter: Arc<dyn Converter<K, B, ReadDb, WriteDb, V>>,
    clock: Arc<dyn ClockSource>,
    metrics: Arc<dyn StoreMetrics>,
    cancel: CancellationToken,
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    B: Send + 'static,
    ReadDb: Send + Sync + Clone + 'static,
    WriteDb: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    // Step 1: memory attach.
    let cached_now = memory.get(&key);
    metrics.record_cache_lookup(cached_now.is_some());
    if let Some(v) = cached_now.clone() {
        if tx.send(StoreResult::data(v, Origin::Memory)).is_err() {
            return;
        }
    } else if tx.send(StoreResult::Loading { from_cache: false }).is_err() {
        return;
    }

    // Step 2: subscribe to the persistence reader.
    let mut reader_stream = persistence.reader(&key).await;

    // Step 3: validator plan.
    let last_meta = bookkeeper.get(&key);
    let plan = Validator::plan(&ValidatorContext {
        policy: freshness,
        last_meta,
        cached_value_present: cached_now.is_some(),
        now: clock.now(),
    });

    let mut children: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    if !matches!(plan, FetchPlan::Skip) {
        if matches!(freshness, FreshnessPolicy::MustBeFresh) {
            // First emission waits for the fetch to resolve.
            let outcome = run_fetch(
                &key,
                plan,
                &locks,
                &single_flight,
                &bookkeeper,
                &persistence,
                &fetcher,
                &converter,
                &clock,
                &metrics,
            )
            .await;
            if let Err(cause) = outcome {
                if tx
                    .send(StoreResult::Error {
                        cause,
                        cached_value: memory.get(&key),
                    })
                    .is_err()
                {
                    return;
                }
            }
        } else {
            // Background refresh, scoped to this subscription.
            let key2 = key.clone();
            let locks2 = locks.clone();
            let sf2 = single_flight.clone();
            let bk2 = bookkeeper.clone();
            let persistence2 = persistence.clone();
            let fetcher2 = fetcher.clone();
            let converter2 = converter.clone();
            let clock2 = clock.clone();
            let metrics2 = metrics.clone();
            let memory2 = memory.clone();
            let tx2 = tx.clone();
            let stale_if_error = matches!(freshness, FreshnessPolicy::StaleIfError);
            let cancel_child = cancel.clone();

            children.push(tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    () = cancel_child.cancelled() => return,
                    outcome = run_fetch(
                        &key2, plan, &locks2, &sf2, &bk2, &persistence2, &fetcher2, &converter2, &clock2, &metrics2,
                    ) => outcome,
                };
                if let Err(cause) = outcome {
                    if stale_if_error {
                        if let Some(cached) = memory2.get(&key2) {
                            let _ = tx2.send(StoreResult::stale_data(cached.clone(), Origin::Memory));
                        }
                    }
                    let _ = tx2.send(StoreResult::Error {
                        cause,
                        cached_value: memory2.get(&key2),
                    });
                }
            }));
        }
    }

    // Step 2 (cont'd): forward every persistence-reader emission, racing the
    // reader against the subscriber dropping the returned stream. Without
    // this race, a subscriber drop while the reader is idle would never wake
    // this task, leaving the children below running past the stream's death.
    loop {
        tokio::select! {
            biased;
            () = tx.closed() => break,
            item = reader_stream.next() => match item {
                Some(Ok(Some(read_db))) => {
                    let value = converter.read_to_domain(&key, &read_db);
                    memory.put(key.clone(), value.clone(), clock.now());
                    if tx.send(StoreResult::data(value, Origin::Persisted)).is_err() {
                        break;
                    }
                }
                Some(Ok(None)) => {
                    // No record at this key yet; nothing to forward.
                }
                Some(Err(cause)) => {
                    if tx
                        .send(StoreResult::Error {
                            cause,
                            cached_value: memory.get(&key),
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    cancel.cancel();
    for h in children {
        h.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_fetch<K, B, ReadDb, WriteDb, V>(
    key: &K,
    plan: FetchPlan,
    locks: &Arc<LockTable<K>>,
    single_flight: &Arc<SingleFlight<K, ()>>,
    bookkeeper: &Arc<Bookkeeper<K>>,
    persistence: &Arc<dyn Persistence<K, ReadDb, WriteDb>>,
    fetcher: &Arc<dyn Fetcher<K, B>>,
    converter: &Arc<dyn Converter<K, B, ReadDb, WriteDb, V>>,
    clock: &Arc<dyn ClockSource>,
    metrics: &Arc<dyn StoreMetrics>,
) -> Result<(), StorexError>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    B: Send + 'static,
    ReadDb: Send + Sync + Clone + 'static,
    WriteDb: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    let request = match plan {
        FetchPlan::Skip => return Ok(()),
        FetchPlan::Conditional {
            if_none_match,
            if_modified_since,
        } => FetchRequest {
            if_none_match,
            if_modified_since,
        },
        FetchPlan::Unconditional => FetchRequest::default(),
    };

    let key_for_sf = key.clone();
    let locks = locks.clone();
    let bookkeeper = bookkeeper.clone();
    let persistence = persistence.clone();
    let fetcher = fetcher.clone();
    let converter = converter.clone();
    let clock = clock.clone();
    let metrics = metrics.clone();
    let key_inner = key.clone();

    let start = std::time::Instant::now();
    let result = single_flight
        .launch(key_for_sf, move || async move {
            let mut outcomes = fetcher.fetch(&key_inner, request).await;
            while let Some(outcome) = outcomes.next().await {
                match outcome {
                    FetcherOutcome::Success { body, etag } => {
                        let net = NetOut { body, etag: etag.clone() };
                        let write_db = converter.net_to_write(&key_inner, net);
                        let guard_lock = locks.for_key(&key_inner);
                        let _guard = guard_lock.lock().await;
                        persistence.write(&key_inner, write_db).await?;
                        bookkeeper.record_success(&key_inner, clock.now(), etag);
                    }
                    FetcherOutcome::NotModified { etag } => {
                        bookkeeper.record_success(&key_inner, clock.now(), Some(etag));
                    }
                    FetcherOutcome::Error { cause } => {
                        bookkeeper.record_failure(&key_inner, clock.now(), cause.clone());
                        return Err(cause);
                    }
                }
            }
            Ok(())
        })
        .await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(_) => {
            metrics.record_fetch(elapsed_ms, Outcome::Success);
            Ok(())
        }
        Err(shared_err) => {
            metrics.record_fetch(elapsed_ms, Outcome::Failure);
            Err((*shared_err).clone())
        }
    }
}
