//! The pagination engine's coordinator (spec §4.9): one [`PageStore`] per
//! entity-list shape, holding per-key page windows and driving loads through
//! a [`PageLoader`], the write-path counterpart to `store::Store`'s `Fetcher`.

use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug_span, Instrument};

use storex_core::contracts::{BoxStream, LoadedPage, PageDirection, PageLoader};
use storex_core::ClockSource;

use crate::config::EngineConfig;
use crate::freshness::FreshnessPolicy;
use crate::locks::LockTable;
use crate::metrics::{Outcome, StoreMetrics};
use crate::paging::state::{KeyState, LoadState, Page, PagingConfig, PagingEvent};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 256;

struct Inner<K, Token, Item> {
    states: dashmap::DashMap<K, Arc<SyncMutex<KeyState<Token, Item>>>>,
    notify: dashmap::DashMap<K, broadcast::Sender<PagingEvent<Token, Item>>>,
    locks: LockTable<K>,
    loader: Arc<dyn PageLoader<K, Token, Item>>,
    clock: Arc<dyn ClockSource>,
    metrics: Arc<dyn StoreMetrics>,
    config: EngineConfig,
}

/// Coordinates reactive, windowed pagination for one entity-list shape.
///
/// Cheaply cloneable; all state lives behind the shared `Arc<Inner>`.
pub struct PageStore<K, Token, Item> {
    inner: Arc<Inner<K, Token, Item>>,
}

impl<K, Token, Item> Clone for PageStore<K, Token, Item> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<K, Token, Item> PageStore<K, Token, Item>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    Token: Clone + Send + Sync + 'static,
    Item: Clone + Send + Sync + 'static,
{
    /// Build a page store over `loader`.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        loader: Arc<dyn PageLoader<K, Token, Item>>,
        clock: Arc<dyn ClockSource>,
        metrics: Arc<dyn StoreMetrics>,
    ) -> Self {
        let max_locks = config.max_locks;
        Self {
            inner: Arc::new(Inner {
                states: dashmap::DashMap::new(),
                notify: dashmap::DashMap::new(),
                locks: LockTable::new(max_locks),
                loader,
                clock,
                metrics,
                config,
            }),
        }
    }

    fn state_for(&self, key: &K) -> Arc<SyncMutex<KeyState<Token, Item>>> {
        self.inner
            .states
            .entry(key.clone())
            .or_insert_with(|| Arc::new(SyncMutex::new(KeyState::default())))
            .clone()
    }

    fn sender_for(&self, key: &K) -> broadcast::Sender<PagingEvent<Token, Item>> {
        self.inner
            .notify
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY).0)
            .clone()
    }

    fn publish(&self, key: &K) {
        let snapshot = self.state_for(key).lock().snapshot();
        let _ = self.sender_for(key).send(snapshot);
    }

    /// Subscribe to `key`'s pagination window, emitting the current snapshot
    /// immediately and every subsequent one as the window changes. The first
    /// caller's `config` wins; later subscribers to the same key reuse it.
    /// On a key's very first subscription an `Initial` load is auto-triggered
    /// exactly once.
    pub fn stream(
        &self,
        key: K,
        initial_token: Option<Token>,
        config: Option<PagingConfig>,
        freshness: FreshnessPolicy,
    ) -> BoxStream<'static, PagingEvent<Token, Item>> {
        let state = self.state_for(&key);
        let needs_initial = {
            let mut s = state.lock();
            if s.config.is_none() {
                s.config = Some(config.unwrap_or_else(|| PagingConfig::from_engine_config(&self.inner.config)));
            }
            if s.initial_load_triggered {
                false
            } else {
                s.initial_load_triggered = true;
                true
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(state.lock().snapshot());

        let mut broadcast_rx = self.sender_for(&key).subscribe();
        let forward_tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = broadcast_rx.recv().await {
                if forward_tx.send(event).is_err() {
                    break;
                }
            }
        });

        let this = self.clone();
        let trigger_key = key.clone();
        tokio::spawn(
            async move {
                if needs_initial {
                    this.load(trigger_key, PageDirection::Initial, initial_token, freshness).await;
                } else {
                    this.maybe_background_refresh(&trigger_key, freshness).await;
                }
            }
            .instrument(debug_span!("paging_auto_trigger")),
        );

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    async fn maybe_background_refresh(&self, key: &K, freshness: FreshnessPolicy) {
        let state = self.state_for(key);
        let should_refresh = {
            let s = state.lock();
            let ttl = s.config.as_ref().map(|c| c.page_ttl).unwrap_or_default();
            match freshness {
                FreshnessPolicy::MustBeFresh => true,
                FreshnessPolicy::CachedOrFetch | FreshnessPolicy::StaleIfError => s
                    .last_load_at
                    .map_or(true, |at| self.inner.clock.now().saturating_since(at) > ttl.as_millis() as u64),
                FreshnessPolicy::MinAge(_) => true, // `load` itself enforces the MinAge skip.
            }
        };
        if should_refresh {
            // MustBeFresh bypasses the `CachedOrFetch` cache-serving branch inside
            // `load`, preventing this background refresh from recursing into itself.
            let effective = if matches!(freshness, FreshnessPolicy::CachedOrFetch) {
                FreshnessPolicy::MustBeFresh
            } else {
                freshness
            };
            self.load(key.clone(), PageDirection::Initial, None, effective).await;
        }
    }

    /// Perform one direction load against the configured loader, apply the
    /// result to the key's window, and notify subscribers. No-ops if a load
    /// for `direction` is already in flight, if a non-initial direction has
    /// no effective continuation token, or if `MinAge` rate-limits the call.
    pub async fn load(&self, key: K, direction: PageDirection, from_token: Option<Token>, freshness: FreshnessPolicy) {
        let lock = self.inner.locks.for_key(&key);
        let _guard = lock.lock().await;

        let state = self.state_for(&key);
        let token = {
            let s = state.lock();
            if s.load_states.get(direction).is_loading() {
                return;
            }
            let rate_limited = |last_load_at: Option<storex_core::Instant>| {
                matches!(freshness, FreshnessPolicy::MinAge(d)
                    if last_load_at.is_some_and(|at| self.inner.clock.now().saturating_since(at) <= d.as_millis() as u64))
            };
            match direction {
                PageDirection::Initial => {
                    if rate_limited(s.last_load_at) {
                        return;
                    }
                    from_token
                }
                PageDirection::Append => {
                    let token = from_token.or_else(|| s.next_token.clone());
                    if token.is_none() || rate_limited(s.last_load_at) {
                        return;
                    }
                    token
                }
                PageDirection::Prepend => {
                    let token = from_token.or_else(|| s.prev_token.clone());
                    if token.is_none() || rate_limited(s.last_load_at) {
                        return;
                    }
                    token
                }
            }
        };

        let max_size_items = state.lock().config.as_ref().map_or(self.inner.config.default_max_size_items, |c| c.max_size_items);

        state.lock().load_states.set(direction, LoadState::Loading);
        self.publish(&key);

        let outcome = self
            .inner
            .loader
            .load_page(&key, direction, token)
            .instrument(debug_span!("paging_load", direction = ?direction))
            .await;

        match outcome {
            Ok(LoadedPage { items, prev, next }) => {
                let page = Page { items, prev, next, stored_at: self.inner.clock.now() };
                let mut s = state.lock();
                s.apply_page(direction, page, max_size_items);
                s.load_states.set(direction, LoadState::NotLoading);
                s.last_load_at = Some(self.inner.clock.now());
                drop(s);
                self.inner.metrics.record_page_load(direction_label(direction), Outcome::Success);
            }
            Err(cause) => {
                let can_serve_stale = matches!(freshness, FreshnessPolicy::StaleIfError);
                state.lock().load_states.set(direction, LoadState::Error { cause, can_serve_stale });
                self.inner.metrics.record_page_load(direction_label(direction), Outcome::Failure);
            }
        }

        self.publish(&key);
    }

    /// Drop all tracked state for `key`, as if it had never been subscribed to.
    pub fn invalidate(&self, key: &K) {
        self.inner.states.remove(key);
        self.inner.notify.remove(key);
    }
}

fn direction_label(direction: PageDirection) -> &'static str {
    match direction {
        PageDirection::Initial => "initial",
        PageDirection::Append => "append",
        PageDirection::Prepend => "prepend",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use futures_util::StreamExt;

    use storex_core::{FakeClock, Instant, StorexError};

    use super::*;

    struct FakeLoader {
        pages: SyncMutex<VecDeque<Result<LoadedPage<u32, u32>, StorexError>>>,
        calls: AtomicU32,
    }

    impl FakeLoader {
        fn new(pages: Vec<Result<LoadedPage<u32, u32>, StorexError>>) -> Self {
            Self { pages: SyncMutex::new(pages.into()), calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl PageLoader<u32, u32, u32> for FakeLoader {
        async fn load_page(&self, _key: &u32, _direction: PageDirection, _from_token: Option<u32>) -> Result<LoadedPage<u32, u32>, StorexError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages.lock().pop_front().unwrap_or(Ok(LoadedPage { items: vec![], prev: None, next: None }))
        }
    }

    fn harness(pages: Vec<Result<LoadedPage<u32, u32>, StorexError>>) -> (PageStore<u32, u32, u32>, Arc<FakeLoader>) {
        let loader = Arc::new(FakeLoader::new(pages));
        let store = PageStore::new(
            EngineConfig::default(),
            loader.clone() as Arc<dyn PageLoader<u32, u32, u32>>,
            Arc::new(FakeClock::new(Instant::ZERO)),
            Arc::new(crate::metrics::NoopMetrics),
        );
        (store, loader)
    }

    #[tokio::test]
    async fn first_subscribe_auto_triggers_initial_load() {
        let (store, loader) = harness(vec![Ok(LoadedPage { items: vec![1, 2, 3], prev: None, next: Some(4) })]);
        let mut stream = store.stream(1, None, None, FreshnessPolicy::CachedOrFetch);

        let empty = stream.next().await.unwrap();
        assert!(matches!(empty, PagingEvent::Snapshot { items, .. } if items.is_empty()));

        let loaded = stream.next().await.unwrap();
        match loaded {
            PagingEvent::Snapshot { items, next, fully_loaded, .. } => {
                assert_eq!(items, vec![1, 2, 3]);
                assert_eq!(next, Some(4));
                assert!(!fully_loaded);
            }
        }
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn append_extends_the_window() {
        let (store, _) = harness(vec![
            Ok(LoadedPage { items: vec![1, 2], prev: None, next: Some(3) }),
            Ok(LoadedPage { items: vec![3, 4], prev: Some(2), next: None }),
        ]);
        let mut stream = store.stream(1, None, None, FreshnessPolicy::CachedOrFetch);
        let _ = stream.next().await; // empty
        let _ = stream.next().await; // initial

        store.load(1, PageDirection::Append, None, FreshnessPolicy::MustBeFresh).await;
        let after_append = stream.next().await.unwrap();
        match after_append {
            PagingEvent::Snapshot { items, next, fully_loaded, .. } => {
                assert_eq!(items, vec![1, 2, 3, 4]);
                assert_eq!(next, None);
                assert!(fully_loaded);
            }
        }
    }

    #[tokio::test]
    async fn append_without_next_token_is_a_no_op() {
        let (store, loader) = harness(vec![Ok(LoadedPage { items: vec![1], prev: None, next: None })]);
        let mut stream = store.stream(1, None, None, FreshnessPolicy::CachedOrFetch);
        let _ = stream.next().await;
        let _ = stream.next().await;

        store.load(1, PageDirection::Append, None, FreshnessPolicy::MustBeFresh).await;
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_load_while_in_flight_is_a_no_op() {
        let (store, loader) = harness(vec![Ok(LoadedPage { items: vec![1], prev: None, next: Some(2) })]);
        store.state_for(&1).lock().load_states.set(PageDirection::Initial, LoadState::Loading);
        store.load(1, PageDirection::Initial, None, FreshnessPolicy::MustBeFresh).await;
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn min_age_rate_limits_rapid_append_calls() {
        let (store, loader) = harness(vec![
            Ok(LoadedPage { items: vec![1, 2], prev: None, next: Some(3) }),
            Ok(LoadedPage { items: vec![3], prev: Some(2), next: None }),
        ]);
        store.load(1, PageDirection::Initial, None, FreshnessPolicy::MustBeFresh).await;
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

        store.load(1, PageDirection::Append, None, FreshnessPolicy::MinAge(std::time::Duration::from_secs(60))).await;
        // `last_load_at` is `Instant::ZERO` from the fake clock, well within the window.
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_failure_preserves_pages_and_marks_error() {
        let (store, _) = harness(vec![
            Ok(LoadedPage { items: vec![1], prev: None, next: Some(2) }),
            Err(StorexError::Network { cause: "boom".into() }),
        ]);
        store.load(1, PageDirection::Initial, None, FreshnessPolicy::MustBeFresh).await;
        store.load(1, PageDirection::Append, None, FreshnessPolicy::StaleIfError).await;

        let state = store.state_for(&1);
        let guard = state.lock();
        assert_eq!(guard.pages.len(), 1);
        match &guard.load_states.append {
            LoadState::Error { can_serve_stale, .. } => assert!(*can_serve_stale),
            other => panic!("expected Error state, got {other:?}"),
        }
    }
}
