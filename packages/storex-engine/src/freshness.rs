//! Freshness policies, the validator, and the bookkeeper (spec §4.4) — the
//! sole authority deciding whether a read needs a network round-trip.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use std::time::Duration;

use storex_core::{ClockSource, ETag, Instant, Meta, StorexError};

/// The closed set of freshness policies a caller may request per read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessPolicy {
    /// Serve cache immediately if present; otherwise fetch. Always schedules
    /// a background refresh when cache was served.
    CachedOrFetch,
    /// Skip the fetch entirely while the last success is within `d`.
    MinAge(Duration),
    /// Always fetch; never serve cache alone as the terminal answer.
    MustBeFresh,
    /// Like `CachedOrFetch`, but a fetch error still feeds the subscriber the
    /// cached value, tagged stale, instead of an error-only outcome.
    StaleIfError,
}

/// What the validator decided a read should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// No fetch; serve cache only.
    Skip,
    /// Issue a conditional request.
    Conditional {
        /// The cached ETag, sent as `If-None-Match`.
        if_none_match: Option<ETag>,
        /// The cached success instant, sent as `If-Modified-Since`.
        if_modified_since: Option<Instant>,
    },
    /// Issue a full, unconditional request.
    Unconditional,
}

/// The context the validator consults to plan a fetch.
pub struct ValidatorContext {
    /// The effective freshness policy for this read.
    pub policy: FreshnessPolicy,
    /// The last recorded bookkeeper state for this key, if any.
    pub last_meta: Option<Meta>,
    /// Whether a cached value is currently available.
    pub cached_value_present: bool,
    /// The current instant.
    pub now: Instant,
}

/// Decides skip/conditional/unconditional per spec §4.4.
pub struct Validator;

impl Validator {
    /// Plan the fetch for one read, given its context.
    #[must_use]
    pub fn plan(ctx: &ValidatorContext) -> FetchPlan {
        match ctx.policy {
            FreshnessPolicy::CachedOrFetch | FreshnessPolicy::StaleIfError => {
                if ctx.cached_value_present {
                    // Cache is served synchronously by the caller; this plan
                    // governs only the background refresh.
                    Self::conditional_or_unconditional(ctx)
                } else {
                    FetchPlan::Unconditional
                }
            }
            FreshnessPolicy::MinAge(d) => {
                let fresh = ctx
                    .last_meta
                    .as_ref()
                    .and_then(|m| m.last_success_at)
                    .is_some_and(|at| ctx.now.saturating_since(at) <= d.as_millis() as u64);
                if fresh {
                    FetchPlan::Skip
                } else {
                    Self::conditional_or_unconditional(ctx)
                }
            }
            FreshnessPolicy::MustBeFresh => FetchPlan::Unconditional,
        }
    }

    fn conditional_or_unconditional(ctx: &ValidatorContext) -> FetchPlan {
        match ctx.last_meta.as_ref().and_then(|m| m.etag.clone()) {
            Some(etag) => FetchPlan::Conditional {
                if_none_match: Some(etag),
                if_modified_since: ctx.last_meta.as_ref().and_then(|m| m.last_success_at),
            },
            None => FetchPlan::Unconditional,
        }
    }
}

/// Records `{etag?, at}` on success and `{error, at}` on failure; the sole
/// writer of per-key [`Meta`].
pub struct Bookkeeper<K> {
    entries: DashMap<K, Meta>,
}

impl<K: Hash + Eq + Clone> Default for Bookkeeper<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone> Bookkeeper<K> {
    /// An empty bookkeeper.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Current metadata for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Meta> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Record a successful (or not-modified) fetch.
    pub fn record_success(&self, key: &K, at: Instant, etag: Option<ETag>) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.last_success_at = Some(at);
        entry.last_error = None;
        if etag.is_some() {
            entry.etag = etag;
        }
    }

    /// Record a failed fetch.
    pub fn record_failure(&self, key: &K, at: Instant, error: StorexError) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.last_failure_at = Some(at);
        entry.last_error = Some(Arc::new(error));
    }

    /// Drop all recorded metadata for `key`.
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop every recorded entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop entries whose most recent success and failure both predate
    /// `cutoff`, returning how many were dropped. Entries with no recorded
    /// activity at all are left alone — they carry no staleness to bound.
    pub fn sweep_older_than(&self, cutoff: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, meta| {
            let last_activity = match (meta.last_success_at, meta.last_failure_at) {
                (Some(s), Some(f)) => Some(s.max(f)),
                (Some(s), None) => Some(s),
                (None, Some(f)) => Some(f),
                (None, None) => None,
            };
            match last_activity {
                Some(at) => at > cutoff,
                None => true,
            }
        });
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(policy: FreshnessPolicy, last_meta: Option<Meta>, cached: bool, now: u64) -> ValidatorContext {
        ValidatorContext {
            policy,
            last_meta,
            cached_value_present: cached,
            now: Instant(now),
        }
    }

    #[test]
    fn min_age_skips_within_window() {
        let meta = Meta {
            last_success_at: Some(Instant(1_000)),
            ..Default::default()
        };
        let c = ctx(FreshnessPolicy::MinAge(Duration::from_secs(5)), Some(meta), true, 2_000);
        assert_eq!(Validator::plan(&c), FetchPlan::Skip);
    }

    #[test]
    fn min_age_fetches_when_stale() {
        let meta = Meta {
            last_success_at: Some(Instant(1_000)),
            ..Default::default()
        };
        let c = ctx(FreshnessPolicy::MinAge(Duration::from_secs(1)), Some(meta), true, 10_000);
        assert_eq!(c_kind(&Validator::plan(&c)), "unconditional");
    }

    #[test]
    fn must_be_fresh_always_unconditional() {
        let c = ctx(FreshnessPolicy::MustBeFresh, None, true, 0);
        assert_eq!(Validator::plan(&c), FetchPlan::Unconditional);
    }

    #[test]
    fn cached_or_fetch_without_cache_is_unconditional() {
        let c = ctx(FreshnessPolicy::CachedOrFetch, None, false, 0);
        assert_eq!(Validator::plan(&c), FetchPlan::Unconditional);
    }

    #[test]
    fn conditional_when_etag_present() {
        let meta = Meta {
            last_success_at: Some(Instant(1)),
            etag: Some("E0".into()),
            ..Default::default()
        };
        let c = ctx(FreshnessPolicy::CachedOrFetch, Some(meta), true, 5);
        assert!(matches!(Validator::plan(&c), FetchPlan::Conditional { .. }));
    }

    fn c_kind(p: &FetchPlan) -> &'static str {
        match p {
            FetchPlan::Skip => "skip",
            FetchPlan::Conditional { .. } => "conditional",
            FetchPlan::Unconditional => "unconditional",
        }
    }

    #[test]
    fn bookkeeper_records_success_then_failure() {
        let bk = Bookkeeper::<u32>::new();
        bk.record_success(&1, Instant(10), Some("E1".into()));
        let m = bk.get(&1).unwrap();
        assert_eq!(m.last_success_at, Some(Instant(10)));
        assert_eq!(m.etag.as_deref(), Some("E1"));

        bk.record_failure(&1, Instant(20), StorexError::NotFound);
        let m = bk.get(&1).unwrap();
        assert_eq!(m.last_failure_at, Some(Instant(20)));
        // success metadata (etag) is preserved across a later failure.
        assert_eq!(m.etag.as_deref(), Some("E1"));
    }

    #[test]
    fn sweep_older_than_drops_stale_entries_only() {
        let bk = Bookkeeper::<u32>::new();
        bk.record_success(&1, Instant(10), None);
        bk.record_success(&2, Instant(1_000), None);
        let dropped = bk.sweep_older_than(Instant(500));
        assert_eq!(dropped, 1);
        assert!(bk.get(&1).is_none());
        assert!(bk.get(&2).is_some());
    }

    #[test]
    fn sweep_older_than_keeps_entries_without_recorded_activity() {
        let bk = Bookkeeper::<u32>::new();
        // force an entry to exist with no success/failure recorded yet.
        bk.entries.entry(1).or_default();
        assert_eq!(bk.sweep_older_than(Instant(u64::MAX)), 0);
        assert!(bk.get(&1).is_some());
    }
}
