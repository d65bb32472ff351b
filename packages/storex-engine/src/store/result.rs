//! The reactive result types emitted by [`super::Store::stream`].

use storex_core::StorexError;

/// Where an emitted [`StoreResult::Data`] value was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Served from the in-process memory cache.
    Memory,
    /// Forwarded from a persistence-reader emission.
    Persisted,
    /// Not used directly as an origin tag (network responses are always
    /// written to persistence first — see spec §3's no-cache-only-emissions
    /// invariant); retained so callers can match exhaustively against the
    /// spec's `Memory | Persisted | Network` closed set.
    Network,
}

/// One reactive emission from [`super::Store::stream`].
#[derive(Debug, Clone)]
pub enum StoreResult<V> {
    /// No value available yet (or a background refresh is about to start).
    Loading {
        /// Whether a cached value exists and will be served once available.
        from_cache: bool,
    },
    /// A value is available.
    Data {
        /// The domain value.
        value: V,
        /// Where it came from.
        origin: Origin,
        /// Whether this value is known-stale (only ever `true` under
        /// `StaleIfError` after a failed background refresh).
        stale: bool,
    },
    /// A terminal or transient error.
    Error {
        /// The underlying cause.
        cause: StorexError,
        /// The last known-good cached value, if any, for fallback UI.
        cached_value: Option<V>,
    },
}

impl<V> StoreResult<V> {
    /// Build a fresh (non-stale) `Data` result.
    #[must_use]
    pub fn data(value: V, origin: Origin) -> Self {
        StoreResult::Data { value, origin, stale: false }
    }

    /// Build a stale `Data` result.
    #[must_use]
    pub fn stale_data(value: V, origin: Origin) -> Self {
        StoreResult::Data { value, origin, stale: true }
    }
}
