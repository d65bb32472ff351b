//! Tunable configuration (AMBIENT, SPEC_FULL §2), mirroring the teacher's
//! `ServerConfig` builder-with-`Default` shape.

use std::time::Duration;

/// Every tunable the spec names explicitly, with the defaults the spec
/// states (`max_locks = 1000`, BFS batch size `256`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of entries held in the memory cache.
    pub max_memory_entries: usize,
    /// Maximum number of distinct per-key locks retained.
    pub max_locks: usize,
    /// Default BFS traversal depth for graph composition when a shape doesn't override it.
    pub default_max_depth: u32,
    /// Batch size for normalization-backend reads during BFS composition.
    pub composition_batch_size: usize,
    /// Default timeout applied to public operations when a policy doesn't override it.
    pub default_timeout: Duration,
    /// Default page size for pagination loads.
    pub default_page_size: usize,
    /// Default prefetch distance for pagination (items remaining before triggering a load-ahead).
    pub default_prefetch_distance: usize,
    /// Default maximum in-memory item count retained per pagination key before windowing trims.
    pub default_max_size_items: usize,
    /// Default page time-to-live for the `CachedOrFetch` pagination freshness path.
    pub default_page_ttl: Duration,
    /// Interval between background garbage-collection sweeps of idle bookkeeper/lock entries.
    pub gc_interval: Duration,
    /// Age beyond which a bookkeeper entry with no further activity is swept by GC.
    pub gc_entry_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memory_entries: 500,
            max_locks: crate::locks::DEFAULT_MAX_LOCKS,
            default_max_depth: 3,
            composition_batch_size: 256,
            default_timeout: Duration::from_secs(30),
            default_page_size: 20,
            default_prefetch_distance: 5,
            default_max_size_items: 200,
            default_page_ttl: Duration::from_secs(60),
            gc_interval: Duration::from_secs(300),
            gc_entry_ttl: Duration::from_secs(3600),
        }
    }
}
