//! storex-engine -- the concurrent runtime that wires `storex-core`'s
//! contracts into the four hard subsystems: the read-path store coordinator,
//! the write-path mutation engine, the normalization engine, and the
//! pagination engine.
//!
//! - **Config** ([`config`]): tunable defaults (memory/lock bounds, BFS batch size, timeouts)
//! - **Memory** ([`memory`]): the bounded, strict-LRU in-process cache
//! - **Locks** ([`locks`]): the bounded per-key lock table
//! - **Single-flight** ([`single_flight`]): concurrent-work de-duplication per key
//! - **Freshness** ([`freshness`]): the freshness validator and bookkeeper
//! - **Offline** ([`offline`]): the durable, ordered offline mutation queue
//! - **Metrics** ([`metrics`]): the observability surface recorded into at every suspension point
//! - **Store** ([`store`]): the read-path coordinator (spec §4.6)
//! - **Mutation** ([`mutation`]): the write-path engine (spec §4.7)
//! - **Normalize** ([`normalize`]): the normalization backend, BFS composition, and index manager (spec §4.8)
//! - **Paging** ([`paging`]): the pagination engine (spec §4.9)
//! - **GC** ([`gc`]): the background sweep of idle lock-table/bookkeeper entries
//! - **Runtime** ([`runtime`]): the `StorexRuntime` service-lifecycle handle (spec §4.11)

pub mod config;
pub mod freshness;
pub mod gc;
pub mod locks;
pub mod memory;
pub mod metrics;
pub mod mutation;
pub mod normalize;
pub mod offline;
pub mod paging;
pub mod runtime;
pub mod single_flight;
pub mod store;

pub use config::EngineConfig;
pub use freshness::{Bookkeeper, FetchPlan, FreshnessPolicy, Validator, ValidatorContext};
pub use locks::LockTable;
pub use memory::MemoryCache;
pub use metrics::{NoopMetrics, Outcome, RecordingMetrics, StoreMetrics};
pub use mutation::{
    CreatePolicy, CreateResult, DeletePolicy, DeleteResult, MutationEngine, MutationOutcome, MutationPolicy,
    ReplacePolicy, ReplaceResult, UpdatePolicy, UpdateResult, UpsertPolicy, UpsertResult,
};
pub use normalize::{compose_from_root, ComposeShape, CompositionMeta, CompositionResult, IndexManager, InMemoryBackend, MembershipChange};
pub use offline::{OfflineQueue, QueuedMutation, ReplayFn};
pub use paging::{LoadState, LoadStates, Page, PageStore, PagingConfig, PagingEvent};
pub use runtime::{Managed, StorexRuntime};
pub use single_flight::SingleFlight;
pub use store::{AsKeyView, Origin, Store, StoreResult};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
