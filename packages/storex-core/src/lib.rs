//! storex-core -- keys, clocks, the normalized data model, and the
//! external-collaborator contracts for the storex reactive cache/sync engine.
//!
//! This crate has no tokio dependency beyond `async-trait` method signatures:
//! it is the foundation layer shared by every concrete implementation
//! (persistence, fetcher, normalization backend) as well as by
//! `storex-engine`, the concurrent runtime that wires them together.
//!
//! - **Key** ([`key`]): namespaced request keys and normalized entity keys
//! - **Clock** ([`clock`]): a swappable monotonic time source
//! - **Meta** ([`meta`]): freshness and entity metadata
//! - **Model** ([`model`]): the normalized record/value/shape data model
//! - **Schema** ([`schema`]): per-type entity adapters and the schema registry
//! - **Change-set** ([`changeset`]): transactional normalized-store mutations
//! - **Contracts** ([`contracts`]): fetcher, persistence, converter, and
//!   normalization-backend traits
//! - **Error** ([`error`]): the crate-wide error taxonomy

pub mod changeset;
pub mod clock;
pub mod contracts;
pub mod error;
pub mod hash;
pub mod key;
pub mod meta;
pub mod model;
pub mod schema;

pub use changeset::{ChangeSet, RootRef};
pub use clock::{ClockSource, FakeClock, Instant, SystemClock};
pub use contracts::{
    BoxStream, Converter, DynFetcher, FetchRequest, Fetcher, FetcherOutcome, MutationAdapter, NetOut,
    NormalizationBackend, Persistence, PersistenceReader, PersistenceWriter, Precondition, RemoteMutator,
    RemoteOutcome,
};
pub use error::StorexError;
pub use key::{CustomKey, EntityId, EntityKey, Key};
pub use meta::{ETag, EntityMeta, Meta};
pub use model::{FieldName, NormalizedValue, Record, Scalar, Shape};
pub use schema::{DenormalizeContext, EntityAdapter, NormalizeContext, SchemaRegistry};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
