//! External-collaborator contracts (spec §6): the fetcher, the persistence
//! ("source of truth") layer, the converter, and the normalization backend.
//! `storex-engine` depends only on these traits, never on a concrete
//! backend — the same seam the teacher draws around `ServerStorage`/
//! `MapProvider`/`SchemaProvider`.

use std::collections::{BTreeMap, BTreeSet};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::clock::Instant;
use crate::error::StorexError;
use crate::key::EntityKey;
use crate::meta::{ETag, EntityMeta};
use crate::model::Record;

/// A boxed, owned stream — the concrete shape of the spec's "LazySequence".
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// A network payload produced by a successful fetch.
#[derive(Debug, Clone)]
pub struct NetOut<B> {
    /// The response body.
    pub body: B,
    /// The response ETag, if the transport provided one.
    pub etag: Option<ETag>,
}

/// Conditional-request fields a [`Fetcher`] may attach to a request.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// Serve only if the resource's ETag differs from this.
    pub if_none_match: Option<ETag>,
    /// Serve only if the resource changed since this instant.
    pub if_modified_since: Option<Instant>,
}

/// The outcome of one fetch attempt.
#[derive(Debug, Clone)]
pub enum FetcherOutcome<B> {
    /// The fetch succeeded with a new body.
    Success {
        /// The response body.
        body: B,
        /// The response ETag, if any.
        etag: Option<ETag>,
    },
    /// The resource is unchanged since the conditional request's precondition.
    NotModified {
        /// The (still-valid) ETag.
        etag: ETag,
    },
    /// The fetch failed.
    Error {
        /// The underlying cause.
        cause: StorexError,
    },
}

/// Remote data source contract. Implementations are supplied by the consumer
/// (an HTTP/GraphQL client, typically); the engine only ever calls this trait.
#[async_trait]
pub trait Fetcher<K, B>: Send + Sync {
    /// Fetch `key`, honoring any conditional fields in `request`.
    ///
    /// The returned stream is finite — typically one element, but chunked/
    /// streaming fetchers may emit several [`FetcherOutcome::Success`]
    /// elements before completing.
    async fn fetch(&self, key: &K, request: FetchRequest) -> BoxStream<'static, FetcherOutcome<B>>;
}

/// Reactive reader half of the persistence ("source of truth") contract.
#[async_trait]
pub trait PersistenceReader<K, ReadDb>: Send + Sync {
    /// An infinite, restartable stream emitting on every committed change
    /// relevant to `key` (and once immediately with the current value).
    async fn reader(&self, key: &K) -> BoxStream<'static, Result<Option<ReadDb>, StorexError>>;
}

/// Transactional writer half of the persistence contract.
#[async_trait]
pub trait PersistenceWriter<K, WriteDb>: Send + Sync {
    /// Write `value` under `key`. Must be visible to [`PersistenceReader::reader`]
    /// before this call returns.
    async fn write(&self, key: &K, value: WriteDb) -> Result<(), StorexError>;

    /// Delete the record under `key`.
    async fn delete(&self, key: &K) -> Result<(), StorexError>;

    /// Atomically rename `old` to `new`, applying `reconcile` to combine the
    /// existing payload with any newly-arrived server echo. Implementations
    /// fronting a normalization backend must also migrate every reference to
    /// `old`.
    async fn rekey(
        &self,
        old: &K,
        new: &K,
        reconcile: Box<dyn FnOnce(Option<WriteDb>) -> WriteDb + Send>,
    ) -> Result<(), StorexError>;
}

/// Converts between network, persisted, and domain projections. All methods
/// are side-effect-free.
pub trait Converter<K, NetOutBody, ReadDb, WriteDb, V>: Send + Sync {
    /// Convert a successful network payload into the persisted-write projection.
    fn net_to_write(&self, key: &K, net: NetOut<NetOutBody>) -> WriteDb;
    /// Convert a persisted-read projection into the domain value.
    fn read_to_domain(&self, key: &K, read: &ReadDb) -> V;
    /// Extract freshness metadata from a persisted-read projection, if present.
    fn read_meta(&self, read: &ReadDb) -> Option<crate::meta::Meta>;
    /// Extract freshness metadata from a network payload.
    fn net_meta(&self, net: &NetOut<NetOutBody>) -> crate::meta::Meta;
    /// Optimistically convert a domain value + patch into a persisted-write
    /// projection, when the mutation engine can compute one locally without a
    /// round-trip. `None` means no optimistic projection is available.
    fn domain_to_write(&self, _key: &K, _value: &V) -> Option<WriteDb> {
        None
    }
}

/// The normalization backend contract (spec §6): a flat entity store plus
/// root-dependency bookkeeping and invalidation streams.
#[async_trait]
pub trait NormalizationBackend: Send + Sync {
    /// Batched read of entity records.
    async fn read(&self, keys: &BTreeSet<EntityKey>) -> BTreeMap<EntityKey, Option<Record>>;

    /// Batched read of entity metadata.
    async fn read_meta(&self, keys: &BTreeSet<EntityKey>) -> BTreeMap<EntityKey, Option<EntityMeta>>;

    /// Atomically apply a change-set (upserts/deletes/rekeys/masks/meta).
    async fn apply(&self, change_set: crate::changeset::ChangeSet) -> Result<(), StorexError>;

    /// Atomically record that `root` now depends on exactly `dependencies`.
    async fn update_root_dependencies(&self, root: crate::changeset::RootRef, dependencies: BTreeSet<EntityKey>);

    /// Hot stream of entity keys touched by any applied change-set.
    fn entity_invalidations(&self) -> BoxStream<'static, BTreeSet<EntityKey>>;

    /// Hot stream of root-refs whose dependencies were touched by an applied change-set.
    fn root_invalidations(&self) -> BoxStream<'static, BTreeSet<crate::changeset::RootRef>>;

    /// Drop all stored records, metadata, and dependency maps.
    async fn clear(&self);
}

/// Combined persistence contract: most consumers implement both halves on one type.
pub trait Persistence<K, ReadDb, WriteDb>:
    PersistenceReader<K, ReadDb> + PersistenceWriter<K, WriteDb>
{
}

impl<T, K, ReadDb, WriteDb> Persistence<K, ReadDb, WriteDb> for T where
    T: PersistenceReader<K, ReadDb> + PersistenceWriter<K, WriteDb>
{
}

/// A cheaply-cloneable, type-erased reference to any [`Fetcher`] implementation.
pub type DynFetcher<K, B> = Arc<dyn Fetcher<K, B>>;

/// A precondition attached to a remote write (spec §4.7 policies).
#[derive(Debug, Clone)]
pub enum Precondition {
    /// Succeed only if the remote's current ETag matches.
    IfEtag(ETag),
    /// Succeed only if the remote hasn't changed since this instant.
    IfUnmodifiedSince(Instant),
}

/// The outcome of one remote mutation dispatch.
#[derive(Debug, Clone)]
pub enum RemoteOutcome<T> {
    /// The remote accepted the write and echoed back canonical state.
    Success {
        /// The server's echo of the write (canonical value, possibly with server-assigned fields filled in).
        echo: T,
        /// The response ETag, if any.
        etag: Option<ETag>,
    },
    /// The remote rejected or failed the write.
    Error {
        /// The underlying cause.
        cause: StorexError,
    },
}

/// Remote write-dispatch contract: the write-path counterpart to [`Fetcher`].
/// Implementations are supplied by the consumer (an HTTP/GraphQL client,
/// typically); the mutation engine only ever calls this trait.
#[async_trait]
pub trait RemoteMutator<K, Patch, Draft, Echo>: Send + Sync {
    /// Dispatch a patch to the remote entity at `key`.
    async fn update(&self, key: &K, patch: Patch, precondition: Option<Precondition>) -> RemoteOutcome<Echo>;

    /// Dispatch a create. The remote assigns the canonical key.
    async fn create(&self, draft: Draft) -> RemoteOutcome<(K, Echo)>;

    /// Dispatch a delete.
    async fn delete(&self, key: &K, precondition: Option<Precondition>) -> RemoteOutcome<()>;

    /// Dispatch a full-value upsert.
    async fn upsert(&self, key: &K, value: Echo, precondition: Option<Precondition>) -> RemoteOutcome<Echo>;

    /// Dispatch a full-value replace.
    async fn replace(&self, key: &K, value: Echo, precondition: Option<Precondition>) -> RemoteOutcome<Echo>;
}

/// Projects between the mutation engine's extended surface (`Patch`, `Draft`,
/// server `Echo`) and the domain/persisted projections, the write-path
/// counterpart to [`Converter`]. All methods are side-effect-free.
pub trait MutationAdapter<K, Patch, Draft, Echo, ReadDb, WriteDb, V>: Send + Sync {
    /// Convert a persisted-read projection into the domain value, the same
    /// way [`Converter::read_to_domain`] does for the read path — needed so
    /// the mutation engine can compute an optimistic projection from the
    /// current persisted state without depending on the full `Converter`.
    fn read_to_domain(&self, key: &K, read: &ReadDb) -> V;

    /// Compute the optimistic domain value a patch would produce, given the
    /// current domain value (`None` if nothing is cached/persisted yet).
    fn apply_patch(&self, key: &K, current: Option<&V>, patch: &Patch) -> V;

    /// The optimistic domain value a draft represents, before the remote
    /// assigns any canonical fields.
    fn draft_to_domain(&self, draft: &Draft) -> V;

    /// Project a domain value into the persisted-write projection for an
    /// optimistic (or rollback) write. `None` means no optimistic projection
    /// is available and the caller should skip the local write.
    fn domain_to_write(&self, key: &K, value: &V) -> Option<WriteDb>;

    /// Project a server echo into the persisted-write projection, for the
    /// post-confirmation canonical write.
    fn echo_to_write(&self, key: &K, echo: &Echo) -> WriteDb;

    /// Project a server echo into the domain value the memory cache should hold.
    fn echo_to_domain(&self, key: &K, echo: &Echo) -> V;

    /// Project a full domain value into the server's echo shape, for
    /// dispatching `upsert`/`replace` (which send a complete value rather
    /// than a patch).
    fn domain_to_echo(&self, key: &K, value: &V) -> Echo;
}

/// Which direction a pagination load extends the window in (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    /// The first load for a key.
    Initial,
    /// Extends the window forward (toward `next`).
    Append,
    /// Extends the window backward (toward `prev`).
    Prepend,
}

/// One loaded page of items plus its continuation tokens in each direction.
#[derive(Debug, Clone)]
pub struct LoadedPage<Token, Item> {
    /// The items this page contains, in forward order.
    pub items: Vec<Item>,
    /// Token to pass to the next [`PageDirection::Prepend`] load, if any.
    pub prev: Option<Token>,
    /// Token to pass to the next [`PageDirection::Append`] load, if any.
    pub next: Option<Token>,
}

/// External pagination data source: supplies one page of items per load, the
/// write-path counterpart [`Fetcher`] plays for single-entity reads.
#[async_trait]
pub trait PageLoader<K, Token, Item>: Send + Sync {
    /// Load one page for `key` in `direction`, continuing from `from_token` if given.
    async fn load_page(
        &self,
        key: &K,
        direction: PageDirection,
        from_token: Option<Token>,
    ) -> Result<LoadedPage<Token, Item>, StorexError>;
}
