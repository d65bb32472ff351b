//! Freshness and entity metadata.

use std::sync::Arc;

use crate::clock::Instant;
use crate::error::StorexError;

/// An HTTP-style entity tag, opaque to the engine.
pub type ETag = Arc<str>;

/// Per-key freshness bookkeeping, the sole authority for freshness decisions.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    /// When the last successful fetch committed.
    pub last_success_at: Option<Instant>,
    /// When the last fetch failed.
    pub last_failure_at: Option<Instant>,
    /// The ETag observed on the last successful (or not-modified) fetch.
    pub etag: Option<ETag>,
    /// The error from the last failed fetch.
    pub last_error: Option<Arc<StorexError>>,
}

/// Per-entity metadata tracked by the normalization backend.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EntityMeta {
    /// ETag of the entity, if the source provided one.
    pub etag: Option<ETag>,
    /// When this entity was last written.
    pub updated_at: Instant,
    /// Whether this entity has been deleted (metadata survives as a tombstone).
    pub tombstone: bool,
}

impl EntityMeta {
    /// A freshly-written, non-tombstoned entity's metadata.
    #[must_use]
    pub fn fresh(at: Instant, etag: Option<ETag>) -> Self {
        Self {
            etag,
            updated_at: at,
            tombstone: false,
        }
    }
}
