//! Crate-wide error taxonomy.
//!
//! Every public fallible operation in `storex-engine` returns (or converts
//! into) [`StorexError`]. Subsystems define narrower error enums where useful
//! (composition, pagination) and convert into this one at the API boundary.

use std::sync::Arc;

use crate::key::EntityKey;

/// The observable error taxonomy from the spec's error-handling design.
///
/// Cancellation is deliberately *not* a variant here: it propagates as a
/// dropped future / aborted task, never as an `Err` a caller matches on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorexError {
    /// No value exists for the requested key.
    #[error("not found")]
    NotFound,

    /// A caller-supplied precondition (`IfEtag`/`IfUnmodifiedSince`) was rejected by the remote.
    #[error("precondition failed")]
    PreconditionFailed,

    /// The operation required network connectivity but none was available, and no offline queue accepted it.
    #[error("operation requires connectivity")]
    OfflineRequired,

    /// The operation's timeout elapsed before it completed.
    #[error("operation timed out")]
    Timeout,

    /// The remote rejected the write due to a conflicting concurrent change.
    #[error("conflict")]
    Conflict,

    /// The fetcher failed.
    #[error("network error: {cause}")]
    Network {
        /// Human-readable cause, supplied by the fetcher implementation.
        cause: Arc<str>,
    },

    /// The persistence (source of truth) layer failed.
    #[error("persistence error: {cause}")]
    Persistence {
        /// Human-readable cause, supplied by the persistence implementation.
        cause: Arc<str>,
    },

    /// Graph composition failed fatally (root missing, or root denormalization failed).
    #[error("graph composition error at root {root:?}: {missing:?} missing")]
    GraphComposition {
        /// The root entity key composition started from.
        root: EntityKey,
        /// Entity keys that could not be read.
        missing: Vec<EntityKey>,
        /// Human-readable causes keyed by the entity that failed to read.
        causes: Vec<(EntityKey, Arc<str>)>,
    },
}

impl StorexError {
    /// Build a [`StorexError::Network`] from any displayable cause.
    pub fn network(cause: impl std::fmt::Display) -> Self {
        Self::Network {
            cause: cause.to_string().into(),
        }
    }

    /// Build a [`StorexError::Persistence`] from any displayable cause.
    pub fn persistence(cause: impl std::fmt::Display) -> Self {
        Self::Persistence {
            cause: cause.to_string().into(),
        }
    }
}
