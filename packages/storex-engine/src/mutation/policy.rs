//! Write policies and results (spec §4.7).

use std::time::Duration;

use storex_core::{ETag, Instant, StorexError};

/// A precondition attached to a remote write.
#[derive(Debug, Clone)]
pub enum Precondition {
    /// Succeed only if the remote's current ETag matches.
    IfEtag(ETag),
    /// Succeed only if the remote hasn't changed since this instant.
    IfUnmodifiedSince(Instant),
}

/// Shared policy fields across every mutation operation.
#[derive(Debug, Clone)]
pub struct MutationPolicy {
    /// If `true`, a failed dispatch is never enqueued: it surfaces directly.
    pub require_online: bool,
    /// An optional precondition forwarded to the remote.
    pub precondition: Option<Precondition>,
    /// Whether to apply an optimistic local write before the remote dispatch completes.
    pub optimistic: bool,
    /// Timeout applied to the whole operation.
    pub timeout: Duration,
}

impl Default for MutationPolicy {
    fn default() -> Self {
        Self {
            require_online: false,
            precondition: None,
            optimistic: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Policy for [`crate::mutation::MutationEngine::update`].
pub type UpdatePolicy = MutationPolicy;
/// Policy for [`crate::mutation::MutationEngine::create`].
pub type CreatePolicy = MutationPolicy;
/// Policy for [`crate::mutation::MutationEngine::delete`].
pub type DeletePolicy = MutationPolicy;
/// Policy for [`crate::mutation::MutationEngine::upsert`].
pub type UpsertPolicy = MutationPolicy;
/// Policy for [`crate::mutation::MutationEngine::replace`].
pub type ReplacePolicy = MutationPolicy;

/// The outcome of a mutation operation.
#[derive(Debug, Clone)]
pub enum MutationOutcome<T> {
    /// The remote accepted the mutation; `T` carries operation-specific data (e.g. the canonical key for `create`).
    Synced(T),
    /// The remote was unreachable (and `require_online` was false); the mutation was appended to the offline queue.
    Enqueued,
    /// The mutation failed and was rolled back (or could not be enqueued).
    Failed {
        /// The underlying cause.
        cause: StorexError,
    },
}

/// Result of [`crate::mutation::MutationEngine::update`].
pub type UpdateResult = MutationOutcome<()>;
/// Result of [`crate::mutation::MutationEngine::create`]: `Synced`/`Enqueued` carry the (canonical, once known) key.
pub type CreateResult<K> = MutationOutcome<K>;
/// Result of [`crate::mutation::MutationEngine::delete`].
pub type DeleteResult = MutationOutcome<()>;
/// Result of [`crate::mutation::MutationEngine::upsert`].
pub type UpsertResult = MutationOutcome<()>;
/// Result of [`crate::mutation::MutationEngine::replace`].
pub type ReplaceResult = MutationOutcome<()>;
