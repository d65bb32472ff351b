//! Index manager (spec §4.8 "Index manager"): maps a request key's stable
//! hash to its current membership — an ordered list of root entity keys —
//! emitting to subscribers whenever membership changes.

use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use storex_core::contracts::BoxStream;
use storex_core::key::EntityKey;

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// One membership change: the request key's stable hash and its new ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    /// The request key's stable hash whose membership changed.
    pub key_hash: u64,
    /// The new ordered list of root entity keys.
    pub members: Vec<EntityKey>,
}

/// Maps a request key's stable hash to its current ordered root-entity membership.
pub struct IndexManager {
    members: DashMap<u64, Vec<EntityKey>>,
    changes: broadcast::Sender<MembershipChange>,
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexManager {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            members: DashMap::new(),
            changes,
        }
    }

    /// Current membership for `key_hash`, if it was ever set.
    #[must_use]
    pub fn get(&self, key_hash: u64) -> Option<Vec<EntityKey>> {
        self.members.get(&key_hash).map(|v| v.clone())
    }

    /// Replace the membership list for `key_hash`, notifying subscribers only
    /// if the ordered list actually changed.
    pub fn set(&self, key_hash: u64, members: Vec<EntityKey>) {
        let changed = self.members.get(&key_hash).map(|existing| *existing != members).unwrap_or(true);
        self.members.insert(key_hash, members.clone());
        if changed {
            let _ = self.changes.send(MembershipChange { key_hash, members });
        }
    }

    /// Drop the membership entry for `key_hash`.
    pub fn invalidate(&self, key_hash: u64) {
        self.members.remove(&key_hash);
    }

    /// A hot stream of membership changes across every tracked key.
    pub fn changes(&self) -> BoxStream<'static, MembershipChange> {
        let stream = BroadcastStream::new(self.changes.subscribe());
        Box::pin(stream.filter_map(|item| async move { item.ok() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_idempotent_for_identical_membership() {
        let index = IndexManager::new();
        index.set(1, vec![EntityKey::new("User", "a")]);
        index.set(1, vec![EntityKey::new("User", "a")]);
        assert_eq!(index.get(1), Some(vec![EntityKey::new("User", "a")]));
    }

    #[tokio::test]
    async fn changes_emit_only_on_actual_membership_change() {
        let index = IndexManager::new();
        let mut changes = index.changes();

        index.set(1, vec![EntityKey::new("User", "a")]);
        let first = changes.next().await.unwrap();
        assert_eq!(first.members, vec![EntityKey::new("User", "a")]);

        // identical membership does not emit again; invalidate then reset does.
        index.set(1, vec![EntityKey::new("User", "a")]);
        index.invalidate(1);
        index.set(1, vec![EntityKey::new("User", "b")]);
        let second = changes.next().await.unwrap();
        assert_eq!(second.members, vec![EntityKey::new("User", "b")]);
    }
}
