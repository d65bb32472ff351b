//! Change-sets: transactional bundles of normalized-store mutations (spec §4.8).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::key::{EntityKey, Key};
use crate::meta::EntityMeta;
use crate::model::{FieldName, Record};

/// Identifies a unit of dependency tracking: a request key plus the shape
/// that composed it. Two different shapes over the same `K` track
/// independent dependency sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootRef {
    /// The request key's stable hash (cheaper to key dependency maps by than the full `Key`).
    pub key_hash: u64,
    /// The shape id used to compose this root.
    pub shape_id: Arc<str>,
}

impl RootRef {
    /// Build a root-ref from a request key and shape id.
    #[must_use]
    pub fn new(key: &Key, shape_id: impl Into<Arc<str>>) -> Self {
        Self {
            key_hash: key.stable_hash(),
            shape_id: shape_id.into(),
        }
    }
}

/// A transactional bundle of normalized-store mutations.
///
/// Apply order: deletes beat upserts on the same key within one change-set
/// ("Conflicting upsert + delete... delete wins"); rekeys apply in the given
/// order, each observing the effects of earlier ones.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Records to insert or patch.
    pub upserts: BTreeMap<EntityKey, Record>,
    /// Keys to delete (tombstone).
    pub deletes: BTreeSet<EntityKey>,
    /// Key renames to apply, in order.
    pub rekeys: Vec<(EntityKey, EntityKey)>,
    /// Field masks for upserts: empty or absent means "replace".
    pub field_masks: BTreeMap<EntityKey, BTreeSet<FieldName>>,
    /// Metadata to record for touched entities.
    pub meta: BTreeMap<EntityKey, EntityMeta>,
}

impl ChangeSet {
    /// An empty change-set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an upsert. `mask` is empty for "replace".
    #[must_use]
    pub fn with_upsert(mut self, key: EntityKey, record: Record, mask: BTreeSet<FieldName>, meta: EntityMeta) -> Self {
        if !mask.is_empty() {
            self.field_masks.insert(key.clone(), mask);
        }
        self.meta.insert(key.clone(), meta);
        self.upserts.insert(key, record);
        self
    }

    /// Queue a delete.
    #[must_use]
    pub fn with_delete(mut self, key: EntityKey) -> Self {
        self.deletes.insert(key);
        self
    }

    /// Queue a rekey.
    #[must_use]
    pub fn with_rekey(mut self, old: EntityKey, new: EntityKey) -> Self {
        self.rekeys.push((old, new));
        self
    }

    /// Every entity key this change-set touches, for dependency-invalidation fan-out.
    #[must_use]
    pub fn touched_keys(&self) -> BTreeSet<EntityKey> {
        let mut out: BTreeSet<EntityKey> = self.upserts.keys().cloned().collect();
        out.extend(self.deletes.iter().cloned());
        for (old, new) in &self.rekeys {
            out.insert(old.clone());
            out.insert(new.clone());
        }
        out
    }
}
