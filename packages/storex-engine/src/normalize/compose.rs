//! BFS graph composition (spec §4.8): walks outbound references from a root
//! entity up to a shape's depth limit, denormalizes through the registry, and
//! aggregates freshness metadata across every entity that contributed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use storex_core::changeset::RootRef;
use storex_core::contracts::NormalizationBackend;
use storex_core::hash::{combine_hashes, fnv1a_hash_bytes};
use storex_core::key::EntityKey;
use storex_core::model::{FieldScopedShape, Record, Shape};
use storex_core::schema::{DenormalizeContext, SchemaRegistry};
use storex_core::{Instant, StorexError};

use crate::metrics::{Outcome, StoreMetrics};

/// Shape abstraction [`compose_from_root`] walks: either the default
/// all-references [`Shape`] or a [`FieldScopedShape`] restricted to named fields.
pub trait ComposeShape: Send + Sync {
    /// Maximum BFS depth from the root (root itself is depth 0).
    fn max_depth(&self) -> u32;
    /// The outbound references to traverse from `record`.
    fn outbound_refs(&self, record: &Record) -> Vec<EntityKey>;
}

impl ComposeShape for Shape {
    fn max_depth(&self) -> u32 {
        self.max_depth
    }

    fn outbound_refs(&self, record: &Record) -> Vec<EntityKey> {
        Shape::outbound_refs(record)
    }
}

impl ComposeShape for FieldScopedShape {
    fn max_depth(&self) -> u32 {
        self.max_depth
    }

    fn outbound_refs(&self, record: &Record) -> Vec<EntityKey> {
        FieldScopedShape::outbound_refs(self, record)
    }
}

/// Aggregated freshness metadata across every entity a composition included.
#[derive(Debug, Clone, Default)]
pub struct CompositionMeta {
    /// The oldest `updated_at` across every included entity.
    pub updated_at: Option<Instant>,
    /// A fingerprint of every non-null ETag observed, order-insensitive; `None` if none were present.
    pub etag_fingerprint: Option<u64>,
}

/// The result of one successful (possibly partial) composition.
pub struct CompositionResult<E> {
    /// The denormalized entity graph, rooted at `E`.
    pub value: E,
    /// Every entity key this composition actually read, root included — the
    /// dependency set recorded against `root_ref` via
    /// [`NormalizationBackend::update_root_dependencies`].
    pub dependencies: BTreeSet<EntityKey>,
    /// Aggregated freshness metadata.
    pub meta: CompositionMeta,
    /// Entities that failed to read during BFS; composition proceeded with partial data.
    pub failures: Vec<(EntityKey, Arc<str>)>,
}

/// Walk the reference graph from `root` per spec §4.8's BFS algorithm,
/// denormalize the result through `registry`, and atomically record the
/// dependency set under `root_ref`.
pub async fn compose_from_root<E: 'static>(
    root: &EntityKey,
    root_ref: RootRef,
    shape: &dyn ComposeShape,
    registry: &SchemaRegistry,
    backend: &dyn NormalizationBackend,
    batch_size: usize,
    metrics: &dyn StoreMetrics,
) -> Result<CompositionResult<E>, StorexError> {
    let root_set: BTreeSet<EntityKey> = [root.clone()].into_iter().collect();
    let root_read = backend.read(&root_set).await;
    let root_record = match root_read.get(root).cloned().flatten() {
        Some(record) => record,
        None => {
            metrics.record_composition(0, Outcome::Failure);
            return Err(StorexError::GraphComposition {
                root: root.clone(),
                missing: vec![root.clone()],
                causes: vec![(root.clone(), "root record not found".into())],
            });
        }
    };

    let mut visited: BTreeSet<EntityKey> = root_set;
    let mut records: BTreeMap<EntityKey, Record> = BTreeMap::new();
    records.insert(root.clone(), root_record.clone());
    let mut failures: Vec<(EntityKey, Arc<str>)> = Vec::new();

    let mut frontier: Vec<EntityKey> = shape.outbound_refs(&root_record);
    let mut depth = 1u32;

    while !frontier.is_empty() && depth <= shape.max_depth() {
        frontier.retain(|k| !visited.contains(k));
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier: Vec<EntityKey> = Vec::new();
        for batch in frontier.chunks(batch_size) {
            let batch_set: BTreeSet<EntityKey> = batch.iter().cloned().collect();
            let read = backend.read(&batch_set).await;
            visited.extend(batch_set.iter().cloned());
            for (key, maybe_record) in read {
                match maybe_record {
                    Some(record) => {
                        next_frontier.extend(shape.outbound_refs(&record));
                        records.insert(key, record);
                    }
                    None => failures.push((key, "entity not found".into())),
                }
            }
        }
        frontier = next_frontier;
        depth += 1;
    }

    // One additional bulk resolution pass for references that fell outside
    // the BFS frontier (beyond max_depth): this is the "fetch lazily" half of
    // `resolve_reference`, done eagerly in bulk since `DenormalizeContext` is
    // synchronous and can't itself await the backend.
    let overflow: Vec<EntityKey> = records
        .values()
        .flat_map(|r| shape.outbound_refs(r))
        .filter(|k| !visited.contains(k))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    for batch in overflow.chunks(batch_size) {
        let batch_set: BTreeSet<EntityKey> = batch.iter().cloned().collect();
        let read = backend.read(&batch_set).await;
        visited.extend(batch_set.iter().cloned());
        for (key, maybe_record) in read {
            match maybe_record {
                Some(record) => {
                    records.insert(key, record);
                }
                None => failures.push((key, "entity not found".into())),
            }
        }
    }

    let meta_map = backend.read_meta(&visited).await;
    let mut updated_at: Option<Instant> = None;
    let mut etags: Vec<Arc<str>> = Vec::new();
    for meta in meta_map.values().flatten() {
        updated_at = Some(updated_at.map_or(meta.updated_at, |current| current.min(meta.updated_at)));
        if let Some(etag) = &meta.etag {
            etags.push(etag.clone());
        }
    }
    etags.sort();
    let etag_fingerprint = if etags.is_empty() {
        None
    } else {
        Some(combine_hashes(&etags.iter().map(|e| fnv1a_hash_bytes(e.as_bytes())).collect::<Vec<_>>()))
    };

    let adapter = match registry.get::<E>(root.type_name.as_ref()) {
        Some(adapter) => adapter,
        None => {
            metrics.record_composition(depth.saturating_sub(1), Outcome::Failure);
            return Err(StorexError::GraphComposition {
                root: root.clone(),
                missing: vec![],
                causes: vec![(root.clone(), "no adapter registered for root type".into())],
            });
        }
    };

    let mut ctx = MapDenormalizeContext { records: &records };
    let value = adapter.denormalize(&root_record, &mut ctx);

    backend.update_root_dependencies(root_ref, visited.clone()).await;

    metrics.record_composition(depth.saturating_sub(1), Outcome::Success);

    Ok(CompositionResult {
        value,
        dependencies: visited,
        meta: CompositionMeta { updated_at, etag_fingerprint },
        failures,
    })
}

struct MapDenormalizeContext<'a> {
    records: &'a BTreeMap<EntityKey, Record>,
}

impl DenormalizeContext for MapDenormalizeContext<'_> {
    fn resolve_reference(&mut self, key: &EntityKey) -> Option<Record> {
        self.records.get(key).cloned()
    }
}
