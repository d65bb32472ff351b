//! In-memory normalization backend (spec §4.8, §9 "manual reference graph"
//! redesign): an arena of flat records keyed by `EntityKey`, with
//! root-dependency bookkeeping and hot invalidation streams. This is the
//! reference implementation used by tests and as the default when no
//! persistence-backed backend is supplied.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use storex_core::changeset::{ChangeSet, RootRef};
use storex_core::contracts::{BoxStream, NormalizationBackend};
use storex_core::key::EntityKey;
use storex_core::meta::EntityMeta;
use storex_core::model::Record;
use storex_core::{Instant, StorexError};

const INVALIDATION_CHANNEL_CAPACITY: usize = 1024;

/// An in-memory arena of normalized records.
pub struct InMemoryBackend {
    records: DashMap<EntityKey, Record>,
    meta: DashMap<EntityKey, EntityMeta>,
    dependencies: DashMap<RootRef, BTreeSet<EntityKey>>,
    entity_tx: broadcast::Sender<BTreeSet<EntityKey>>,
    root_tx: broadcast::Sender<BTreeSet<RootRef>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// An empty backend.
    #[must_use]
    pub fn new() -> Self {
        let (entity_tx, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        let (root_tx, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            meta: DashMap::new(),
            dependencies: DashMap::new(),
            entity_tx,
            root_tx,
        }
    }

    fn roots_depending_on(&self, touched: &BTreeSet<EntityKey>) -> BTreeSet<RootRef> {
        self.dependencies
            .iter()
            .filter(|entry| entry.value().iter().any(|k| touched.contains(k)))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[async_trait]
impl NormalizationBackend for InMemoryBackend {
    async fn read(&self, keys: &BTreeSet<EntityKey>) -> BTreeMap<EntityKey, Option<Record>> {
        keys.iter().map(|k| (k.clone(), self.records.get(k).map(|r| r.clone()))).collect()
    }

    async fn read_meta(&self, keys: &BTreeSet<EntityKey>) -> BTreeMap<EntityKey, Option<EntityMeta>> {
        keys.iter().map(|k| (k.clone(), self.meta.get(k).map(|m| m.clone()))).collect()
    }

    async fn apply(&self, change_set: ChangeSet) -> Result<(), StorexError> {
        // Record whatever freshness metadata the caller reports first, then
        // let the delete-wins tombstone override it below.
        for (key, meta) in &change_set.meta {
            self.meta.insert(key.clone(), meta.clone());
        }

        for key in &change_set.deletes {
            self.records.remove(key);
            self.meta.entry(key.clone()).or_insert_with(|| EntityMeta::fresh(Instant::ZERO, None)).tombstone = true;
        }

        for (key, record) in &change_set.upserts {
            if change_set.deletes.contains(key) {
                continue;
            }
            match change_set.field_masks.get(key) {
                Some(mask) if !mask.is_empty() => {
                    let mut existing = self.records.entry(key.clone()).or_insert_with(Record::new);
                    existing.patch(record.clone(), mask);
                }
                _ => {
                    self.records.insert(key.clone(), record.clone());
                }
            }
        }

        for (old, new) in &change_set.rekeys {
            if let Some((_, record)) = self.records.remove(old) {
                self.records.insert(new.clone(), record);
            }
            if let Some((_, meta)) = self.meta.remove(old) {
                self.meta.insert(new.clone(), meta);
            }
            for mut entry in self.records.iter_mut() {
                entry.value_mut().rewrite_refs(old, new);
            }
        }

        let touched = change_set.touched_keys();
        if !touched.is_empty() {
            let _ = self.entity_tx.send(touched.clone());
            let roots = self.roots_depending_on(&touched);
            if !roots.is_empty() {
                let _ = self.root_tx.send(roots);
            }
        }

        Ok(())
    }

    async fn update_root_dependencies(&self, root: RootRef, dependencies: BTreeSet<EntityKey>) {
        self.dependencies.insert(root, dependencies);
    }

    fn entity_invalidations(&self) -> BoxStream<'static, BTreeSet<EntityKey>> {
        let stream = BroadcastStream::new(self.entity_tx.subscribe());
        Box::pin(stream.filter_map(|item| async move { item.ok() }))
    }

    fn root_invalidations(&self) -> BoxStream<'static, BTreeSet<RootRef>> {
        let stream = BroadcastStream::new(self.root_tx.subscribe());
        Box::pin(stream.filter_map(|item| async move { item.ok() }))
    }

    async fn clear(&self) {
        self.records.clear();
        self.meta.clear();
        self.dependencies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storex_core::model::{NormalizedValue, Scalar};

    fn rec(fields: Vec<(&str, NormalizedValue)>) -> Record {
        Record(fields.into_iter().map(|(k, v)| (std::sync::Arc::from(k), v)).collect())
    }

    #[tokio::test]
    async fn upsert_then_read_round_trips() {
        let backend = InMemoryBackend::new();
        let key = EntityKey::new("User", "1");
        let record = rec(vec![("name", NormalizedValue::Scalar(Scalar::String("Alice".into())))]);
        let change_set = ChangeSet::new().with_upsert(key.clone(), record.clone(), Default::default(), EntityMeta::fresh(Instant::ZERO, None));
        backend.apply(change_set).await.unwrap();

        let keys: BTreeSet<EntityKey> = [key.clone()].into_iter().collect();
        let read = backend.read(&keys).await;
        assert_eq!(read.get(&key).unwrap().as_ref(), Some(&record));
    }

    #[tokio::test]
    async fn masked_upsert_preserves_untouched_fields() {
        let backend = InMemoryBackend::new();
        let key = EntityKey::new("User", "1");
        let full = rec(vec![
            ("name", NormalizedValue::Scalar(Scalar::String("Alice".into()))),
            ("age", NormalizedValue::Scalar(Scalar::Int(30))),
        ]);
        backend
            .apply(ChangeSet::new().with_upsert(key.clone(), full, Default::default(), EntityMeta::fresh(Instant::ZERO, None)))
            .await
            .unwrap();

        let patch = rec(vec![("age", NormalizedValue::Scalar(Scalar::Int(31)))]);
        let mask: BTreeSet<std::sync::Arc<str>> = ["age".into()].into_iter().collect();
        backend
            .apply(ChangeSet::new().with_upsert(key.clone(), patch, mask, EntityMeta::fresh(Instant(1), None)))
            .await
            .unwrap();

        let keys: BTreeSet<EntityKey> = [key.clone()].into_iter().collect();
        let read = backend.read(&keys).await;
        let record = read.get(&key).unwrap().as_ref().unwrap();
        assert_eq!(record.0[&std::sync::Arc::<str>::from("age")], NormalizedValue::Scalar(Scalar::Int(31)));
        assert_eq!(record.0[&std::sync::Arc::<str>::from("name")], NormalizedValue::Scalar(Scalar::String("Alice".into())));
    }

    #[tokio::test]
    async fn delete_wins_over_upsert_in_same_change_set() {
        let backend = InMemoryBackend::new();
        let key = EntityKey::new("User", "1");
        let record = rec(vec![("name", NormalizedValue::Scalar(Scalar::String("Alice".into())))]);
        let change_set = ChangeSet::new()
            .with_upsert(key.clone(), record, Default::default(), EntityMeta::fresh(Instant::ZERO, None))
            .with_delete(key.clone());
        backend.apply(change_set).await.unwrap();

        let keys: BTreeSet<EntityKey> = [key.clone()].into_iter().collect();
        let read = backend.read(&keys).await;
        assert!(read.get(&key).unwrap().is_none());
        let meta = backend.read_meta(&keys).await;
        assert!(meta.get(&key).unwrap().as_ref().unwrap().tombstone);
    }

    #[tokio::test]
    async fn rekey_migrates_record_and_rewrites_references() {
        let backend = InMemoryBackend::new();
        let old_key = EntityKey::new("User", "prov-1");
        let new_key = EntityKey::new("User", "42");
        let post_key = EntityKey::new("Post", "1");

        let user_record = rec(vec![("name", NormalizedValue::Scalar(Scalar::String("Carol".into())))]);
        let post_record = rec(vec![("author", NormalizedValue::Ref(old_key.clone()))]);

        let change_set = ChangeSet::new()
            .with_upsert(old_key.clone(), user_record, Default::default(), EntityMeta::fresh(Instant::ZERO, None))
            .with_upsert(post_key.clone(), post_record, Default::default(), EntityMeta::fresh(Instant::ZERO, None));
        backend.apply(change_set).await.unwrap();

        backend.apply(ChangeSet::new().with_rekey(old_key.clone(), new_key.clone())).await.unwrap();

        let keys: BTreeSet<EntityKey> = [old_key.clone(), new_key.clone(), post_key.clone()].into_iter().collect();
        let read = backend.read(&keys).await;
        assert!(read.get(&old_key).unwrap().is_none());
        assert!(read.get(&new_key).unwrap().is_some());
        let post = read.get(&post_key).unwrap().as_ref().unwrap();
        assert_eq!(post.0[&std::sync::Arc::<str>::from("author")], NormalizedValue::Ref(new_key));
    }

    #[tokio::test]
    async fn root_invalidation_fires_only_for_dependent_roots() {
        let backend = InMemoryBackend::new();
        let key = EntityKey::new("User", "1");
        let unrelated_key = EntityKey::new("User", "2");
        let root = RootRef::new(&storex_core::Key::by_identity("users", "User", "1"), "detail");
        backend.update_root_dependencies(root.clone(), [key.clone()].into_iter().collect()).await;

        let mut roots = backend.root_invalidations();
        let record = rec(vec![("name", NormalizedValue::Scalar(Scalar::String("Alice".into())))]);
        backend
            .apply(ChangeSet::new().with_upsert(unrelated_key, record.clone(), Default::default(), EntityMeta::fresh(Instant::ZERO, None)))
            .await
            .unwrap();
        backend
            .apply(ChangeSet::new().with_upsert(key, record, Default::default(), EntityMeta::fresh(Instant::ZERO, None)))
            .await
            .unwrap();

        let fired = roots.next().await.expect("root invalidation for the dependent key");
        assert!(fired.contains(&root));
    }
}
