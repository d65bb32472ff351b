//! The normalized entity data model: flat records of [`NormalizedValue`]s
//! addressed by [`crate::key::EntityKey`], plus the schema adapter contract
//! used to extract/recompose entities (spec §4.8).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::key::EntityKey;

/// An opaque scalar leaf value stored in a normalized [`Record`].
///
/// The engine never interprets scalars; adapters decide their shape.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// A UTF-8 string.
    String(Arc<str>),
}

/// One field of a normalized record.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum NormalizedValue {
    /// A plain scalar leaf.
    Scalar(Scalar),
    /// A reference to exactly one other entity.
    Ref(EntityKey),
    /// An ordered list of references to other entities.
    RefList(Vec<EntityKey>),
    /// A list of scalar leaves.
    ScalarList(Vec<Scalar>),
}

/// A field name within a [`Record`].
pub type FieldName = Arc<str>;

/// A flat, normalized entity record.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record(pub BTreeMap<FieldName, NormalizedValue>);

impl Record {
    /// An empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entity key directly referenced from this record (`Ref`/`RefList` fields).
    #[must_use]
    pub fn outbound_refs(&self) -> Vec<EntityKey> {
        let mut out = Vec::new();
        for value in self.0.values() {
            match value {
                NormalizedValue::Ref(k) => out.push(k.clone()),
                NormalizedValue::RefList(ks) => out.extend(ks.iter().cloned()),
                NormalizedValue::Scalar(_) | NormalizedValue::ScalarList(_) => {}
            }
        }
        out
    }

    /// Rewrite every occurrence of `old` to `new` across `Ref`/`RefList` fields. Returns whether anything changed.
    pub fn rewrite_refs(&mut self, old: &EntityKey, new: &EntityKey) -> bool {
        let mut changed = false;
        for value in self.0.values_mut() {
            match value {
                NormalizedValue::Ref(k) if k == old => {
                    *k = new.clone();
                    changed = true;
                }
                NormalizedValue::RefList(ks) => {
                    for k in ks.iter_mut() {
                        if k == old {
                            *k = new.clone();
                            changed = true;
                        }
                    }
                }
                _ => {}
            }
        }
        changed
    }

    /// Apply a field-level patch: only the keys in `patch` are replaced, others are preserved.
    pub fn patch(&mut self, patch: Record, mask: &BTreeSet<FieldName>) {
        for (field, value) in patch.0 {
            if mask.is_empty() || mask.contains(&field) {
                self.0.insert(field, value);
            }
        }
    }
}

/// A shape descriptor for graph composition: how deep to walk, and how to
/// discover outbound references from a record.
pub struct Shape {
    /// Identifies this shape for dependency tracking (`root-ref = (K, shape_id)`).
    pub id: Arc<str>,
    /// Maximum BFS depth from the root (root itself is depth 0).
    pub max_depth: u32,
}

impl Shape {
    /// The outbound references to traverse from `record`.
    ///
    /// The default traversal follows every `Ref`/`RefList` field; adapters
    /// needing a narrower shape (a subset of fields) should use
    /// [`Shape::with_fields`] instead of calling this directly.
    #[must_use]
    pub fn outbound_refs(record: &Record) -> Vec<EntityKey> {
        record.outbound_refs()
    }

    /// Build a shape that only traverses a specific subset of fields.
    #[must_use]
    pub fn with_fields(id: impl Into<Arc<str>>, max_depth: u32, fields: Vec<FieldName>) -> FieldScopedShape {
        FieldScopedShape {
            id: id.into(),
            max_depth,
            fields: fields.into_iter().collect(),
        }
    }
}

/// A [`Shape`] restricted to following references found only in named fields.
pub struct FieldScopedShape {
    /// Identifies this shape for dependency tracking.
    pub id: Arc<str>,
    /// Maximum BFS depth from the root.
    pub max_depth: u32,
    /// Fields whose references are followed; all others are ignored.
    pub fields: BTreeSet<FieldName>,
}

impl FieldScopedShape {
    /// The outbound references to traverse from `record`, restricted to [`Self::fields`].
    #[must_use]
    pub fn outbound_refs(&self, record: &Record) -> Vec<EntityKey> {
        let mut out = Vec::new();
        for (field, value) in &record.0 {
            if !self.fields.contains(field) {
                continue;
            }
            match value {
                NormalizedValue::Ref(k) => out.push(k.clone()),
                NormalizedValue::RefList(ks) => out.extend(ks.iter().cloned()),
                NormalizedValue::Scalar(_) | NormalizedValue::ScalarList(_) => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(fields: Vec<(&str, NormalizedValue)>) -> Record {
        Record(fields.into_iter().map(|(k, v)| (Arc::from(k), v)).collect())
    }

    #[test]
    fn outbound_refs_collects_ref_and_reflist() {
        let r = rec(vec![
            ("profile", NormalizedValue::Ref(EntityKey::new("Profile", "1"))),
            (
                "tags",
                NormalizedValue::RefList(vec![EntityKey::new("Tag", "a"), EntityKey::new("Tag", "b")]),
            ),
            ("name", NormalizedValue::Scalar(Scalar::String("Alice".into()))),
        ]);
        let refs = r.outbound_refs();
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn rewrite_refs_updates_ref_and_reflist() {
        let old = EntityKey::new("User", "prov-1");
        let new = EntityKey::new("User", "42");
        let mut r = rec(vec![
            ("author", NormalizedValue::Ref(old.clone())),
            ("watchers", NormalizedValue::RefList(vec![old.clone(), EntityKey::new("User", "9")])),
        ]);
        assert!(r.rewrite_refs(&old, &new));
        assert_eq!(r.0[&Arc::<str>::from("author")], NormalizedValue::Ref(new.clone()));
        assert_eq!(
            r.0[&Arc::<str>::from("watchers")],
            NormalizedValue::RefList(vec![new, EntityKey::new("User", "9")])
        );
    }

    #[test]
    fn patch_only_replaces_masked_fields() {
        let mut r = rec(vec![
            ("name", NormalizedValue::Scalar(Scalar::String("Alice".into()))),
            ("age", NormalizedValue::Scalar(Scalar::Int(30))),
        ]);
        let patch = rec(vec![("name", NormalizedValue::Scalar(Scalar::String("Bob".into())))]);
        let mask: BTreeSet<FieldName> = ["name".into()].into_iter().collect();
        r.patch(patch, &mask);
        assert_eq!(r.0[&Arc::<str>::from("name")], NormalizedValue::Scalar(Scalar::String("Bob".into())));
        assert_eq!(r.0[&Arc::<str>::from("age")], NormalizedValue::Scalar(Scalar::Int(30)));
    }
}
