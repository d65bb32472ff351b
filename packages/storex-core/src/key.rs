//! Request keys (`Key`) and normalized-entity keys (`EntityKey`).
//!
//! `Key` identifies a request/view (what a consumer subscribes to); `EntityKey`
//! identifies a normalized record. They are never conflated — see spec §3.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::hash::{combine_hashes, fnv1a_hash_bytes};

/// A namespaced request key.
///
/// Two built-in shapes cover the common cases; [`Key::Custom`] is the
/// extension slot for consumer-defined variants (spec §9's "deep
/// inheritance" redesign note), implemented via the [`CustomKey`] trait
/// object rather than a new enum variant per consumer.
#[derive(Clone)]
pub enum Key {
    /// A key identifying a single entity by id.
    ByIdentity {
        /// Logical namespace, used for bulk invalidation.
        namespace: Arc<str>,
        /// Entity type name.
        entity_type: Arc<str>,
        /// Entity id within its type.
        id: Arc<str>,
    },
    /// A key identifying a view parameterized by an ordered set of query parameters.
    ByQuery {
        /// Logical namespace, used for bulk invalidation.
        namespace: Arc<str>,
        /// Query parameters. Order-insensitive: stored sorted by key.
        params: BTreeMap<Arc<str>, Arc<str>>,
    },
    /// Consumer-defined key shape.
    Custom(Arc<dyn CustomKey>),
}

/// Extension point for consumer-defined [`Key`] variants.
///
/// Implementors must produce a stable hash and expose their namespace so
/// bulk invalidation keeps working across custom key shapes.
pub trait CustomKey: Send + Sync + fmt::Debug {
    /// The order-insensitive stable hash of this key.
    fn stable_hash(&self) -> u64;
    /// The namespace this key belongs to, for bulk invalidation.
    fn namespace(&self) -> Arc<str>;
    /// Equality against another `CustomKey`, for `PartialEq`.
    fn dyn_eq(&self, other: &dyn CustomKey) -> bool;
}

impl Key {
    /// Build a by-identity key.
    pub fn by_identity(
        namespace: impl Into<Arc<str>>,
        entity_type: impl Into<Arc<str>>,
        id: impl Into<Arc<str>>,
    ) -> Self {
        Key::ByIdentity {
            namespace: namespace.into(),
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Build a by-query key from an iterator of `(name, value)` pairs.
    pub fn by_query<I, S1, S2>(namespace: impl Into<Arc<str>>, params: I) -> Self
    where
        I: IntoIterator<Item = (S1, S2)>,
        S1: Into<Arc<str>>,
        S2: Into<Arc<str>>,
    {
        Key::ByQuery {
            namespace: namespace.into(),
            params: params.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// The namespace this key belongs to.
    #[must_use]
    pub fn namespace(&self) -> Arc<str> {
        match self {
            Key::ByIdentity { namespace, .. } | Key::ByQuery { namespace, .. } => namespace.clone(),
            Key::Custom(k) => k.namespace(),
        }
    }

    /// A stable, order-insensitive 64-bit hash of every field.
    #[must_use]
    pub fn stable_hash(&self) -> u64 {
        match self {
            Key::ByIdentity {
                namespace,
                entity_type,
                id,
            } => combine_hashes(&[
                fnv1a_hash_bytes(namespace.as_bytes()),
                fnv1a_hash_bytes(entity_type.as_bytes()),
                fnv1a_hash_bytes(id.as_bytes()),
            ]),
            Key::ByQuery { namespace, params } => {
                // BTreeMap iterates in sorted key order, so this is order-insensitive.
                let mut parts = vec![fnv1a_hash_bytes(namespace.as_bytes())];
                for (k, v) in params {
                    parts.push(fnv1a_hash_bytes(k.as_bytes()));
                    parts.push(fnv1a_hash_bytes(v.as_bytes()));
                }
                combine_hashes(&parts)
            }
            Key::Custom(k) => k.stable_hash(),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Key::ByIdentity {
                    namespace: n1,
                    entity_type: t1,
                    id: i1,
                },
                Key::ByIdentity {
                    namespace: n2,
                    entity_type: t2,
                    id: i2,
                },
            ) => n1 == n2 && t1 == t2 && i1 == i2,
            (
                Key::ByQuery {
                    namespace: n1,
                    params: p1,
                },
                Key::ByQuery {
                    namespace: n2,
                    params: p2,
                },
            ) => n1 == n2 && p1 == p2,
            (Key::Custom(a), Key::Custom(b)) => a.dyn_eq(b.as_ref()),
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.stable_hash().hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::ByIdentity {
                namespace,
                entity_type,
                id,
            } => f
                .debug_struct("Key::ByIdentity")
                .field("namespace", namespace)
                .field("entity_type", entity_type)
                .field("id", id)
                .finish(),
            Key::ByQuery { namespace, params } => f
                .debug_struct("Key::ByQuery")
                .field("namespace", namespace)
                .field("params", params)
                .finish(),
            Key::Custom(k) => f.debug_tuple("Key::Custom").field(k).finish(),
        }
    }
}

/// Identifier for a normalized entity record: `{ type_name, id }`.
///
/// Distinct from [`Key`]: entity keys identify normalized records, not
/// requests/views.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct EntityKey {
    /// The entity's type name, as registered in the schema registry.
    pub type_name: Arc<str>,
    /// The entity's id, within its type.
    pub id: EntityId,
}

impl EntityKey {
    /// Build an entity key with a scalar string id.
    pub fn new(type_name: impl Into<Arc<str>>, id: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            id: EntityId::Scalar(id.into()),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.type_name, self.id)
    }
}

/// The id portion of an [`EntityKey`]: either a scalar string or a
/// structured composite key (sorted field map, for multi-field primary keys).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum EntityId {
    /// A single opaque string id.
    Scalar(Arc<str>),
    /// A composite id, sorted by field name for stable equality/hashing.
    Structured(BTreeMap<Arc<str>, Arc<str>>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_query_hash_is_order_insensitive() {
        let a = Key::by_query("ns", vec![("a", "1"), ("b", "2")]);
        let b = Key::by_query("ns", vec![("b", "2"), ("a", "1")]);
        assert_eq!(a.stable_hash(), b.stable_hash());
        assert_eq!(a, b);
    }

    #[test]
    fn different_namespace_differs() {
        let a = Key::by_identity("ns1", "User", "1");
        let b = Key::by_identity("ns2", "User", "1");
        assert_ne!(a.stable_hash(), b.stable_hash());
    }

    #[test]
    fn by_identity_vs_by_query_never_equal() {
        let a = Key::by_identity("ns", "User", "1");
        let b = Key::by_query("ns", vec![("id", "1")]);
        assert_ne!(a, b);
    }

    #[test]
    fn entity_key_display() {
        let k = EntityKey::new("User", "1");
        assert_eq!(format!("{k}"), "User:Scalar(\"1\")");
    }
}
