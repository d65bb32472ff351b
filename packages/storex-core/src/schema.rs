//! The entity schema registry: per-type adapters that normalize/denormalize
//! entities (spec §4.8 "Entity model").

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::key::EntityKey;
use crate::model::Record;

/// Context passed to an adapter's `normalize` call.
///
/// `register_nested` is how an adapter contributes nested entities to the
/// in-flight change-set: it returns the nested entity's key and enqueues it
/// for extraction, deduplicating by key.
pub trait NormalizeContext {
    /// Register a nested entity of type `type_name`, returning its key and
    /// enqueuing it for extraction into the same change-set (deduplicated).
    fn register_nested(&mut self, type_name: &str, entity: &dyn Any) -> EntityKey;
}

/// Context passed to an adapter's `denormalize` call.
pub trait DenormalizeContext {
    /// Resolve a referenced entity key to its record, using already-fetched
    /// composition results when available or the backend otherwise.
    /// Returns `None` if the reference cannot be resolved.
    fn resolve_reference(&mut self, key: &EntityKey) -> Option<Record>;
}

/// Per-type adapter: converts between a concrete entity type and the flat
/// normalized [`Record`] representation.
///
/// `Entity` is kept as `dyn Any` at the registry boundary (see
/// [`TypeAdapter`]) because the registry holds adapters for heterogeneous
/// entity types in one map; concrete adapters are written against their own
/// entity type and registered via [`SchemaRegistry::register`].
pub trait EntityAdapter<E>: Send + Sync {
    /// The registered type name this adapter owns.
    fn type_name(&self) -> &str;
    /// Extract the entity key (type + id) from an entity value.
    fn extract_id(&self, entity: &E) -> EntityKey;
    /// Normalize an entity into a flat record, registering any nested
    /// entities via `ctx`. The returned field mask lists only the fields
    /// this call actually populated (empty means "all fields", i.e. replace).
    fn normalize(&self, entity: &E, ctx: &mut dyn NormalizeContext) -> (Record, Vec<Arc<str>>);
    /// Reconstruct an entity from its normalized record, resolving
    /// references via `ctx`.
    fn denormalize(&self, record: &Record, ctx: &mut dyn DenormalizeContext) -> E;
}

/// Object-safe façade over [`EntityAdapter`] so heterogeneous adapters can
/// share one registry map, keyed by type name.
trait TypeAdapter: Send + Sync {
    fn type_name(&self) -> &str;
}

struct Boxed<E>(Arc<dyn EntityAdapter<E>>);

impl<E: 'static> TypeAdapter for Boxed<E> {
    fn type_name(&self) -> &str {
        self.0.type_name()
    }
}

/// Registry mapping entity type names to their adapters.
///
/// Adapters are stored type-erased; callers retrieve a concrete
/// `Arc<dyn EntityAdapter<E>>` via [`SchemaRegistry::get`], which downcasts
/// internally. A mismatched `E` at a given type name is a programmer error
/// (mirrors the teacher's `ServiceRegistry::get::<T>()` downcast idiom) and
/// returns `None` rather than panicking.
#[derive(Default)]
pub struct SchemaRegistry {
    adapters: BTreeMap<Arc<str>, Box<dyn Any + Send + Sync>>,
}

impl SchemaRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for entity type `E`.
    pub fn register<E: 'static>(&mut self, adapter: Arc<dyn EntityAdapter<E>>) {
        let name: Arc<str> = Arc::from(adapter.type_name());
        self.adapters.insert(name, Box::new(Boxed(adapter)));
    }

    /// Retrieve the adapter registered for entity type `E` under `type_name`.
    #[must_use]
    pub fn get<E: 'static>(&self, type_name: &str) -> Option<Arc<dyn EntityAdapter<E>>> {
        self.adapters
            .get(type_name)
            .and_then(|b| b.downcast_ref::<Boxed<E>>())
            .map(|boxed| boxed.0.clone())
    }

    /// Whether any adapter is registered under `type_name`.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.adapters.contains_key(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Profile {
        id: String,
        bio: String,
    }

    struct ProfileAdapter;

    impl EntityAdapter<Profile> for ProfileAdapter {
        fn type_name(&self) -> &str {
            "Profile"
        }
        fn extract_id(&self, entity: &Profile) -> EntityKey {
            EntityKey::new("Profile", entity.id.clone())
        }
        fn normalize(&self, entity: &Profile, _ctx: &mut dyn NormalizeContext) -> (Record, Vec<Arc<str>>) {
            use crate::model::{NormalizedValue, Scalar};
            let mut rec = Record::new();
            rec.0.insert("bio".into(), NormalizedValue::Scalar(Scalar::String(entity.bio.clone().into())));
            (rec, vec![])
        }
        fn denormalize(&self, record: &Record, _ctx: &mut dyn DenormalizeContext) -> Profile {
            use crate::model::{NormalizedValue, Scalar};
            let bio = match record.0.get(&Arc::<str>::from("bio")) {
                Some(NormalizedValue::Scalar(Scalar::String(s))) => s.to_string(),
                _ => String::new(),
            };
            Profile { id: "100".into(), bio }
        }
    }

    #[test]
    fn register_and_get_roundtrip() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Profile>(Arc::new(ProfileAdapter));
        let adapter = registry.get::<Profile>("Profile").expect("adapter registered");
        let key = adapter.extract_id(&Profile {
            id: "100".into(),
            bio: "Eng".into(),
        });
        assert_eq!(key, EntityKey::new("Profile", "100"));
    }

    #[test]
    fn missing_type_returns_none() {
        let registry = SchemaRegistry::new();
        assert!(registry.get::<Profile>("Profile").is_none());
    }
}
