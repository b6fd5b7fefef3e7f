//! ObjectStore (spec §4.3): process-wide registry of live entity
//! instances by type and id. Concurrency idiom grounded in the teacher's
//! `api::session_manager::SessionManager` / `database::dsl_instance_repository`
//! (`Arc<RwLock<HashMap<..>>>`, non-blocking readers, per-bucket writers).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::id_generator::IdGenerator;
use crate::object::Object;
use crate::registry::Registry;
use crate::value::{FieldValue, ObjectId};

pub type SharedObject = Arc<RwLock<Object>>;

#[derive(Default)]
pub struct ObjectStore {
    by_type: RwLock<HashMap<String, HashMap<ObjectId, SharedObject>>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a new object via the EntityType's factory, assigns an
    /// id, runs `init`, registers it, and returns it (spec §4.3 `create`).
    pub fn create(
        &self,
        registry: &Registry,
        id_gen: &IdGenerator,
        type_name: &str,
        init: impl FnOnce(&mut Object),
    ) -> Option<SharedObject> {
        let entity_type = registry.entity_type(type_name)?;
        let factory = entity_type.factory?;
        let mut fields = factory();
        for field in registry.all_persisted_fields_root_first(type_name) {
            use crate::registry::{ComplexShape, ValueShape};
            if let ValueShape::Complex { shape, .. } = &field.shape {
                let default = match shape {
                    ComplexShape::Set => FieldValue::Set(vec![]),
                    ComplexShape::Map => FieldValue::Map(vec![]),
                    ComplexShape::List | ComplexShape::Array => FieldValue::List(vec![]),
                };
                fields.entry(field.column_name.clone()).or_insert(default);
            }
        }
        let id = id_gen.next_local();
        let mut object = Object::new(id, type_name, fields);
        init(&mut object);
        let shared = Arc::new(RwLock::new(object));
        self.register(shared.clone());
        Some(shared)
    }

    pub fn register(&self, object: SharedObject) {
        let (type_name, id) = {
            let o = object.read().unwrap();
            (o.type_name.clone(), o.id)
        };
        self.by_type
            .write()
            .unwrap()
            .entry(type_name)
            .or_default()
            .insert(id, object);
    }

    pub fn unregister(&self, type_name: &str, id: ObjectId) -> Option<SharedObject> {
        self.by_type.write().unwrap().get_mut(type_name)?.remove(&id)
    }

    pub fn find_by_id(&self, type_name: &str, id: ObjectId) -> Option<SharedObject> {
        self.by_type.read().unwrap().get(type_name)?.get(&id).cloned()
    }

    /// Looks up an id across every registered type bucket. References
    /// don't carry a type tag (spec §3 representation decision in
    /// SPEC_FULL.md), so reference resolution scans the small set of
    /// candidate target types instead of every bucket; this helper
    /// supports the rare case where the caller doesn't know which.
    pub fn find_by_id_any_type(&self, id: ObjectId) -> Option<SharedObject> {
        let guard = self.by_type.read().unwrap();
        guard.values().find_map(|bucket| bucket.get(&id).cloned())
    }

    pub fn all(&self, type_name: &str) -> Vec<SharedObject> {
        self.by_type
            .read()
            .unwrap()
            .get(type_name)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_valid(&self, type_name: &str) -> Vec<SharedObject> {
        self.all(type_name)
            .into_iter()
            .filter(|o| o.read().unwrap().is_valid())
            .collect()
    }

    pub fn find_any(&self, type_name: &str, pred: impl Fn(&Object) -> bool) -> Option<SharedObject> {
        self.all(type_name).into_iter().find(|o| pred(&o.read().unwrap()))
    }

    pub fn count(&self, type_name: &str, pred: impl Fn(&Object) -> bool) -> usize {
        self.all(type_name).iter().filter(|o| pred(&o.read().unwrap())).count()
    }

    pub fn has_any(&self, type_name: &str, pred: impl Fn(&Object) -> bool) -> bool {
        self.find_any(type_name, pred).is_some()
    }

    /// The accumulation set for `(target_type, target_id)` via reference
    /// field `reference_field` declared on `referring_type`: every
    /// registered object `a` of `referring_type` with `a.reference_field
    /// == target_id` (spec invariant 3; computed lazily, not stored).
    pub fn accumulation(
        &self,
        referring_type: &str,
        reference_field: &str,
        target_id: ObjectId,
    ) -> Vec<SharedObject> {
        self.all(referring_type)
            .into_iter()
            .filter(|o| o.read().unwrap().get(reference_field) == FieldValue::Reference(Some(target_id)))
            .collect()
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.by_type.read().unwrap().keys().cloned().collect()
    }
}

pub fn sort_objects<K: Ord>(mut objects: Vec<SharedObject>, key_fn: impl Fn(&Object) -> K) -> Vec<SharedObject> {
    objects.sort_by_key(|o| key_fn(&o.read().unwrap()));
    objects
}

pub fn group_by<K: std::hash::Hash + Eq>(
    objects: Vec<SharedObject>,
    key_fn: impl Fn(&Object) -> K,
) -> HashMap<K, Vec<SharedObject>> {
    let mut groups: HashMap<K, Vec<SharedObject>> = HashMap::new();
    for o in objects {
        let key = key_fn(&o.read().unwrap());
        groups.entry(key).or_default().push(o);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EntityTypeSpec, FieldKind, FieldSpec, Registry, ValueShape};
    use std::collections::HashMap as StdHashMap;

    fn factory() -> StdHashMap<String, FieldValue> {
        let mut m = StdHashMap::new();
        m.insert("NAME".to_string(), FieldValue::Text("unnamed".into()));
        m
    }

    fn build_registry() -> Registry {
        Registry::builder()
            .register_type(EntityTypeSpec {
                name: "Widget".into(),
                parent: None,
                is_object_type: true,
                is_data_horizon_controlled: false,
                fields: vec![FieldSpec {
                    owner: "Widget".into(),
                    name: "name".into(),
                    kind: FieldKind::Data,
                    shape: ValueShape::Text { max_len: Some(32) },
                    nullable: true,
                    unique_group: None,
                    column_size: Some(32),
                    is_encrypted: false,
                    is_secret_for_logging: false,
                    created_in: None,
                    changed_in: vec![],
                    removed_in: None,
                    accumulation_inverse_of: None,
                    column_name: "NAME".into(),
                    entry_table_name: None,
                }],
                factory: Some(factory),
                delete_guard: None,
            })
            .build()
            .unwrap()
    }

    #[test]
    fn create_register_find_round_trip() {
        let registry = build_registry();
        let id_gen = IdGenerator::new(0);
        let store = ObjectStore::new();
        let obj = store
            .create(&registry, &id_gen, "Widget", |o| o.set("NAME", FieldValue::Text("gizmo".into())))
            .unwrap();
        let id = obj.read().unwrap().id;
        let found = store.find_by_id("Widget", id).unwrap();
        assert_eq!(found.read().unwrap().get("NAME"), FieldValue::Text("gizmo".into()));
    }

    #[test]
    fn unregister_removes_from_bucket() {
        let registry = build_registry();
        let id_gen = IdGenerator::new(0);
        let store = ObjectStore::new();
        let obj = store.create(&registry, &id_gen, "Widget", |_| {}).unwrap();
        let id = obj.read().unwrap().id;
        assert!(store.unregister("Widget", id).is_some());
        assert!(store.find_by_id("Widget", id).is_none());
    }

    #[test]
    fn count_and_has_any_use_predicate() {
        let registry = build_registry();
        let id_gen = IdGenerator::new(0);
        let store = ObjectStore::new();
        store.create(&registry, &id_gen, "Widget", |o| o.set("NAME", FieldValue::Text("a".into())));
        store.create(&registry, &id_gen, "Widget", |o| o.set("NAME", FieldValue::Text("b".into())));
        assert_eq!(store.count("Widget", |_| true), 2);
        assert!(store.has_any("Widget", |o| o.get("NAME") == FieldValue::Text("a".into())));
        assert!(!store.has_any("Widget", |o| o.get("NAME") == FieldValue::Text("z".into())));
    }
}
