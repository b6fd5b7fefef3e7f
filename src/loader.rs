//! Loader (spec §4.5): the hardest component. Resolves a registered
//! EntityType's rows (spread across its joined ancestor tables) into live
//! Objects, follows reference columns to keep the graph referentially
//! complete in the ObjectStore, and evicts data-horizon-controlled objects
//! nothing refers to anymore.
//!
//! Dispatch simplification: rather than a single polymorphic SELECT with
//! runtime discriminator dispatch, each concrete (`is_object_type`) type is
//! loaded with its own `DOMAIN_CLASS = <type>` filter on the root table.
//! Equivalent result, simpler control flow — recorded as an Open Question
//! decision in DESIGN.md.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::db::{ConnectionPool, Filter, Op};
use crate::error::{PersistError, Result};
use crate::id_generator::IdGenerator;
use crate::object::Object;
use crate::object_store::{ObjectStore, SharedObject};
use crate::record_cache::{ObjectRecord, RecordCache};
use crate::registry::naming;
use crate::registry::{ComplexShape, FieldKind, Registry, ValueShape};
use crate::schema_binder::TableBinding;
use crate::value::{FieldValue, ObjectId, ValueCodec};

#[derive(Debug, Clone)]
pub struct UnresolvedReference {
    pub target_type: String,
    pub target_id: ObjectId,
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub objects: Vec<SharedObject>,
    pub changed: bool,
}

pub struct Loader<'a> {
    pub registry: &'a Registry,
    pub binding: &'a TableBinding,
    pub store: &'a ObjectStore,
    pub cache: &'a RecordCache,
    pub codec: &'a ValueCodec,
    pub id_gen: &'a IdGenerator,
}

impl<'a> Loader<'a> {
    /// Full synchronization: every registered object type not in
    /// `exclude`, honoring each type's data horizon if configured.
    pub async fn synchronize(
        &self,
        pool: &dyn ConnectionPool,
        exclude: &[&str],
        now: DateTime<Utc>,
        data_horizon_cutoff: Option<std::time::Duration>,
    ) -> Result<LoadOutcome> {
        let mut all_objects = Vec::new();
        let mut changed = false;
        let mut loaded_keys: HashSet<(String, ObjectId)> = HashSet::new();

        for entity_type in self.registry.entity_types() {
            if !entity_type.is_object_type || exclude.contains(&entity_type.name.as_str()) {
                continue;
            }
            let cutoff = if entity_type.is_data_horizon_controlled {
                data_horizon_cutoff.map(|d| now - chrono::Duration::from_std(d).unwrap_or_default())
            } else {
                None
            };
            let outcome = self
                .load_internal(pool, &entity_type.name, None, cutoff, None, None, &mut loaded_keys)
                .await?;
            changed |= outcome.changed;
            all_objects.extend(outcome.objects);
        }

        self.evict_unreferenced(&loaded_keys);
        Ok(LoadOutcome { objects: all_objects, changed })
    }

    /// `load_only(type, where_clause, max_count)` (spec §4.5 point 2).
    pub async fn load_only(
        &self,
        pool: &dyn ConnectionPool,
        type_name: &str,
        where_clause: Option<&str>,
        max_count: Option<usize>,
    ) -> Result<LoadOutcome> {
        let mut loaded_keys = HashSet::new();
        self.load_internal(pool, type_name, None, None, where_clause, max_count, &mut loaded_keys)
            .await
    }

    /// `reload(obj)`: refresh a single object and anything it references
    /// that is currently missing.
    pub async fn reload(&self, pool: &dyn ConnectionPool, type_name: &str, id: ObjectId) -> Result<bool> {
        let mut loaded_keys = HashSet::new();
        let outcome = self
            .load_internal(pool, type_name, Some(&[id]), None, None, None, &mut loaded_keys)
            .await?;
        Ok(outcome.changed)
    }

    async fn load_internal(
        &self,
        pool: &dyn ConnectionPool,
        type_name: &str,
        ids: Option<&[ObjectId]>,
        data_horizon_cutoff: Option<DateTime<Utc>>,
        extra_where: Option<&str>,
        max_count: Option<usize>,
        loaded_keys: &mut HashSet<(String, ObjectId)>,
    ) -> Result<LoadOutcome> {
        let mut objects = Vec::new();
        let mut changed = false;
        let mut pending: Vec<(String, HashSet<ObjectId>)> = Vec::new();
        let mut attempted: HashSet<(String, ObjectId)> = HashSet::new();

        let (first_objects, first_unresolved, first_changed) = self
            .materialize_type(pool, type_name, ids, data_horizon_cutoff, extra_where, max_count)
            .await?;
        changed |= first_changed;
        for o in &first_objects {
            let (t, id) = { let g = o.read().unwrap(); (g.type_name.clone(), g.id) };
            loaded_keys.insert((t, id));
        }
        objects.extend(first_objects);
        group_unresolved(&first_unresolved, &mut pending);

        // Successive cycles: resolve referenced rows until nothing new
        // turns up (spec §4.5 algorithm).
        while let Some((target_type, target_ids)) = pending.pop() {
            let ids_to_fetch: Vec<ObjectId> = target_ids
                .into_iter()
                .filter(|id| attempted.insert((target_type.clone(), *id)))
                .collect();
            if ids_to_fetch.is_empty() {
                continue;
            }
            let (objs, unresolved, cycle_changed) = self
                .materialize_type(pool, &target_type, Some(&ids_to_fetch), None, None, None)
                .await?;
            changed |= cycle_changed;
            for o in &objs {
                let (t, id) = { let g = o.read().unwrap(); (g.type_name.clone(), g.id) };
                loaded_keys.insert((t, id));
            }
            let found_ids: HashSet<ObjectId> = objs.iter().map(|o| o.read().unwrap().id).collect();
            objects.extend(objs);
            group_unresolved(&unresolved, &mut pending);

            // Rows that truly don't exist: null out the dangling reference
            // on every object that pointed at them (spec §4.5 failure
            // semantics).
            for missing_id in ids_to_fetch.into_iter().filter(|id| !found_ids.contains(id)) {
                tracing::warn!(
                    "unresolved reference to {}#{} could not be satisfied; nulling field",
                    target_type,
                    missing_id
                );
                self.null_dangling_references(&target_type, missing_id);
            }
        }

        Ok(LoadOutcome { objects, changed })
    }

    fn null_dangling_references(&self, target_type: &str, missing_id: ObjectId) {
        for referring in self.registry.entity_types() {
            for field in referring.own_fields.iter().filter(|f| f.kind == FieldKind::Reference) {
                if field.reference_target() != Some(target_type) {
                    continue;
                }
                for shared in self.store.all(&referring.name) {
                    let mut obj = shared.write().unwrap();
                    if obj.get(&field.column_name) == FieldValue::Reference(Some(missing_id)) {
                        obj.set(&field.column_name, FieldValue::Reference(None));
                    }
                }
            }
        }
    }

    /// Loads/refreshes every instance of `type_name` matching the given
    /// selection, across its full ancestor-table join.
    async fn materialize_type(
        &self,
        pool: &dyn ConnectionPool,
        type_name: &str,
        ids: Option<&[ObjectId]>,
        data_horizon_cutoff: Option<DateTime<Utc>>,
        extra_where: Option<&str>,
        max_count: Option<usize>,
    ) -> Result<(Vec<SharedObject>, Vec<UnresolvedReference>, bool)> {
        let entity_type = self
            .registry
            .entity_type(type_name)
            .ok_or_else(|| PersistError::Registration(format!("unregistered type {type_name}")))?;
        let chain = self.registry.ancestor_chain_root_first(type_name);
        let root = chain[0];

        let mut root_filters = Vec::new();
        if let Some(ids) = ids {
            root_filters.push(Filter::In(
                naming::ID_COLUMN.to_string(),
                ids.iter().map(|id| FieldValue::BigInt(*id as i64)).collect(),
            ));
        } else {
            root_filters.push(Filter::Eq(
                naming::DOMAIN_CLASS_COLUMN.to_string(),
                FieldValue::Text(type_name.to_string()),
            ));
            if let Some(cutoff) = data_horizon_cutoff {
                root_filters.push(Filter::Raw(format!(
                    "{} >= '{}'",
                    naming::LAST_MODIFIED_COLUMN,
                    cutoff.to_rfc3339()
                )));
            }
            if let Some(clause) = extra_where {
                root_filters.push(Filter::Raw(clause.to_string()));
            }
        }

        let mut tx = pool.begin().await?;
        let root_result = tx
            .run(&Op::Select {
                table: root.table_name.clone(),
                columns: vec![],
                filter: Filter::And(root_filters),
                order_by: None,
                limit: max_count,
            })
            .await?;

        let mut merged: BTreeMap<ObjectId, BTreeMap<String, FieldValue>> = BTreeMap::new();
        for row in &root_result.rows {
            let id = row_id(row)?;
            merged.insert(id, row.0.clone());
        }

        let object_ids: Vec<ObjectId> = merged.keys().copied().collect();
        if object_ids.is_empty() {
            tx.commit().await?;
            return Ok((vec![], vec![], false));
        }

        for ancestor in chain.iter().skip(1) {
            let result = tx
                .run(&Op::Select {
                    table: ancestor.table_name.clone(),
                    columns: vec![],
                    filter: Filter::In(
                        naming::ID_COLUMN.to_string(),
                        object_ids.iter().map(|id| FieldValue::BigInt(*id as i64)).collect(),
                    ),
                    order_by: None,
                    limit: None,
                })
                .await?;
            for row in &result.rows {
                let id = row_id(row)?;
                merged.entry(id).or_default().extend(row.0.clone());
            }
        }

        let mut entry_tables: HashMap<String, Vec<crate::value::Row>> = HashMap::new();
        for field in self.registry.all_persisted_fields_root_first(type_name) {
            if field.kind != FieldKind::Complex {
                continue;
            }
            let owner_table = self
                .registry
                .table_name(&field.owner)
                .unwrap_or(entity_type.table_name.as_str());
            let entry_table = field
                .entry_table_name
                .clone()
                .unwrap_or_else(|| naming::entry_table_name(owner_table, &field.name));
            let main_ref_col = naming::entry_main_ref_column(owner_table);
            let result = tx
                .run(&Op::Select {
                    table: entry_table.clone(),
                    columns: vec![],
                    filter: Filter::In(
                        main_ref_col,
                        object_ids.iter().map(|id| FieldValue::BigInt(*id as i64)).collect(),
                    ),
                    order_by: Some((naming::ENTRY_ELEMENT_ORDER_COLUMN.to_string(), true)),
                    limit: None,
                })
                .await?;
            entry_tables.insert(entry_table, result.rows);
        }
        tx.commit().await?;

        let mut objects = Vec::new();
        let mut unresolved = Vec::new();
        let mut changed = false;

        for (id, columns) in merged {
            let (object, obj_unresolved, obj_changed) =
                self.materialize_row(type_name, id, columns, &entry_tables)?;
            changed |= obj_changed;
            unresolved.extend(obj_unresolved);
            objects.push(object);
        }

        Ok((objects, unresolved, changed))
    }

    fn materialize_row(
        &self,
        type_name: &str,
        id: ObjectId,
        columns: BTreeMap<String, FieldValue>,
        entry_tables: &HashMap<String, Vec<crate::value::Row>>,
    ) -> Result<(SharedObject, Vec<UnresolvedReference>, bool)> {
        let existing = self.store.find_by_id(type_name, id);
        let shared = existing.clone().unwrap_or_else(|| {
            let entity_type = self.registry.entity_type(type_name).expect("validated at registration");
            let factory = entity_type.factory.expect("is_object_type requires a factory");
            let fields = factory();
            std::sync::Arc::new(std::sync::RwLock::new(Object::new(id, type_name, fields)))
        });

        let prior_record = self.cache.get(type_name, id);
        let mut unresolved = Vec::new();
        let mut new_record_columns = BTreeMap::new();
        let mut new_list_keys = BTreeMap::new();
        let mut changed = false;

        {
            let mut obj = shared.write().unwrap();
            for field in self.registry.all_persisted_fields_root_first(type_name) {
                match field.kind {
                    FieldKind::Data => {
                        let raw = columns.get(&field.column_name).cloned().unwrap_or(FieldValue::Null);
                        let decoded = self.decode_data_value(field.is_encrypted, raw)?;
                        self.apply_incoming(&mut obj, &prior_record, &field.column_name, decoded.clone());
                        new_record_columns.insert(field.column_name.clone(), decoded);
                    }
                    FieldKind::Reference => {
                        let raw = columns.get(&field.column_name).cloned().unwrap_or(FieldValue::Null);
                        let target_id = match raw {
                            FieldValue::Reference(v) => v,
                            FieldValue::BigInt(v) => Some(v as ObjectId),
                            FieldValue::Null => None,
                            _ => None,
                        };
                        if let Some(target_id) = target_id {
                            let target_type = field.reference_target().unwrap_or_default();
                            if self.store.find_by_id(target_type, target_id).is_none() {
                                unresolved.push(UnresolvedReference {
                                    target_type: target_type.to_string(),
                                    target_id,
                                });
                            }
                        }
                        let value = FieldValue::Reference(target_id);
                        self.apply_incoming(&mut obj, &prior_record, &field.column_name, value.clone());
                        new_record_columns.insert(field.column_name.clone(), value);
                    }
                    FieldKind::Complex => {
                        let owner_table = self
                            .registry
                            .table_name(&field.owner)
                            .unwrap_or(type_name)
                            .to_string();
                        let entry_table = field
                            .entry_table_name
                            .clone()
                            .unwrap_or_else(|| naming::entry_table_name(&owner_table, &field.name));
                        let main_ref_col = naming::entry_main_ref_column(&owner_table);
                        let rows = entry_tables.get(&entry_table).cloned().unwrap_or_default();
                        let value = build_complex_value(&field.shape, &rows, &main_ref_col, id);
                        if let ValueShape::Complex { shape: ComplexShape::List | ComplexShape::Array, .. } =
                            &field.shape
                        {
                            let keys = own_element_keys(&rows, &main_ref_col, id);
                            new_list_keys.insert(field.column_name.clone(), keys);
                        }
                        obj.set(&field.column_name, value.clone());
                        new_record_columns.insert(field.column_name.clone(), value);
                    }
                    FieldKind::Accumulation => {}
                }
            }
            obj.stored = true;
        }

        if let Some(prior) = &prior_record {
            if !prior.diff(&new_record_columns).is_empty() {
                changed = true;
            }
        } else {
            changed = true;
        }
        self.cache.put(
            type_name,
            id,
            ObjectRecord { columns: new_record_columns, list_keys: new_list_keys },
        );

        if existing.is_none() {
            self.store.register(shared.clone());
        }

        Ok((shared, unresolved, changed))
    }

    fn decode_data_value(&self, is_encrypted: bool, raw: FieldValue) -> Result<FieldValue> {
        if is_encrypted {
            if let FieldValue::Text(stored) = &raw {
                return Ok(FieldValue::Text(self.codec.decrypt_from_storage(stored)?));
            }
        }
        Ok(raw)
    }

    /// Applies an incoming database value, detecting a conflict with an
    /// unsaved local edit (spec §4.5 materialization rules): if the local
    /// value currently differs from both the cached last-known value and
    /// the incoming value, the database wins and a field warning records
    /// the override.
    fn apply_incoming(&self, obj: &mut Object, prior: &Option<ObjectRecord>, column: &str, incoming: FieldValue) {
        let local = obj.get(column);
        let last_known = prior.as_ref().and_then(|r| r.columns.get(column).cloned());
        let locally_edited = last_known.as_ref().map(|lk| lk != &local).unwrap_or(false);
        if locally_edited && local != incoming {
            obj.set_field_warning(column, "overridden by database");
        } else {
            obj.clear_field_warning(column);
        }
        obj.set(column, incoming);
    }

    fn evict_unreferenced(&self, loaded_keys: &HashSet<(String, ObjectId)>) {
        for type_name in self.store.registered_types() {
            let entity_type = match self.registry.entity_type(&type_name) {
                Some(et) => et,
                None => continue,
            };
            if !entity_type.is_data_horizon_controlled {
                continue;
            }
            for shared in self.store.all(&type_name) {
                let (id, still_referenced) = {
                    let obj = shared.read().unwrap();
                    (obj.id, self.is_referenced(&type_name, obj.id))
                };
                if loaded_keys.contains(&(type_name.clone(), id)) || still_referenced {
                    continue;
                }
                self.store.unregister(&type_name, id);
                self.cache.remove(&type_name, id);
            }
        }
    }

    fn is_referenced(&self, target_type: &str, target_id: ObjectId) -> bool {
        for referring in self.registry.entity_types() {
            for field in referring.own_fields.iter().filter(|f| f.kind == FieldKind::Reference) {
                if field.reference_target() != Some(target_type) {
                    continue;
                }
                if self
                    .store
                    .has_any(&referring.name, |o| o.get(&field.column_name) == FieldValue::Reference(Some(target_id)))
                {
                    return true;
                }
            }
        }
        false
    }
}

fn row_id(row: &crate::value::Row) -> Result<ObjectId> {
    match row.get(naming::ID_COLUMN) {
        Some(FieldValue::BigInt(v)) => Ok(*v as ObjectId),
        Some(FieldValue::Int(v)) => Ok(*v as ObjectId),
        other => Err(PersistError::Persistence(format!("row missing a valid ID column: {other:?}"))),
    }
}

fn group_unresolved(unresolved: &[UnresolvedReference], pending: &mut Vec<(String, HashSet<ObjectId>)>) {
    let mut by_type: HashMap<String, HashSet<ObjectId>> = HashMap::new();
    for u in unresolved {
        by_type.entry(u.target_type.clone()).or_default().insert(u.target_id);
    }
    pending.extend(by_type);
}

/// The fractional order keys for `owner_id`'s rows in a list/array entry
/// table, in the same order as `build_complex_value`'s output (both filter
/// and iterate `rows` identically).
fn own_element_keys(rows: &[crate::value::Row], main_ref_col: &str, owner_id: ObjectId) -> Vec<i64> {
    rows.iter()
        .filter(|r| matches!(r.get(main_ref_col), Some(FieldValue::BigInt(v)) if *v as ObjectId == owner_id))
        .filter_map(|r| match r.get(naming::ENTRY_ELEMENT_ORDER_COLUMN) {
            Some(FieldValue::BigInt(v)) => Some(*v),
            Some(FieldValue::Int(v)) => Some(*v as i64),
            _ => None,
        })
        .collect()
}

fn build_complex_value(
    shape: &ValueShape,
    rows: &[crate::value::Row],
    main_ref_col: &str,
    owner_id: ObjectId,
) -> FieldValue {
    let own_rows: Vec<&crate::value::Row> = rows
        .iter()
        .filter(|r| matches!(r.get(main_ref_col), Some(FieldValue::BigInt(v)) if *v as ObjectId == owner_id))
        .collect();

    let complex_shape = match shape {
        ValueShape::Complex { shape, .. } => shape,
        _ => return FieldValue::Null,
    };

    match complex_shape {
        ComplexShape::Set => FieldValue::Set(
            own_rows
                .into_iter()
                .filter_map(|r| r.get(naming::ENTRY_ELEMENT_COLUMN).cloned())
                .collect(),
        ),
        ComplexShape::List | ComplexShape::Array => FieldValue::List(
            own_rows
                .into_iter()
                .filter_map(|r| r.get(naming::ENTRY_ELEMENT_COLUMN).cloned())
                .collect(),
        ),
        ComplexShape::Map => FieldValue::Map(
            own_rows
                .into_iter()
                .filter_map(|r| {
                    let k = r.get(naming::ENTRY_KEY_COLUMN)?.clone();
                    let v = r.get(naming::ENTRY_VALUE_COLUMN)?.clone();
                    Some((k, v))
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EntityTypeSpec, FieldSpec};
    use crate::testkit::InMemoryPool;
    use std::collections::HashMap as StdHashMap;

    fn widget_factory() -> StdHashMap<String, FieldValue> {
        StdHashMap::new()
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
                factory: Some(widget_factory),
                delete_guard: None,
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn load_only_materializes_rows_into_object_store() {
        let registry = build_registry();
        let pool = InMemoryPool::new();
        pool.seed_table(
            "DOM_WIDGET",
            vec![BTreeMap::from([
                (naming::ID_COLUMN.to_string(), FieldValue::BigInt(1)),
                (naming::DOMAIN_CLASS_COLUMN.to_string(), FieldValue::Text("Widget".into())),
                (naming::LAST_MODIFIED_COLUMN.to_string(), FieldValue::DateTime(Utc::now())),
                ("NAME".to_string(), FieldValue::Text("gizmo".into())),
            ])],
        );

        let store = ObjectStore::new();
        let cache = RecordCache::new();
        let codec = ValueCodec::new(None);
        let id_gen = IdGenerator::new(0);
        let binding = TableBinding::default();
        let loader = Loader {
            registry: &registry,
            binding: &binding,
            store: &store,
            cache: &cache,
            codec: &codec,
            id_gen: &id_gen,
        };

        let outcome = loader.load_only(&pool, "Widget", None, None).await.unwrap();
        assert_eq!(outcome.objects.len(), 1);
        assert!(outcome.changed);
        let found = store.find_by_id("Widget", 1).unwrap();
        assert_eq!(found.read().unwrap().get("NAME"), FieldValue::Text("gizmo".into()));
        assert!(cache.contains("Widget", 1));
    }

    #[tokio::test]
    async fn reloading_unchanged_row_reports_no_change() {
        let registry = build_registry();
        let pool = InMemoryPool::new();
        pool.seed_table(
            "DOM_WIDGET",
            vec![BTreeMap::from([
                (naming::ID_COLUMN.to_string(), FieldValue::BigInt(1)),
                (naming::DOMAIN_CLASS_COLUMN.to_string(), FieldValue::Text("Widget".into())),
                (naming::LAST_MODIFIED_COLUMN.to_string(), FieldValue::DateTime(Utc::now())),
                ("NAME".to_string(), FieldValue::Text("gizmo".into())),
            ])],
        );
        let store = ObjectStore::new();
        let cache = RecordCache::new();
        let codec = ValueCodec::new(None);
        let id_gen = IdGenerator::new(0);
        let binding = TableBinding::default();
        let loader = Loader {
            registry: &registry,
            binding: &binding,
            store: &store,
            cache: &cache,
            codec: &codec,
            id_gen: &id_gen,
        };

        loader.load_only(&pool, "Widget", None, None).await.unwrap();
        let second = loader.reload(&pool, "Widget", 1).await.unwrap();
        assert!(!second);
    }

    #[tokio::test]
    async fn unsaved_local_edit_loses_to_a_conflicting_database_value_and_is_flagged() {
        let registry = build_registry();
        let pool = InMemoryPool::new();
        pool.seed_table(
            "DOM_WIDGET",
            vec![BTreeMap::from([
                (naming::ID_COLUMN.to_string(), FieldValue::BigInt(1)),
                (naming::DOMAIN_CLASS_COLUMN.to_string(), FieldValue::Text("Widget".into())),
                (naming::LAST_MODIFIED_COLUMN.to_string(), FieldValue::DateTime(Utc::now())),
                ("NAME".to_string(), FieldValue::Text("gizmo".into())),
            ])],
        );
        let store = ObjectStore::new();
        let cache = RecordCache::new();
        let codec = ValueCodec::new(None);
        let id_gen = IdGenerator::new(0);
        let binding = TableBinding::default();
        let loader = Loader {
            registry: &registry,
            binding: &binding,
            store: &store,
            cache: &cache,
            codec: &codec,
            id_gen: &id_gen,
        };

        loader.load_only(&pool, "Widget", None, None).await.unwrap();

        // A local edit that hasn't been saved yet...
        let obj = store.find_by_id("Widget", 1).unwrap();
        obj.write().unwrap().set("NAME", FieldValue::Text("locally-edited".into()));

        // ...loses to a concurrent database change when the row reloads.
        pool.seed_table(
            "DOM_WIDGET",
            vec![BTreeMap::from([
                (naming::ID_COLUMN.to_string(), FieldValue::BigInt(1)),
                (naming::DOMAIN_CLASS_COLUMN.to_string(), FieldValue::Text("Widget".into())),
                (naming::LAST_MODIFIED_COLUMN.to_string(), FieldValue::DateTime(Utc::now())),
                ("NAME".to_string(), FieldValue::Text("renamed-elsewhere".into())),
            ])],
        );
        let changed = loader.reload(&pool, "Widget", 1).await.unwrap();
        assert!(changed);

        let reloaded = store.find_by_id("Widget", 1).unwrap();
        let locked = reloaded.read().unwrap();
        assert_eq!(locked.get("NAME"), FieldValue::Text("renamed-elsewhere".into()));
        assert!(locked.field_warnings.contains_key("NAME"));
    }
}
