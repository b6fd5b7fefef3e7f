//! Saver (spec §4.6): diff-based, dependency-ordered persistence of a live
//! Object. Handles the full ancestor-table join, collection/map entry
//! tables, pre-flight constraint checks, and the per-column partial-failure
//! recovery path.
//!
//! Dependency ordering assumption (recorded in DESIGN.md): a reference
//! cycle can only be closed if at least one participating reference column
//! is nullable — the usual requirement for this save-then-backfill scheme,
//! matching how the teacher's own FK-heavy tables allow deferred linkage.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use chrono::Utc;

use crate::db::{ConnectionPool, Filter, Op};
use crate::error::{PersistError, Result};
use crate::object::FieldError;
use crate::object_store::{ObjectStore, SharedObject};
use crate::ordering;
use crate::record_cache::{ObjectRecord, RecordCache};
use crate::registry::entity_type::EntityType;
use crate::registry::field_spec::{ComplexShape, FieldKind, FieldSpec, ValueShape};
use crate::registry::naming;
use crate::registry::Registry;
use crate::value::{FieldValue, ObjectId, ValueCodec};

/// A reference column that had to be written as NULL on INSERT because its
/// target is still mid-save somewhere up the recursion stack (a reference
/// cycle). Fixed up with a follow-up UPDATE once the whole `save()` call
/// completes and every participant has a row.
struct DeferredBackRef {
    object: SharedObject,
    type_name: String,
    column: String,
    target_id: ObjectId,
}

pub struct Saver<'a> {
    pub registry: &'a Registry,
    pub store: &'a ObjectStore,
    pub cache: &'a RecordCache,
    pub codec: &'a ValueCodec,
}

impl<'a> Saver<'a> {
    pub async fn save(&self, pool: &dyn ConnectionPool, shared: &SharedObject) -> Result<()> {
        let mut saving = HashSet::new();
        let mut deferred = Vec::new();
        self.save_inner(pool, shared, &mut saving, &mut deferred).await?;
        for back_ref in deferred {
            self.apply_deferred_back_ref(pool, back_ref).await?;
        }
        Ok(())
    }

    fn save_inner<'b>(
        &'b self,
        pool: &'b dyn ConnectionPool,
        shared: &'b SharedObject,
        saving: &'b mut HashSet<(String, ObjectId)>,
        deferred: &'b mut Vec<DeferredBackRef>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'b>> {
        Box::pin(async move {
            let (type_name, id, already_stored) = {
                let obj = shared.read().unwrap();
                (obj.type_name.clone(), obj.id, obj.stored)
            };
            if !saving.insert((type_name.clone(), id)) {
                return Ok(());
            }

            let chain = self.registry.ancestor_chain_root_first(&type_name);
            let mut suppressed: Vec<String> = Vec::new();

            for ancestor in &chain {
                for field in ancestor.own_fields.iter().filter(|f| f.kind == FieldKind::Reference) {
                    let target_id = match shared.read().unwrap().get(&field.column_name) {
                        FieldValue::Reference(v) => v,
                        _ => None,
                    };
                    let Some(target_id) = target_id else { continue };
                    let target_type = field.reference_target().unwrap_or_default();
                    let Some(target_obj) = self.store.find_by_id(target_type, target_id) else { continue };
                    let (target_key, target_stored) = {
                        let g = target_obj.read().unwrap();
                        ((g.type_name.clone(), g.id), g.stored)
                    };
                    if target_stored {
                        continue;
                    }
                    if saving.contains(&target_key) {
                        suppressed.push(field.column_name.clone());
                        deferred.push(DeferredBackRef {
                            object: shared.clone(),
                            type_name: type_name.clone(),
                            column: field.column_name.clone(),
                            target_id,
                        });
                        continue;
                    }
                    self.save_inner(pool, &target_obj, saving, deferred).await?;
                }
            }

            self.check_constraints(&chain, shared)?;

            if already_stored {
                self.update_existing(pool, &type_name, &chain, shared, &suppressed).await?;
            } else {
                self.insert_new(pool, &type_name, &chain, shared, &suppressed).await?;
            }

            saving.remove(&(type_name, id));
            Ok(())
        })
    }

    async fn apply_deferred_back_ref(&self, pool: &dyn ConnectionPool, back_ref: DeferredBackRef) -> Result<()> {
        let entity_type = self
            .registry
            .entity_type(&back_ref.type_name)
            .ok_or_else(|| PersistError::Registration(format!("unregistered type {}", back_ref.type_name)))?;
        let owner_table = self
            .registry
            .ancestor_chain_root_first(&back_ref.type_name)
            .into_iter()
            .find(|et| et.own_fields.iter().any(|f| f.column_name == back_ref.column))
            .map(|et| et.table_name.clone())
            .unwrap_or_else(|| entity_type.table_name.clone());
        let id = { back_ref.object.read().unwrap().id };

        let mut tx = pool.begin().await?;
        let mut set = BTreeMap::new();
        set.insert(back_ref.column.clone(), FieldValue::Reference(Some(back_ref.target_id)));
        tx.run(&Op::Update {
            table: owner_table,
            set,
            filter: Filter::Eq(naming::ID_COLUMN.to_string(), FieldValue::BigInt(id as i64)),
        })
        .await?;
        tx.commit().await?;

        if let Some(mut record) = self.cache.get(&back_ref.type_name, id) {
            record
                .columns
                .insert(back_ref.column.clone(), FieldValue::Reference(Some(back_ref.target_id)));
            self.cache.put(&back_ref.type_name, id, record);
        }
        Ok(())
    }

    /// NOT NULL, UNIQUE, column-size, and enum-width checks (spec §4.6),
    /// run before any database I/O.
    fn check_constraints(&self, chain: &[&EntityType], shared: &SharedObject) -> Result<()> {
        let mut obj = shared.write().unwrap();
        let mut blocking = false;

        for ancestor in chain {
            for field in ancestor.own_fields.iter().filter(|f| f.is_persisted() && f.kind != FieldKind::Complex) {
                let value = obj.get(&field.column_name);

                if !field.nullable && value.is_null() {
                    obj.set_field_error(&field.column_name, FieldError::NotNull);
                    blocking = true;
                    continue;
                }
                obj.clear_field_error(&field.column_name);

                match (&field.shape, &value) {
                    (ValueShape::Text { .. }, FieldValue::Text(s)) => {
                        let (truncated, did_truncate) = ValueCodec::truncate_text(s, field.column_size);
                        if did_truncate {
                            obj.set_field_warning(&field.column_name, "value truncated to column size");
                            obj.set(&field.column_name, FieldValue::Text(truncated));
                        } else {
                            obj.clear_field_warning(&field.column_name);
                        }
                    }
                    (ValueShape::Enum { .. }, FieldValue::Enum(discriminant)) => {
                        let width = ValueCodec::validate_enum_width(&field.shape).unwrap_or(0);
                        if discriminant.len() > field.column_size.unwrap_or(width) {
                            obj.set_field_error(&field.column_name, FieldError::EnumTooWide);
                            blocking = true;
                        }
                    }
                    _ => {}
                }
            }
        }

        let type_name = obj.type_name.clone();
        let self_id = obj.id;
        // Drop the write guard before touching the ObjectStore: `has_any`
        // below will read-lock every object of this type, including this
        // one, and a write guard held across that would deadlock.
        drop(obj);

        for group_name in unique_group_names(chain) {
            let fields = fields_in_unique_group(chain, &group_name);
            let values: Vec<FieldValue> = {
                let obj = shared.read().unwrap();
                fields.iter().map(|f| obj.get(&f.column_name)).collect()
            };
            let conflict = self.store.has_any(&type_name, |other| {
                other.id != self_id
                    && fields
                        .iter()
                        .zip(values.iter())
                        .all(|(f, v)| other.get(&f.column_name) == *v)
            });
            if conflict {
                let mut obj = shared.write().unwrap();
                for f in &fields {
                    obj.set_field_error(&f.column_name, FieldError::Unique);
                }
                blocking = true;
            }
        }

        if blocking {
            return Err(PersistError::Constraint {
                entity_type: type_name,
                field: "(multiple)".to_string(),
                details: "one or more fields failed validation; see Object.field_errors".to_string(),
            });
        }
        Ok(())
    }

    async fn insert_new(
        &self,
        pool: &dyn ConnectionPool,
        type_name: &str,
        chain: &[&EntityType],
        shared: &SharedObject,
        suppressed: &[String],
    ) -> Result<()> {
        let id = shared.read().unwrap().id;
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        for (i, ancestor) in chain.iter().enumerate() {
            let mut values = BTreeMap::new();
            values.insert(naming::ID_COLUMN.to_string(), FieldValue::BigInt(id as i64));
            if i == 0 {
                values.insert(naming::DOMAIN_CLASS_COLUMN.to_string(), FieldValue::Text(type_name.to_string()));
                values.insert(naming::LAST_MODIFIED_COLUMN.to_string(), FieldValue::DateTime(now));
            }
            for field in ancestor.own_fields.iter().filter(|f| f.is_persisted() && f.kind != FieldKind::Complex) {
                let value = self.persisted_value(shared, field, suppressed);
                values.insert(field.column_name.clone(), value);
            }
            tx.run(&Op::Insert { table: ancestor.table_name.clone(), values }).await?;
        }

        for ancestor in chain {
            for field in ancestor.own_fields.iter().filter(|f| f.kind == FieldKind::Complex) {
                self.write_complex_fresh(&mut tx, &ancestor.table_name, field, id, shared).await?;
            }
        }

        tx.commit().await?;
        shared.write().unwrap().stored = true;
        self.refresh_cache_after_save(type_name, id, chain, shared);
        Ok(())
    }

    async fn update_existing(
        &self,
        pool: &dyn ConnectionPool,
        type_name: &str,
        chain: &[&EntityType],
        shared: &SharedObject,
        suppressed: &[String],
    ) -> Result<()> {
        let id = shared.read().unwrap().id;
        let prior = self.cache.get(type_name, id).unwrap_or_default();
        let mut tx = pool.begin().await?;
        let mut touched_any_table = false;
        let mut failure: Option<PersistError> = None;

        for ancestor in chain {
            let mut set = BTreeMap::new();
            for field in ancestor.own_fields.iter().filter(|f| f.is_persisted() && f.kind != FieldKind::Complex) {
                let value = self.persisted_value(shared, field, suppressed);
                if prior.columns.get(&field.column_name) != Some(&value) {
                    set.insert(field.column_name.clone(), value);
                }
            }
            if set.is_empty() {
                continue;
            }
            touched_any_table = true;
            let result = tx
                .run(&Op::Update {
                    table: ancestor.table_name.clone(),
                    set,
                    filter: Filter::Eq(naming::ID_COLUMN.to_string(), FieldValue::BigInt(id as i64)),
                })
                .await;
            if let Err(e) = result {
                tracing::warn!("whole-row update failed for {type_name}#{id}: {e}");
                failure = Some(e);
                break;
            }
        }

        if let Some(err) = failure {
            tx.rollback().await?;
            drop(err);
            return self.recover_per_column(pool, type_name, chain, shared, &prior, suppressed).await;
        }

        if touched_any_table {
            let mut root_set = BTreeMap::new();
            root_set.insert(naming::LAST_MODIFIED_COLUMN.to_string(), FieldValue::DateTime(Utc::now()));
            tx.run(&Op::Update {
                table: chain[0].table_name.clone(),
                set: root_set,
                filter: Filter::Eq(naming::ID_COLUMN.to_string(), FieldValue::BigInt(id as i64)),
            })
            .await?;
        }

        for ancestor in chain {
            for field in ancestor.own_fields.iter().filter(|f| f.kind == FieldKind::Complex) {
                self.diff_and_write_complex(&mut tx, &ancestor.table_name, field, id, &prior).await?;
            }
        }

        tx.commit().await?;
        self.refresh_cache_after_save(type_name, id, chain, shared);
        Ok(())
    }

    /// Partial-failure recovery (spec §4.6): retry one column at a time in
    /// a fresh transaction. Columns that succeed are applied; columns that
    /// fail get a persistent field error and their in-memory value is
    /// rolled back to the last-known-good one.
    async fn recover_per_column(
        &self,
        pool: &dyn ConnectionPool,
        type_name: &str,
        chain: &[&EntityType],
        shared: &SharedObject,
        prior: &ObjectRecord,
        suppressed: &[String],
    ) -> Result<()> {
        let id = shared.read().unwrap().id;
        let mut any_failed = false;

        for ancestor in chain {
            for field in ancestor.own_fields.iter().filter(|f| f.is_persisted() && f.kind != FieldKind::Complex) {
                let value = self.persisted_value(shared, field, suppressed);
                if prior.columns.get(&field.column_name) == Some(&value) {
                    continue;
                }
                let mut tx = pool.begin().await?;
                let mut set = BTreeMap::new();
                set.insert(field.column_name.clone(), value.clone());
                let result = tx
                    .run(&Op::Update {
                        table: ancestor.table_name.clone(),
                        set,
                        filter: Filter::Eq(naming::ID_COLUMN.to_string(), FieldValue::BigInt(id as i64)),
                    })
                    .await;
                match result {
                    Ok(_) => {
                        tx.commit().await?;
                        let mut obj = shared.write().unwrap();
                        obj.clear_field_error(&field.column_name);
                    }
                    Err(e) => {
                        tx.rollback().await?;
                        any_failed = true;
                        let mut obj = shared.write().unwrap();
                        obj.set_field_error(&field.column_name, FieldError::PersistenceFailed(e.to_string()));
                        if let Some(restore) = prior.columns.get(&field.column_name) {
                            obj.set(&field.column_name, restore.clone());
                        }
                    }
                }
            }
        }

        self.refresh_cache_after_save(type_name, id, chain, shared);
        if any_failed {
            let mut obj = shared.write().unwrap();
            obj.exception = Some("one or more columns failed to persist; see field_errors".to_string());
        }
        Ok(())
    }

    fn persisted_value(&self, shared: &SharedObject, field: &FieldSpec, suppressed: &[String]) -> FieldValue {
        if field.kind == FieldKind::Reference && suppressed.contains(&field.column_name) {
            return FieldValue::Reference(None);
        }
        let raw = shared.read().unwrap().get(&field.column_name);
        if field.is_encrypted {
            if let FieldValue::Text(plain) = &raw {
                return self.codec.encrypt_for_storage(plain);
            }
        }
        raw
    }

    async fn write_complex_fresh(
        &self,
        tx: &mut Box<dyn crate::db::Transaction>,
        owner_table: &str,
        field: &FieldSpec,
        owner_id: ObjectId,
        shared: &SharedObject,
    ) -> Result<()> {
        let value = shared.read().unwrap().get(&field.column_name);
        let entry_table = entry_table_for(field, owner_table);
        let main_ref_col = naming::entry_main_ref_column(owner_table);

        match (&field.shape, &value) {
            (ValueShape::Complex { shape: ComplexShape::Set, .. }, FieldValue::Set(items)) => {
                for item in items {
                    self.insert_entry_row(tx, &entry_table, &main_ref_col, owner_id, item_row(item)).await?;
                }
            }
            (
                ValueShape::Complex { shape: ComplexShape::List | ComplexShape::Array, .. },
                FieldValue::List(items),
            ) => {
                for (key, item) in ordering::initial_keys(items.len()).into_iter().zip(items.iter()) {
                    let mut row = item_row(item);
                    row.insert(naming::ENTRY_ELEMENT_ORDER_COLUMN.to_string(), FieldValue::BigInt(key));
                    self.insert_entry_row(tx, &entry_table, &main_ref_col, owner_id, row).await?;
                }
            }
            (ValueShape::Complex { shape: ComplexShape::Map, .. }, FieldValue::Map(pairs)) => {
                for (k, v) in pairs {
                    let mut row = BTreeMap::new();
                    row.insert(naming::ENTRY_KEY_COLUMN.to_string(), k.clone());
                    row.insert(naming::ENTRY_VALUE_COLUMN.to_string(), v.clone());
                    self.insert_entry_row(tx, &entry_table, &main_ref_col, owner_id, row).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn insert_entry_row(
        &self,
        tx: &mut Box<dyn crate::db::Transaction>,
        entry_table: &str,
        main_ref_col: &str,
        owner_id: ObjectId,
        mut row: BTreeMap<String, FieldValue>,
    ) -> Result<()> {
        row.insert(main_ref_col.to_string(), FieldValue::BigInt(owner_id as i64));
        tx.run(&Op::Insert { table: entry_table.to_string(), values: row }).await?;
        Ok(())
    }

    /// Minimal diff for Set/Map fields; Lists are rewritten wholesale on
    /// any change (see module docs — a disclosed simplification of the
    /// fully minimal fractional-reorder diff the `ordering` module makes
    /// possible).
    async fn diff_and_write_complex(
        &self,
        tx: &mut Box<dyn crate::db::Transaction>,
        owner_table: &str,
        field: &FieldSpec,
        owner_id: ObjectId,
        prior: &ObjectRecord,
    ) -> Result<()> {
        let entry_table = entry_table_for(field, owner_table);
        let main_ref_col = naming::entry_main_ref_column(owner_table);
        let prior_value = prior.columns.get(&field.column_name).cloned();

        match &field.shape {
            ValueShape::Complex { shape: ComplexShape::Set, .. } => {
                let current = self.store_value_as_list(field, owner_id);
                let prior_items = match prior_value {
                    Some(FieldValue::Set(v)) => v,
                    _ => vec![],
                };
                let added: Vec<FieldValue> = current.iter().filter(|v| !prior_items.contains(v)).cloned().collect();
                let removed: Vec<FieldValue> = prior_items.iter().filter(|v| !current.contains(v)).cloned().collect();
                if !removed.is_empty() {
                    tx.run(&Op::Delete {
                        table: entry_table.clone(),
                        filter: Filter::And(vec![
                            Filter::Eq(main_ref_col.clone(), FieldValue::BigInt(owner_id as i64)),
                            Filter::In(naming::ENTRY_ELEMENT_COLUMN.to_string(), removed),
                        ]),
                    })
                    .await?;
                }
                for item in added {
                    self.insert_entry_row(tx, &entry_table, &main_ref_col, owner_id, item_row(&item)).await?;
                }
            }
            ValueShape::Complex { shape: ComplexShape::Map, .. } => {
                let current_pairs = self.store_value_as_pairs(field, owner_id);
                let prior_pairs = match prior_value {
                    Some(FieldValue::Map(v)) => v,
                    _ => vec![],
                };
                let changed_keys: Vec<FieldValue> = current_pairs
                    .iter()
                    .filter(|(k, v)| !prior_pairs.iter().any(|(pk, pv)| pk == k && pv == v))
                    .map(|(k, _)| k.clone())
                    .collect();
                let removed_keys: Vec<FieldValue> = prior_pairs
                    .iter()
                    .filter(|(pk, _)| !current_pairs.iter().any(|(k, _)| k == pk))
                    .map(|(k, _)| k.clone())
                    .collect();
                let to_delete: Vec<FieldValue> = changed_keys.iter().cloned().chain(removed_keys).collect();
                if !to_delete.is_empty() {
                    tx.run(&Op::Delete {
                        table: entry_table.clone(),
                        filter: Filter::And(vec![
                            Filter::Eq(main_ref_col.clone(), FieldValue::BigInt(owner_id as i64)),
                            Filter::In(naming::ENTRY_KEY_COLUMN.to_string(), to_delete),
                        ]),
                    })
                    .await?;
                }
                for key in &changed_keys {
                    if let Some((_, v)) = current_pairs.iter().find(|(k, _)| k == key) {
                        let mut row = BTreeMap::new();
                        row.insert(naming::ENTRY_KEY_COLUMN.to_string(), key.clone());
                        row.insert(naming::ENTRY_VALUE_COLUMN.to_string(), v.clone());
                        self.insert_entry_row(tx, &entry_table, &main_ref_col, owner_id, row).await?;
                    }
                }
            }
            ValueShape::Complex { shape: ComplexShape::List | ComplexShape::Array, .. } => {
                let current = self.store_value_as_list(field, owner_id);
                let prior_items = match prior_value {
                    Some(FieldValue::List(v)) => v,
                    _ => vec![],
                };
                if current == prior_items {
                    return Ok(());
                }
                tx.run(&Op::Delete {
                    table: entry_table.clone(),
                    filter: Filter::Eq(main_ref_col.clone(), FieldValue::BigInt(owner_id as i64)),
                })
                .await?;
                for (key, item) in ordering::initial_keys(current.len()).into_iter().zip(current.iter()) {
                    let mut row = item_row(item);
                    row.insert(naming::ENTRY_ELEMENT_ORDER_COLUMN.to_string(), FieldValue::BigInt(key));
                    self.insert_entry_row(tx, &entry_table, &main_ref_col, owner_id, row).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn store_value_as_list(&self, field: &FieldSpec, owner_id: ObjectId) -> Vec<FieldValue> {
        // Reads the *current in-memory* value straight off the live
        // Object rather than the database, matching spec §4.6: the diff
        // source of truth for an in-flight save is the application value.
        self.store
            .find_by_id_any_type(owner_id)
            .map(|o| match o.read().unwrap().get(&field.column_name) {
                FieldValue::Set(v) | FieldValue::List(v) => v,
                _ => vec![],
            })
            .unwrap_or_default()
    }

    fn store_value_as_pairs(&self, field: &FieldSpec, owner_id: ObjectId) -> Vec<(FieldValue, FieldValue)> {
        self.store
            .find_by_id_any_type(owner_id)
            .map(|o| match o.read().unwrap().get(&field.column_name) {
                FieldValue::Map(v) => v,
                _ => vec![],
            })
            .unwrap_or_default()
    }

    fn refresh_cache_after_save(&self, type_name: &str, id: ObjectId, chain: &[&EntityType], shared: &SharedObject) {
        let obj = shared.read().unwrap();
        let mut columns = BTreeMap::new();
        for ancestor in chain {
            for field in ancestor.own_fields.iter().filter(|f| f.is_persisted() && f.kind != FieldKind::Complex) {
                columns.insert(field.column_name.clone(), obj.get(&field.column_name));
            }
            for field in ancestor.own_fields.iter().filter(|f| f.kind == FieldKind::Complex) {
                columns.insert(field.column_name.clone(), obj.get(&field.column_name));
            }
        }
        self.cache.put(type_name, id, ObjectRecord { columns, list_keys: BTreeMap::new() });
    }
}

fn entry_table_for(field: &FieldSpec, owner_table: &str) -> String {
    field
        .entry_table_name
        .clone()
        .unwrap_or_else(|| naming::entry_table_name(owner_table, &field.name))
}

fn item_row(item: &FieldValue) -> BTreeMap<String, FieldValue> {
    let mut row = BTreeMap::new();
    row.insert(naming::ENTRY_ELEMENT_COLUMN.to_string(), item.clone());
    row
}

fn unique_group_names(chain: &[&EntityType]) -> Vec<String> {
    let mut names = Vec::new();
    for ancestor in chain {
        for field in &ancestor.own_fields {
            if let Some(g) = &field.unique_group {
                if !names.contains(g) {
                    names.push(g.clone());
                }
            }
        }
    }
    names
}

fn fields_in_unique_group<'b>(chain: &[&'b EntityType], group: &str) -> Vec<&'b FieldSpec> {
    chain
        .iter()
        .flat_map(|et| et.own_fields.iter())
        .filter(|f| f.unique_group.as_deref() == Some(group))
        .collect()
}
