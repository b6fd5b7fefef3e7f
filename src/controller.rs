//! PersistenceController (spec §5/§9 design notes: "encapsulate [process-
//! wide mutable state] in a controller object passed explicitly; no
//! singletons"). Owns the connection pool and every piece of per-instance
//! state — Registry, ObjectStore, RecordCache, IdGenerator, ValueCodec, the
//! bound schema, and the exclusive-allocation bookkeeping — and hands out
//! short-lived Loader/Saver/Deleter/ExclusiveAllocator facades per call,
//! mirroring the teacher's `database::DatabaseManager` owning a `PgPool`
//! and constructing a fresh repository per operation.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::config::PersistenceConfig;
use crate::crypto::CryptoKey;
use crate::db::{ConnectionPool, Filter};
use crate::deleter::Deleter;
use crate::dialect::Dialect;
use crate::error::{PersistError, Result};
use crate::exclusive_allocator::{AllocationCounters, ExclusiveAllocator};
use crate::id_generator::IdGenerator;
use crate::loader::{LoadOutcome, Loader};
use crate::object::Object;
use crate::object_store::{ObjectStore, SharedObject};
use crate::record_cache::RecordCache;
use crate::registry::Registry;
use crate::saver::Saver;
use crate::schema_binder::{SchemaBinder, SchemaIntrospector, TableBinding};
use crate::value::{ObjectId, ValueCodec};

pub struct PersistenceController {
    pub config: PersistenceConfig,
    pool: Arc<dyn ConnectionPool>,
    registry: Registry,
    store: ObjectStore,
    cache: RecordCache,
    id_gen: IdGenerator,
    codec: ValueCodec,
    binding: RwLock<Option<TableBinding>>,
    lock_held: RwLock<HashSet<(String, ObjectId)>>,
    lock_counters: AllocationCounters,
}

impl PersistenceController {
    pub fn new(config: PersistenceConfig, pool: Arc<dyn ConnectionPool>, registry: Registry) -> Self {
        let crypto_key = config
            .crypt_password
            .as_ref()
            .zip(config.crypt_salt.as_ref())
            .map(|(password, salt)| CryptoKey::derive(password, salt));
        let codec = ValueCodec::new(crypto_key);
        Self {
            config,
            pool,
            registry,
            store: ObjectStore::new(),
            cache: RecordCache::new(),
            id_gen: IdGenerator::new(0),
            codec,
            binding: RwLock::new(None),
            lock_held: RwLock::new(HashSet::new()),
            lock_counters: AllocationCounters::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn lock_counters(&self) -> &AllocationCounters {
        &self.lock_counters
    }

    /// Binds the Registry against the live schema (spec §4.2). Every other
    /// method here that touches the database needs a binding first.
    pub async fn bind_schema(
        &self,
        dialect: &dyn Dialect,
        introspector: &dyn SchemaIntrospector,
        continue_on_mismatch: bool,
    ) -> Result<Vec<PersistError>> {
        let (binding, errors) =
            SchemaBinder::bind(&self.registry, dialect, self.pool.as_ref(), introspector, continue_on_mismatch).await?;
        *self.binding.write().unwrap() = Some(binding);
        Ok(errors)
    }

    /// Installs a pre-computed binding directly, bypassing live
    /// introspection. Useful for tests and for deployments that trust a
    /// schema snapshot captured at build time rather than paying a startup
    /// round trip.
    pub fn set_table_binding(&self, binding: TableBinding) {
        *self.binding.write().unwrap() = Some(binding);
    }

    fn binding(&self) -> Result<TableBinding> {
        self.binding
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| PersistError::Configuration("schema not bound; call bind_schema first".into()))
    }

    fn loader(&self, binding: &TableBinding) -> Loader<'_> {
        Loader {
            registry: &self.registry,
            binding,
            store: &self.store,
            cache: &self.cache,
            codec: &self.codec,
            id_gen: &self.id_gen,
        }
    }

    fn saver(&self) -> Saver<'_> {
        Saver { registry: &self.registry, store: &self.store, cache: &self.cache, codec: &self.codec }
    }

    fn allocator<'s>(&'s self, saver: &'s Saver<'s>) -> ExclusiveAllocator<'s> {
        ExclusiveAllocator {
            registry: &self.registry,
            store: &self.store,
            saver,
            held: &self.lock_held,
            counters: &self.lock_counters,
        }
    }

    /// Constructs a new object via its EntityType's factory and registers
    /// it (spec §4.3 `create`).
    pub fn create(&self, type_name: &str, init: impl FnOnce(&mut Object)) -> Option<SharedObject> {
        self.store.create(&self.registry, &self.id_gen, type_name, init)
    }

    pub async fn synchronize(&self, exclude: &[&str]) -> Result<LoadOutcome> {
        let binding = self.binding()?;
        let cutoff = self.config.data_horizon_period.map(|d| d.to_std().unwrap_or_default());
        self.loader(&binding).synchronize(self.pool.as_ref(), exclude, Utc::now(), cutoff).await
    }

    pub async fn load_only(&self, type_name: &str, where_clause: Option<&str>, max_count: Option<usize>) -> Result<LoadOutcome> {
        let binding = self.binding()?;
        self.loader(&binding).load_only(self.pool.as_ref(), type_name, where_clause, max_count).await
    }

    pub async fn reload(&self, type_name: &str, id: ObjectId) -> Result<bool> {
        let binding = self.binding()?;
        self.loader(&binding).reload(self.pool.as_ref(), type_name, id).await
    }

    pub async fn save(&self, obj: &SharedObject) -> Result<()> {
        self.saver().save(self.pool.as_ref(), obj).await
    }

    pub async fn delete(&self, obj: &SharedObject) -> Result<()> {
        let deleter = Deleter { registry: &self.registry, store: &self.store, cache: &self.cache };
        deleter.delete(self.pool.as_ref(), obj).await
    }

    pub async fn allocate_exclusively(
        &self,
        type_name: &str,
        lock_type: &str,
        where_filter: Filter,
        max: usize,
        update_fn: Option<&(dyn Fn(&mut Object) + Sync)>,
    ) -> Result<Vec<SharedObject>> {
        let saver = self.saver();
        self.allocator(&saver)
            .allocate_exclusively(self.pool.as_ref(), type_name, lock_type, where_filter, max, update_fn)
            .await
    }

    pub async fn allocate_one_exclusively(
        &self,
        obj: &SharedObject,
        lock_type: &str,
        update_fn: Option<&(dyn Fn(&mut Object) + Sync)>,
    ) -> Result<bool> {
        let saver = self.saver();
        self.allocator(&saver).allocate_one_exclusively(self.pool.as_ref(), obj, lock_type, update_fn).await
    }

    pub async fn release(
        &self,
        obj: &SharedObject,
        lock_type: &str,
        update_fn: Option<&(dyn Fn(&mut Object) + Sync)>,
    ) -> Result<()> {
        let saver = self.saver();
        self.allocator(&saver).release(self.pool.as_ref(), obj, lock_type, update_fn).await
    }

    pub async fn release_many(&self, objects: &[SharedObject], lock_type: &str) -> Result<()> {
        let saver = self.saver();
        self.allocator(&saver).release_many(self.pool.as_ref(), objects, lock_type).await
    }

    pub async fn compute_exclusively(
        &self,
        type_name: &str,
        lock_type: &str,
        where_filter: Filter,
        max: usize,
        update_fn: &(dyn Fn(&mut Object) + Sync),
    ) -> Result<Vec<SharedObject>> {
        let saver = self.saver();
        self.allocator(&saver)
            .compute_exclusively(self.pool.as_ref(), type_name, lock_type, where_filter, max, update_fn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EntityTypeSpec, FieldKind, FieldSpec, ValueShape};
    use crate::schema_binder::{BoundColumn, BoundTable};
    use crate::testkit::InMemoryPool;
    use crate::value::FieldValue;
    use std::collections::HashMap as StdHashMap;
    use std::collections::HashMap;

    fn widget_factory() -> StdHashMap<String, FieldValue> {
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
                factory: Some(widget_factory),
                delete_guard: None,
            })
            .build()
            .unwrap()
    }

    fn widget_binding() -> TableBinding {
        let mut columns = HashMap::new();
        for col in ["ID", "DOMAIN_CLASS", "LAST_MODIFIED", "NAME"] {
            columns.insert(col.to_string(), BoundColumn { column_name: col.to_string(), nullable: col == "NAME" });
        }
        let mut binding = TableBinding::default();
        binding.tables.insert("Widget".to_string(), BoundTable { table_name: "DOM_WIDGET".to_string(), columns });
        binding
    }

    #[tokio::test]
    async fn create_save_delete_round_trip() {
        let registry = build_registry();
        let pool: Arc<dyn ConnectionPool> = Arc::new(InMemoryPool::new());
        let controller = PersistenceController::new(PersistenceConfig::default(), pool, registry);
        controller.set_table_binding(widget_binding());

        let widget = controller.create("Widget", |o| o.set("NAME", FieldValue::Text("gizmo".into()))).unwrap();
        controller.save(&widget).await.unwrap();
        assert!(widget.read().unwrap().stored);
        assert!(controller.store().find_by_id("Widget", widget.read().unwrap().id).is_some());

        controller.delete(&widget).await.unwrap();
        assert!(controller.store().find_by_id("Widget", widget.read().unwrap().id).is_none());
    }
}
