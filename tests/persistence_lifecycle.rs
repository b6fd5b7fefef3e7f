//! End-to-end lifecycle coverage against the in-memory testkit pool:
//! create/save/synchronize round trip, data-horizon eviction, exclusive
//! allocation across two independent controller instances, and
//! veto-checked cascaded delete.

use std::collections::HashMap as StdHashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use domain_store::config::PersistenceConfig;
use domain_store::db::{ConnectionPool, Filter, Op};
use domain_store::registry::naming;
use domain_store::registry::{EntityTypeSpec, FieldKind, FieldSpec, Registry, ValueShape};
use domain_store::schema_binder::{BoundColumn, BoundTable, TableBinding};
use domain_store::testkit::InMemoryPool;
use domain_store::value::FieldValue;
use domain_store::PersistenceController;

fn order_factory() -> StdHashMap<String, FieldValue> {
    StdHashMap::new()
}

fn line_factory() -> StdHashMap<String, FieldValue> {
    let mut m = StdHashMap::new();
    m.insert("ORDER_ID".to_string(), FieldValue::Reference(None));
    m
}

fn data_field(owner: &str, name: &str, column: &str) -> FieldSpec {
    FieldSpec {
        owner: owner.into(),
        name: name.into(),
        kind: FieldKind::Data,
        shape: ValueShape::Text { max_len: Some(64) },
        nullable: true,
        unique_group: None,
        column_size: Some(64),
        is_encrypted: false,
        is_secret_for_logging: false,
        created_in: None,
        changed_in: vec![],
        removed_in: None,
        accumulation_inverse_of: None,
        column_name: column.into(),
        entry_table_name: None,
    }
}

fn reference_field(owner: &str, name: &str, column: &str, target: &str) -> FieldSpec {
    FieldSpec {
        shape: ValueShape::Reference { target: target.into(), on_delete_cascade: false },
        kind: FieldKind::Reference,
        ..data_field(owner, name, column)
    }
}

fn build_registry() -> Registry {
    Registry::builder()
        .register_types(vec![
            EntityTypeSpec {
                name: "Order".into(),
                parent: None,
                is_object_type: true,
                is_data_horizon_controlled: true,
                fields: vec![data_field("Order", "label", "LABEL")],
                factory: Some(order_factory),
                delete_guard: None,
            },
            EntityTypeSpec {
                name: "Line".into(),
                parent: None,
                is_object_type: true,
                is_data_horizon_controlled: false,
                fields: vec![reference_field("Line", "order", "ORDER_ID", "Order")],
                factory: Some(line_factory),
                delete_guard: None,
            },
        ])
        .build()
        .unwrap()
}

fn bound_table(table_name: &str, columns: &[(&str, bool)]) -> BoundTable {
    let mut cols = StdHashMap::new();
    for (name, nullable) in columns {
        cols.insert(name.to_string(), BoundColumn { column_name: name.to_string(), nullable: *nullable });
    }
    BoundTable { table_name: table_name.to_string(), columns: cols }
}

fn full_binding() -> TableBinding {
    let mut binding = TableBinding::default();
    binding.tables.insert(
        "Order".to_string(),
        bound_table("DOM_ORDER", &[("ID", false), ("DOMAIN_CLASS", false), ("LAST_MODIFIED", false), ("LABEL", true)]),
    );
    binding.tables.insert(
        "Line".to_string(),
        bound_table("DOM_LINE", &[("ID", false), ("DOMAIN_CLASS", false), ("LAST_MODIFIED", false), ("ORDER_ID", true)]),
    );
    binding
}

#[tokio::test]
async fn create_save_and_reload_round_trip() {
    let pool: Arc<dyn ConnectionPool> = Arc::new(InMemoryPool::new());
    let controller = PersistenceController::new(PersistenceConfig::default(), pool, build_registry());
    controller.set_table_binding(full_binding());

    let order = controller.create("Order", |o| o.set("LABEL", FieldValue::Text("first".into()))).unwrap();
    let order_id = order.read().unwrap().id;
    controller.save(&order).await.unwrap();

    // Evict the in-memory view and reload straight from the (fake)
    // database; the reloaded object must carry the same field values.
    controller.store().unregister("Order", order_id);
    let changed = controller.reload("Order", order_id).await.unwrap();
    assert!(changed);
    let reloaded = controller.store().find_by_id("Order", order_id).unwrap();
    assert_eq!(reloaded.read().unwrap().get("LABEL"), FieldValue::Text("first".into()));
}

#[tokio::test]
async fn data_horizon_evicts_unreferenced_and_keeps_referenced() {
    let raw_pool = InMemoryPool::new();
    let pool: Arc<dyn ConnectionPool> = Arc::new(raw_pool.clone());
    let config = PersistenceConfig { data_horizon_period: Some(Duration::hours(1)), ..PersistenceConfig::default() };
    let controller = PersistenceController::new(config, pool, build_registry());
    controller.set_table_binding(full_binding());

    let kept = controller.create("Order", |o| o.set("LABEL", FieldValue::Text("kept".into()))).unwrap();
    let kept_id = kept.read().unwrap().id;
    controller.save(&kept).await.unwrap();

    let stale = controller.create("Order", |o| o.set("LABEL", FieldValue::Text("stale".into()))).unwrap();
    let stale_id = stale.read().unwrap().id;
    controller.save(&stale).await.unwrap();

    // Backdate `stale` past the data horizon cutoff directly in the fake
    // database, as if it simply hadn't been touched in a long time.
    {
        let mut tx = raw_pool.begin().await.unwrap();
        tx.run(&Op::Update {
            table: "DOM_ORDER".to_string(),
            set: [(naming::LAST_MODIFIED_COLUMN.to_string(), FieldValue::DateTime(Utc::now() - Duration::hours(2)))].into(),
            filter: Filter::Eq(naming::ID_COLUMN.to_string(), FieldValue::BigInt(stale_id as i64)),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    // A Line referencing `kept` keeps it reachable across synchronize;
    // nothing references `stale`.
    let line = controller.create("Line", |o| o.set("ORDER_ID", FieldValue::Reference(Some(kept_id)))).unwrap();
    controller.save(&line).await.unwrap();

    controller.synchronize(&[]).await.unwrap();
    assert!(controller.store().find_by_id("Order", kept_id).is_some());
    assert!(controller.store().find_by_id("Order", stale_id).is_none());
}

#[tokio::test]
async fn exclusive_allocation_blocks_a_second_controller_on_the_same_row() {
    let shared_pool = InMemoryPool::new();
    let pool_a: Arc<dyn ConnectionPool> = Arc::new(shared_pool.clone());
    let pool_b: Arc<dyn ConnectionPool> = Arc::new(shared_pool);

    let controller_a = PersistenceController::new(PersistenceConfig::default(), pool_a, build_registry());
    controller_a.set_table_binding(full_binding());
    let order = controller_a.create("Order", |o| o.set("LABEL", FieldValue::Text("job".into()))).unwrap();
    let order_id = order.read().unwrap().id;
    controller_a.save(&order).await.unwrap();

    let won = controller_a
        .allocate_one_exclusively(&order, "fulfillment", None)
        .await
        .unwrap();
    assert!(won);
    assert_eq!(controller_a.lock_counters().successful(), 1);

    // `controller_b` represents a second process pointed at the same
    // database; it has to load the Order itself before it can contend for
    // the same shadow row.
    let controller_b = PersistenceController::new(PersistenceConfig::default(), pool_b, build_registry());
    controller_b.set_table_binding(full_binding());
    controller_b.reload("Order", order_id).await.unwrap();
    let order_seen_by_b = controller_b.store().find_by_id("Order", order_id).unwrap();

    let lost = controller_b
        .allocate_one_exclusively(&order_seen_by_b, "fulfillment", None)
        .await
        .unwrap();
    assert!(!lost);
    assert_eq!(controller_b.lock_counters().cross_instance_collisions(), 1);

    controller_a.release(&order, "fulfillment", None).await.unwrap();
}

#[tokio::test]
async fn cascade_delete_removes_referencing_line() {
    let pool: Arc<dyn ConnectionPool> = Arc::new(InMemoryPool::new());
    let controller = PersistenceController::new(PersistenceConfig::default(), pool, build_registry());
    controller.set_table_binding(full_binding());

    let order = controller.create("Order", |o| o.set("LABEL", FieldValue::Text("to-delete".into()))).unwrap();
    let order_id = order.read().unwrap().id;
    controller.save(&order).await.unwrap();

    let line = controller.create("Line", |o| o.set("ORDER_ID", FieldValue::Reference(Some(order_id)))).unwrap();
    let line_id = line.read().unwrap().id;
    controller.save(&line).await.unwrap();

    controller.delete(&order).await.unwrap();
    assert!(controller.store().find_by_id("Order", order_id).is_none());
    assert!(controller.store().find_by_id("Line", line_id).is_none());
}
