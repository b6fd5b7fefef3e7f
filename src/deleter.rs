//! Deleter (spec §4.9): reachability-checked cascaded deletion.
//!
//! `delete` walks the transitive reference closure of a root object,
//! consults each participant's `can_be_deleted()` veto before touching the
//! database, then removes children-first in a single transaction. A
//! data-horizon-controlled descendant that was never loaded into the
//! ObjectStore is not part of this closure at all; it is removed by the
//! `ON DELETE CASCADE` the schema already carries for that foreign key.

use std::collections::HashSet;

use crate::db::{ConnectionPool, Filter, Op};
use crate::error::{PersistError, Result};
use crate::object_store::{ObjectStore, SharedObject};
use crate::record_cache::RecordCache;
use crate::registry::field_spec::FieldKind;
use crate::registry::naming;
use crate::registry::Registry;
use crate::value::{FieldValue, ObjectId};

pub struct Deleter<'a> {
    pub registry: &'a Registry,
    pub store: &'a ObjectStore,
    pub cache: &'a RecordCache,
}

/// One participant in a delete's reachability closure.
struct Participant {
    type_name: String,
    id: ObjectId,
    shared: SharedObject,
}

impl<'a> Deleter<'a> {
    pub async fn delete(&self, pool: &dyn ConnectionPool, root: &SharedObject) -> Result<()> {
        let (root_type, root_id) = {
            let o = root.read().unwrap();
            (o.type_name.clone(), o.id)
        };

        // Step 1: collect obj and all direct/indirect referencing children,
        // then check the veto hook on every participant before mutating
        // anything.
        let closure = self.collect_closure(&root_type, root_id, root.clone());
        for p in &closure {
            if let Some(guard) = self.registry.delete_guard(&p.type_name) {
                let allowed = guard(&p.shared.read().unwrap());
                if !allowed {
                    return Err(PersistError::Constraint {
                        entity_type: p.type_name.clone(),
                        field: String::new(),
                        details: format!("delete of {}#{} vetoed by can_be_deleted()", p.type_name, p.id),
                    });
                }
            }
        }

        // Step 2: children-first DELETE in one transaction. `closure` is
        // discovery order (root first, then its referrers, then theirs);
        // deleting it in reverse puts the deepest referrers first.
        let mut tx = pool.begin().await?;
        for p in closure.iter().rev() {
            let chain = self.registry.ancestor_chain_root_first(&p.type_name);
            for ancestor in chain.iter().rev() {
                let result = tx
                    .run(&Op::Delete {
                        table: ancestor.table_name.clone(),
                        filter: Filter::Eq(naming::ID_COLUMN.to_string(), FieldValue::BigInt(p.id as i64)),
                    })
                    .await;
                if let Err(e) = result {
                    tracing::warn!("delete failed for {}#{}: {e}", p.type_name, p.id);
                    tx.rollback().await?;
                    self.reregister(&closure);
                    return Err(e);
                }
            }
        }
        tx.commit().await?;

        // Step 3: unregister and drop ObjectRecords only after the
        // transaction has durably committed.
        for p in &closure {
            self.store.unregister(&p.type_name, p.id);
            self.cache.remove(&p.type_name, p.id);
        }
        Ok(())
    }

    /// Breadth-first walk of the reference graph, following edges backward
    /// (from a target to everything that references it). Visits each
    /// `(type, id)` once; a reference cycle just means the BFS frontier
    /// stops growing once everyone involved has been visited.
    fn collect_closure(&self, root_type: &str, root_id: ObjectId, root: SharedObject) -> Vec<Participant> {
        let mut visited: HashSet<(String, ObjectId)> = HashSet::new();
        visited.insert((root_type.to_string(), root_id));
        let mut ordered = vec![Participant {
            type_name: root_type.to_string(),
            id: root_id,
            shared: root,
        }];
        let mut frontier = vec![(root_type.to_string(), root_id)];

        while let Some((type_name, id)) = frontier.pop() {
            for referrer_type in self.store.registered_types() {
                for field in self.registry.all_persisted_fields_root_first(&referrer_type) {
                    if field.kind != FieldKind::Reference || !self.targets(field.reference_target(), &type_name) {
                        continue;
                    }
                    for referrer in self.store.accumulation(&referrer_type, &field.column_name, id) {
                        let referrer_id = referrer.read().unwrap().id;
                        let key = (referrer_type.clone(), referrer_id);
                        if visited.insert(key.clone()) {
                            ordered.push(Participant {
                                type_name: referrer_type.clone(),
                                id: referrer_id,
                                shared: referrer,
                            });
                            frontier.push(key);
                        }
                    }
                }
            }
        }
        ordered
    }

    /// Whether a reference field declared with target `target` can point at
    /// an instance of `candidate_type` — true if `target` names
    /// `candidate_type` itself or one of its ancestors.
    fn targets(&self, target: Option<&str>, candidate_type: &str) -> bool {
        match target {
            Some(target) => self
                .registry
                .ancestor_chain_leaf_first(candidate_type)
                .iter()
                .any(|et| et.name == target),
            None => false,
        }
    }

    /// Failure recovery (spec §4.9 step 4): every participant unregistered
    /// in this call is still a live, valid in-memory Object (nothing was
    /// mutated before the rolled-back transaction), so re-registering it is
    /// just re-admitting it to the store; its ObjectRecord was never
    /// touched and needs no resynthesis.
    fn reregister(&self, closure: &[Participant]) {
        for p in closure {
            self.store.register(p.shared.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Transaction;
    use crate::id_generator::IdGenerator;
    use crate::registry::{EntityTypeSpec, FieldSpec, Registry, ValueShape};
    use crate::testkit::InMemoryPool;
    use crate::value::FieldValue;
    use std::collections::HashMap as StdHashMap;

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
                    is_data_horizon_controlled: false,
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

    #[tokio::test]
    async fn deletes_root_and_its_referencing_children() {
        let registry = build_registry();
        let store = ObjectStore::new();
        let cache = RecordCache::new();
        let id_gen = IdGenerator::new(0);
        let pool = InMemoryPool::new();
        pool.seed_table("DOM_ORDER", vec![]);
        pool.seed_table("DOM_LINE", vec![]);

        let order = store.create(&registry, &id_gen, "Order", |_| {}).unwrap();
        let order_id = order.read().unwrap().id;
        let line = store
            .create(&registry, &id_gen, "Line", |o| o.set("ORDER_ID", FieldValue::Reference(Some(order_id))))
            .unwrap();
        let line_id = line.read().unwrap().id;

        {
            let mut tx = pool.begin().await.unwrap();
            tx.run(&Op::Insert {
                table: "DOM_ORDER".into(),
                values: [(naming::ID_COLUMN.to_string(), FieldValue::BigInt(order_id as i64))].into(),
            })
            .await
            .unwrap();
            tx.run(&Op::Insert {
                table: "DOM_LINE".into(),
                values: [
                    (naming::ID_COLUMN.to_string(), FieldValue::BigInt(line_id as i64)),
                    ("ORDER_ID".to_string(), FieldValue::BigInt(order_id as i64)),
                ]
                .into(),
            })
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let deleter = Deleter { registry: &registry, store: &store, cache: &cache };
        deleter.delete(&pool, &order).await.unwrap();

        assert_eq!(pool.row_count("DOM_ORDER"), 0);
        assert_eq!(pool.row_count("DOM_LINE"), 0);
        assert!(store.find_by_id("Order", order_id).is_none());
        assert!(store.find_by_id("Line", line_id).is_none());
    }

    #[tokio::test]
    async fn veto_aborts_without_mutating_database() {
        fn never_delete(_: &crate::object::Object) -> bool {
            false
        }

        let mut registry = build_registry();
        // Re-register Order with a delete guard that always vetoes, without
        // rebuilding the whole fixture.
        registry = Registry::builder()
            .register_types(vec![
                EntityTypeSpec {
                    name: "Order".into(),
                    parent: None,
                    is_object_type: true,
                    is_data_horizon_controlled: false,
                    fields: vec![data_field("Order", "label", "LABEL")],
                    factory: Some(order_factory),
                    delete_guard: Some(never_delete),
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
            .unwrap();

        let store = ObjectStore::new();
        let cache = RecordCache::new();
        let id_gen = IdGenerator::new(0);
        let pool = InMemoryPool::new();
        pool.seed_table("DOM_ORDER", vec![]);

        let order = store.create(&registry, &id_gen, "Order", |_| {}).unwrap();
        let order_id = order.read().unwrap().id;
        {
            let mut tx = pool.begin().await.unwrap();
            tx.run(&Op::Insert {
                table: "DOM_ORDER".into(),
                values: [(naming::ID_COLUMN.to_string(), FieldValue::BigInt(order_id as i64))].into(),
            })
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let deleter = Deleter { registry: &registry, store: &store, cache: &cache };
        let result = deleter.delete(&pool, &order).await;
        assert!(result.is_err());
        assert_eq!(pool.row_count("DOM_ORDER"), 1);
        assert!(store.find_by_id("Order", order_id).is_some());
    }
}
