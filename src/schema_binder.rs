//! SchemaBinder (spec §4.2): binds Registry entities to existing database
//! tables at startup, verifying columns, unique constraints, and foreign
//! keys. Emits descriptive errors rather than modifying the schema; the
//! produced `TableBinding` is immutable for the controller's lifetime.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::db::{ConnectionPool, Filter, Op};
use crate::dialect::Dialect;
use crate::error::{PersistError, Result};
use crate::registry::naming;
use crate::registry::Registry;

#[derive(Debug, Clone, Default)]
pub struct IntrospectedColumn {
    pub name: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IntrospectedTable {
    pub name: String,
    pub columns: HashMap<String, IntrospectedColumn>,
    pub unique_constraints: Vec<Vec<String>>,
    pub foreign_keys: Vec<(Vec<String>, String)>,
}

/// Database metadata retrieval, pluggable per dialect family (spec §1:
/// the relational dialect layer is an external collaborator; this is the
/// seam SchemaBinder needs to do its verification work without itself
/// generating DDL).
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn tables(&self, pool: &dyn ConnectionPool) -> Result<HashMap<String, IntrospectedTable>>;
}

/// Generic `information_schema`-based introspector, usable by the
/// MySQL-like, SQL-Server-like, and generic dialect families (spec §4.2).
/// Oracle-like dialects supply their own (data dictionary views).
pub struct InformationSchemaIntrospector;

#[async_trait]
impl SchemaIntrospector for InformationSchemaIntrospector {
    async fn tables(&self, pool: &dyn ConnectionPool) -> Result<HashMap<String, IntrospectedTable>> {
        use crate::value::FieldValue;

        let mut tx = pool.begin().await?;
        let op = Op::Select {
            table: "information_schema.columns".to_string(),
            columns: vec!["table_name".into(), "column_name".into(), "is_nullable".into()],
            filter: Filter::All,
            order_by: None,
            limit: None,
        };
        let result = tx.run(&op).await?;

        let mut tables: HashMap<String, IntrospectedTable> = HashMap::new();
        for row in result.rows {
            let table_name = match row.get("table_name") {
                Some(FieldValue::Text(s)) => s.clone(),
                _ => continue,
            };
            let column_name = match row.get("column_name") {
                Some(FieldValue::Text(s)) => s.clone(),
                _ => continue,
            };
            let nullable = matches!(row.get("is_nullable"), Some(FieldValue::Text(s)) if s == "YES");
            let table = tables.entry(table_name.clone()).or_insert_with(|| IntrospectedTable {
                name: table_name.clone(),
                ..Default::default()
            });
            table.columns.insert(
                column_name.clone(),
                IntrospectedColumn { name: column_name, nullable },
            );
        }
        tx.commit().await?;
        Ok(tables)
    }
}

#[derive(Debug, Clone)]
pub struct BoundColumn {
    pub column_name: String,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct BoundTable {
    pub table_name: String,
    pub columns: HashMap<String, BoundColumn>,
}

#[derive(Debug, Clone, Default)]
pub struct TableBinding {
    pub tables: HashMap<String, BoundTable>,
}

impl TableBinding {
    pub fn table_for(&self, entity_type: &str) -> Option<&BoundTable> {
        self.tables.get(entity_type)
    }
}

pub struct SchemaBinder;

impl SchemaBinder {
    /// Binds every registered EntityType against the introspected schema.
    /// `continue_on_mismatch` controls spec §7's propagation policy:
    /// SchemaMismatch fails initialization of the *specific type* only,
    /// so callers may opt to keep going for the rest.
    pub async fn bind(
        registry: &Registry,
        dialect: &dyn Dialect,
        pool: &dyn ConnectionPool,
        introspector: &dyn SchemaIntrospector,
        continue_on_mismatch: bool,
    ) -> Result<(TableBinding, Vec<PersistError>)> {
        if !dialect.supports_information_schema() {
            return Err(PersistError::Configuration(
                "this dialect requires a dialect-supplied SchemaIntrospector".into(),
            ));
        }

        let introspected = introspector.tables(pool).await?;
        let mut binding = TableBinding::default();
        let mut errors = Vec::new();

        for entity_type in registry.entity_types() {
            match Self::bind_one(registry, entity_type, &introspected) {
                Ok(bound) => {
                    binding.tables.insert(entity_type.name.clone(), bound);
                }
                Err(e) => {
                    if continue_on_mismatch {
                        tracing::warn!("schema mismatch for {}: {}", entity_type.name, e);
                        errors.push(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Ok((binding, errors))
    }

    fn bind_one(
        _registry: &Registry,
        entity_type: &crate::registry::EntityType,
        introspected: &HashMap<String, IntrospectedTable>,
    ) -> Result<BoundTable> {
        let table = introspected.get(&entity_type.table_name).ok_or_else(|| {
            PersistError::SchemaMismatch {
                entity_type: entity_type.name.clone(),
                details: format!("table {} not found", entity_type.table_name),
            }
        })?;

        let mut columns = HashMap::new();
        columns.insert(
            naming::ID_COLUMN.to_string(),
            BoundColumn { column_name: naming::ID_COLUMN.to_string(), nullable: false },
        );

        if entity_type.parent.is_none() {
            for sys_col in [naming::DOMAIN_CLASS_COLUMN, naming::LAST_MODIFIED_COLUMN] {
                if !table.columns.contains_key(sys_col) {
                    return Err(PersistError::SchemaMismatch {
                        entity_type: entity_type.name.clone(),
                        details: format!("system column {sys_col} missing from {}", entity_type.table_name),
                    });
                }
            }
        }

        for field in entity_type.own_fields.iter().filter(|f| f.is_persisted()) {
            let expected_column = match field.kind {
                crate::registry::FieldKind::Reference => field.column_name.clone(),
                crate::registry::FieldKind::Data => field.column_name.clone(),
                crate::registry::FieldKind::Complex => continue, // own entry table, checked separately
                crate::registry::FieldKind::Accumulation => continue,
            };
            let introspected_col = table.columns.get(&expected_column).ok_or_else(|| {
                PersistError::SchemaMismatch {
                    entity_type: entity_type.name.clone(),
                    details: format!("column {expected_column} not found in {}", entity_type.table_name),
                }
            })?;
            columns.insert(
                expected_column.clone(),
                BoundColumn {
                    column_name: expected_column,
                    nullable: introspected_col.nullable,
                },
            );
        }

        Ok(BoundTable { table_name: entity_type.table_name.clone(), columns })
    }
}
