//! Registry (spec §4.1): enumerates entity types, classifies fields,
//! computes canonical SQL names, detects reference cycles.
//!
//! The application domain model itself (concrete entity types with their
//! fields and inheritance) is out of scope for the core (spec §1) — it is
//! consumed here through `EntityTypeSpec`/`register_types`, standing in
//! for the reflective `register_package` of the source system.

pub mod cycles;
pub mod entity_type;
pub mod field_spec;
pub mod naming;

use std::collections::{HashMap, HashSet};

use crate::error::{PersistError, Result};
pub use entity_type::{DeleteGuard, EntityType, Factory};
pub use field_spec::{ComplexShape, FieldKind, FieldSpec, FieldVersion, ValueShape};

/// Application-supplied description of one entity type, as it would come
/// from reflecting over a domain model (out of core scope — see module
/// docs).
#[derive(Clone)]
pub struct EntityTypeSpec {
    pub name: String,
    pub parent: Option<String>,
    pub is_object_type: bool,
    pub is_data_horizon_controlled: bool,
    pub fields: Vec<FieldSpec>,
    pub factory: Option<Factory>,
    pub delete_guard: Option<DeleteGuard>,
}

pub struct Registry {
    entity_types: HashMap<String, EntityType>,
    cycles: Vec<Vec<String>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.get(name)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.values()
    }

    /// Ancestor chain, root-first, ending with `name` itself. Spec §3: "an
    /// object-type's persistent image spans its whole chain of ancestor
    /// EntityTypes."
    pub fn ancestor_chain_root_first(&self, name: &str) -> Vec<&EntityType> {
        let mut chain = self.ancestor_chain_leaf_first(name);
        chain.reverse();
        chain
    }

    pub fn ancestor_chain_leaf_first(&self, name: &str) -> Vec<&EntityType> {
        let mut chain = Vec::new();
        let mut cursor = Some(name.to_string());
        while let Some(n) = cursor {
            if let Some(et) = self.entity_types.get(&n) {
                chain.push(et);
                cursor = et.parent.clone();
            } else {
                break;
            }
        }
        chain
    }

    /// All persisted fields (Data + Reference) across the ancestor chain,
    /// root table first, matching insert order (parent rows must exist
    /// before child rows reference them).
    pub fn all_persisted_fields_root_first(&self, name: &str) -> Vec<&FieldSpec> {
        self.ancestor_chain_root_first(name)
            .into_iter()
            .flat_map(|et| et.own_fields.iter())
            .filter(|f| f.is_persisted())
            .collect()
    }

    /// The nearest delete guard in `name`'s ancestor chain, leaf first.
    pub fn delete_guard(&self, name: &str) -> Option<entity_type::DeleteGuard> {
        self.ancestor_chain_leaf_first(name)
            .into_iter()
            .find_map(|et| et.delete_guard)
    }

    pub fn cycles(&self) -> &[Vec<String>] {
        &self.cycles
    }

    pub fn is_in_cycle(&self, a: &str, b: &str) -> bool {
        self.cycles.iter().any(|c| c.contains(&a.to_string()) && c.contains(&b.to_string()))
    }

    pub fn table_name(&self, type_name: &str) -> Option<&str> {
        self.entity_types.get(type_name).map(|et| et.table_name.as_str())
    }

    /// Reference fields on `type_name` (own fields only, not ancestors).
    pub fn reference_fields(&self, type_name: &str) -> Vec<&FieldSpec> {
        self.entity_types
            .get(type_name)
            .map(|et| {
                et.own_fields
                    .iter()
                    .filter(|f| f.kind == FieldKind::Reference)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Accumulation fields across the whole registry whose inverse is
    /// `reference_field` on `referring_type`, declared on `target_type`.
    pub fn accumulations_for(&self, target_type: &str, reference_field: &str) -> Vec<(&EntityType, &FieldSpec)> {
        self.entity_types
            .get(target_type)
            .into_iter()
            .flat_map(|et| {
                et.own_fields.iter().filter_map(move |f| {
                    if f.kind == FieldKind::Accumulation
                        && f.accumulation_inverse_of.as_deref() == Some(reference_field)
                    {
                        Some((et, f))
                    } else {
                        None
                    }
                })
            })
            .collect()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    specs: Vec<EntityTypeSpec>,
}

impl RegistryBuilder {
    pub fn register_type(mut self, spec: EntityTypeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn register_types(mut self, specs: impl IntoIterator<Item = EntityTypeSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    pub fn build(self) -> Result<Registry> {
        let mut entity_types: HashMap<String, EntityType> = HashMap::new();
        let known_names: HashSet<String> = self.specs.iter().map(|s| s.name.clone()).collect();

        for spec in &self.specs {
            if spec.is_object_type && spec.factory.is_none() {
                return Err(PersistError::Registration(format!(
                    "{} is a concrete object type but has no no-argument constructor (factory) registered",
                    spec.name
                )));
            }

            if let Some(parent) = &spec.parent {
                if !known_names.contains(parent) {
                    return Err(PersistError::Registration(format!(
                        "{} declares parent {} which is not registered",
                        spec.name, parent
                    )));
                }
            }

            for field in &spec.fields {
                Self::validate_field(spec, field, &known_names)?;
            }

            let has_encrypted_fields = spec.fields.iter().any(|f| f.is_encrypted);
            entity_types.insert(
                spec.name.clone(),
                EntityType {
                    name: spec.name.clone(),
                    parent: spec.parent.clone(),
                    children: Vec::new(),
                    own_fields: spec.fields.clone(),
                    is_object_type: spec.is_object_type,
                    is_data_horizon_controlled: spec.is_data_horizon_controlled,
                    has_encrypted_fields,
                    table_name: naming::table_name(&spec.name),
                    factory: spec.factory,
                    delete_guard: spec.delete_guard,
                },
            );
        }

        // Populate children lists now that every type is present.
        let parent_links: Vec<(String, String)> = entity_types
            .values()
            .filter_map(|et| et.parent.clone().map(|p| (p, et.name.clone())))
            .collect();
        for (parent, child) in parent_links {
            if let Some(parent_et) = entity_types.get_mut(&parent) {
                parent_et.children.push(child);
            }
        }

        let mut edges: HashMap<String, HashSet<String>> = HashMap::new();
        for et in entity_types.values() {
            let entry = edges.entry(et.name.clone()).or_default();
            for f in &et.own_fields {
                if let Some(target) = f.reference_target() {
                    entry.insert(target.to_string());
                }
            }
        }
        let cycles = cycles::find_cycles(&edges);

        Ok(Registry { entity_types, cycles })
    }

    fn validate_field(spec: &EntityTypeSpec, field: &FieldSpec, known_names: &HashSet<String>) -> Result<()> {
        match &field.shape {
            ValueShape::Reference { target, .. } => {
                if field.kind != FieldKind::Reference {
                    return Err(PersistError::Registration(format!(
                        "{}.{} has a Reference shape but kind {:?}",
                        spec.name, field.name, field.kind
                    )));
                }
                if !known_names.contains(target) {
                    return Err(PersistError::Registration(format!(
                        "{}.{} references unregistered type {}",
                        spec.name, field.name, target
                    )));
                }
            }
            ValueShape::StringSerialized { type_name } => {
                // Unsupported types are a registration error unless a
                // string codec is registered (checked against the
                // ValueCodec's StringCodecRegistry at controller startup,
                // not here — the Registry only records the intent).
                if type_name.is_empty() {
                    return Err(PersistError::Registration(format!(
                        "{}.{} has an empty string-serialized type name",
                        spec.name, field.name
                    )));
                }
            }
            _ => {}
        }
        if field.kind == FieldKind::Accumulation && field.accumulation_inverse_of.is_none() {
            return Err(PersistError::Registration(format!(
                "{}.{} is an Accumulation field but names no inverse reference field",
                spec.name, field.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;
    use std::collections::HashMap as StdHashMap;

    fn empty_factory() -> StdHashMap<String, FieldValue> {
        StdHashMap::new()
    }

    fn data_field(name: &str) -> FieldSpec {
        FieldSpec {
            owner: "T".into(),
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
            column_name: naming::data_column_name(name),
            entry_table_name: None,
        }
    }

    fn reference_field(name: &str, target: &str) -> FieldSpec {
        FieldSpec {
            shape: ValueShape::Reference { target: target.into(), on_delete_cascade: false },
            kind: FieldKind::Reference,
            column_name: naming::reference_column_name(name),
            ..data_field(name)
        }
    }

    #[test]
    fn rejects_object_type_without_factory() {
        let result = Registry::builder()
            .register_type(EntityTypeSpec {
                name: "Widget".into(),
                parent: None,
                is_object_type: true,
                is_data_horizon_controlled: false,
                fields: vec![],
                factory: None,
                delete_guard: None,
            })
            .build();
        assert!(matches!(result, Err(PersistError::Registration(_))));
    }

    #[test]
    fn builds_parent_child_chain() {
        let registry = Registry::builder()
            .register_type(EntityTypeSpec {
                name: "Base".into(),
                parent: None,
                is_object_type: false,
                is_data_horizon_controlled: false,
                fields: vec![data_field("name")],
                factory: None,
                delete_guard: None,
            })
            .register_type(EntityTypeSpec {
                name: "Leaf".into(),
                parent: Some("Base".into()),
                is_object_type: true,
                is_data_horizon_controlled: false,
                fields: vec![data_field("extra")],
                factory: Some(empty_factory),
                delete_guard: None,
            })
            .build()
            .unwrap();

        let chain = registry.ancestor_chain_root_first("Leaf");
        assert_eq!(chain.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["Base", "Leaf"]);
        assert_eq!(registry.entity_type("Base").unwrap().children, vec!["Leaf".to_string()]);
    }

    #[test]
    fn detects_cycle_across_types() {
        let registry = Registry::builder()
            .register_types(vec![
                EntityTypeSpec {
                    name: "A".into(),
                    parent: None,
                    is_object_type: true,
                    is_data_horizon_controlled: false,
                    fields: vec![reference_field("b", "B")],
                    factory: Some(empty_factory),
                    delete_guard: None,
                },
                EntityTypeSpec {
                    name: "B".into(),
                    parent: None,
                    is_object_type: true,
                    is_data_horizon_controlled: false,
                    fields: vec![reference_field("a", "A")],
                    factory: Some(empty_factory),
                    delete_guard: None,
                },
            ])
            .build()
            .unwrap();
        assert!(registry.is_in_cycle("A", "B"));
    }

    #[test]
    fn rejects_reference_to_unknown_type() {
        let result = Registry::builder()
            .register_type(EntityTypeSpec {
                name: "A".into(),
                parent: None,
                is_object_type: true,
                is_data_horizon_controlled: false,
                fields: vec![reference_field("b", "Ghost")],
                factory: Some(empty_factory),
                delete_guard: None,
            })
            .build();
        assert!(result.is_err());
    }
}
