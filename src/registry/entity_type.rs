//! EntityType: a registered application type (spec §3).

use std::collections::HashMap;

use crate::object::Object;
use crate::registry::field_spec::FieldSpec;
use crate::value::FieldValue;

/// Stand-in for "has a no-argument constructor" (spec §4.1): every
/// registered leaf type must supply a factory producing its default field
/// map. Registration fails if one isn't provided for a concrete type.
pub type Factory = fn() -> HashMap<String, FieldValue>;

/// Per-type veto hook consulted by Deleter before any mutation (spec
/// §4.9 step 1: "a per-Object `can_be_deleted()` may veto"). Returns
/// `false` to abort the whole delete with no database mutation.
pub type DeleteGuard = fn(&Object) -> bool;

#[derive(Clone)]
pub struct EntityType {
    pub name: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub own_fields: Vec<FieldSpec>,
    pub is_object_type: bool,
    pub is_data_horizon_controlled: bool,
    pub has_encrypted_fields: bool,
    pub table_name: String,
    pub factory: Option<Factory>,
    pub delete_guard: Option<DeleteGuard>,
}

impl EntityType {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.own_fields.iter().find(|f| f.name == name)
    }
}

impl std::fmt::Debug for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("own_fields", &self.own_fields.len())
            .field("is_object_type", &self.is_object_type)
            .field("is_data_horizon_controlled", &self.is_data_horizon_controlled)
            .finish()
    }
}
