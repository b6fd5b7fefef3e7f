//! Object: a live application instance held in the ObjectStore (spec §3).

use std::collections::HashMap;

use crate::value::{FieldValue, ObjectId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    NotNull,
    Unique,
    ColumnTooLong,
    EnumTooWide,
    PersistenceFailed(String),
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldError::NotNull => write!(f, "value required"),
            FieldError::Unique => write!(f, "value must be unique"),
            FieldError::ColumnTooLong => write!(f, "value exceeds column size"),
            FieldError::EnumTooWide => write!(f, "enum discriminant exceeds column size"),
            FieldError::PersistenceFailed(msg) => write!(f, "persistence failed: {msg}"),
        }
    }
}

/// A live entity instance. Identity and equality are both `id`-based
/// (spec §3 invariant).
#[derive(Debug, Clone)]
pub struct Object {
    pub id: ObjectId,
    pub type_name: String,
    fields: HashMap<String, FieldValue>,
    pub stored: bool,
    pub field_errors: HashMap<String, FieldError>,
    pub field_warnings: HashMap<String, String>,
    pub exception: Option<String>,
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Object {}

impl Object {
    pub fn new(id: ObjectId, type_name: impl Into<String>, fields: HashMap<String, FieldValue>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            fields,
            stored: false,
            field_errors: HashMap::new(),
            field_warnings: HashMap::new(),
            exception: None,
        }
    }

    pub fn get(&self, field: &str) -> FieldValue {
        self.fields.get(field).cloned().unwrap_or(FieldValue::Null)
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn fields(&self) -> &HashMap<String, FieldValue> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut HashMap<String, FieldValue> {
        &mut self.fields
    }

    /// Complex fields are auto-initialized to an empty container on
    /// registration if the application didn't set one (spec §4.3).
    pub fn ensure_complex_default(&mut self, field: &str, default: FieldValue) {
        self.fields.entry(field.to_string()).or_insert(default);
    }

    /// `valid` is derived: an Object with any field error is invalid
    /// (spec §3/§7 — "a valid-flag filter is supplied").
    pub fn is_valid(&self) -> bool {
        self.field_errors.is_empty()
    }

    pub fn set_field_error(&mut self, field: &str, error: FieldError) {
        self.field_errors.insert(field.to_string(), error);
    }

    pub fn clear_field_error(&mut self, field: &str) {
        self.field_errors.remove(field);
    }

    pub fn set_field_warning(&mut self, field: &str, message: impl Into<String>) {
        self.field_warnings.insert(field.to_string(), message.into());
    }

    pub fn clear_field_warning(&mut self, field: &str) {
        self.field_warnings.remove(field);
    }
}
