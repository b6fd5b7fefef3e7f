//! Error taxonomy for the persistence core.
//!
//! Mirrors the error kinds in the design doc: configuration and
//! registration failures are fatal at startup, schema mismatches are
//! per-type, constraint/persistence/integrity failures surface from
//! individual calls. Conflict and crypto issues are warnings recorded on
//! the affected `Object`, not represented as `Err` here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("registration error: {0}")]
    Registration(String),

    #[error("schema mismatch for {entity_type}: {details}")]
    SchemaMismatch { entity_type: String, details: String },

    #[error("constraint violation on {entity_type}.{field}: {details}")]
    Constraint {
        entity_type: String,
        field: String,
        details: String,
    },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("object not found: {entity_type}#{id}")]
    NotFound { entity_type: String, id: u64 },
}

pub type Result<T> = std::result::Result<T, PersistError>;

impl PersistError {
    pub fn persistence(msg: impl Into<String>) -> Self {
        PersistError::Persistence(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        PersistError::Integrity(msg.into())
    }
}
