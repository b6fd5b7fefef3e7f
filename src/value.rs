//! ValueCodec: application <-> SQL-transport value mapping.
//!
//! Rust has no generic runtime reflection, so a registered entity's
//! Data/Reference/Complex fields are carried uniformly as `FieldValue`
//! rather than as typed struct members (see SPEC_FULL.md §3). `ValueShape`
//! on a `FieldSpec` describes which variant is expected for a given
//! column/entry table.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::crypto::CryptoKey;
use crate::error::{PersistError, Result};
use crate::registry::field_spec::ValueShape;

pub const MAX_ENUM_VALUE_LENGTH: usize = 32;
pub const DOMAIN_CLASS_MAX_LEN: usize = 64;

/// The id referenced by a reference field. `None` is SQL NULL.
pub type ObjectId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<Utc>),
    Enum(String),
    Reference(Option<ObjectId>),
    List(Vec<FieldValue>),
    Set(Vec<FieldValue>),
    Map(Vec<(FieldValue, FieldValue)>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null) || matches!(self, FieldValue::Reference(None))
    }

    /// Canonical string key used to compare/dedup elements of Set and Map
    /// fields. Good enough for value-equality on the shapes this core
    /// supports; not a general hash.
    pub fn canonical_key(&self) -> String {
        match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Bool(b) => format!("b:{b}"),
            FieldValue::SmallInt(v) => format!("si:{v}"),
            FieldValue::Int(v) => format!("i:{v}"),
            FieldValue::BigInt(v) => format!("bi:{v}"),
            FieldValue::Double(v) => format!("d:{v}"),
            FieldValue::Decimal(v) => format!("dec:{v}"),
            FieldValue::Text(v) => format!("t:{v}"),
            FieldValue::Bytes(v) => format!("by:{v:?}"),
            FieldValue::Date(v) => format!("date:{v}"),
            FieldValue::Time(v) => format!("time:{v}"),
            FieldValue::DateTime(v) => format!("dt:{}", v.timestamp_millis()),
            FieldValue::Enum(v) => format!("e:{v}"),
            FieldValue::Reference(v) => format!("r:{v:?}"),
            FieldValue::List(v) => format!("l:{:?}", v.iter().map(|x| x.canonical_key()).collect::<Vec<_>>()),
            FieldValue::Set(v) => format!("s:{:?}", v.iter().map(|x| x.canonical_key()).collect::<Vec<_>>()),
            FieldValue::Map(v) => format!(
                "m:{:?}",
                v.iter()
                    .map(|(k, val)| (k.canonical_key(), val.canonical_key()))
                    .collect::<Vec<_>>()
            ),
        }
    }
}

/// A single row as returned by a `Connection`, column name -> value.
#[derive(Debug, Clone, Default)]
pub struct Row(pub BTreeMap<String, FieldValue>);

impl Row {
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.0.get(column)
    }
}

/// A user-registered bidirectional string codec for a field type the core
/// has no native `ValueShape` variant for (Design Notes §9).
pub trait StringCodec: Send + Sync {
    fn to_string_repr(&self, value: &FieldValue) -> Result<String>;
    fn from_string_repr(&self, s: &str) -> Result<FieldValue>;
}

#[derive(Default)]
pub struct StringCodecRegistry {
    codecs: RwLock<BTreeMap<String, Arc<dyn StringCodec>>>,
}

impl StringCodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, type_name: impl Into<String>, codec: Arc<dyn StringCodec>) {
        self.codecs.write().unwrap().insert(type_name.into(), codec);
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn StringCodec>> {
        self.codecs.read().unwrap().get(type_name).cloned()
    }
}

/// Converts between `FieldValue`s and their SQL-transport representation,
/// including optional symmetric encryption of fields marked `is_encrypted`.
pub struct ValueCodec {
    pub string_codecs: StringCodecRegistry,
    crypto_key: Option<CryptoKey>,
    warned_missing_crypto_key: RwLock<bool>,
}

impl ValueCodec {
    pub fn new(crypto_key: Option<CryptoKey>) -> Self {
        Self {
            string_codecs: StringCodecRegistry::new(),
            crypto_key,
            warned_missing_crypto_key: RwLock::new(false),
        }
    }

    /// Encrypt a plaintext field value destined for an `is_encrypted`
    /// column. If no crypt key is configured, stores plaintext and emits a
    /// one-time warning (spec §4.10/§7 Crypto).
    pub fn encrypt_for_storage(&self, plaintext: &str) -> FieldValue {
        match &self.crypto_key {
            Some(key) => FieldValue::Text(key.encrypt(plaintext)),
            None => {
                let mut warned = self.warned_missing_crypto_key.write().unwrap();
                if !*warned {
                    tracing::warn!(
                        "encryption requested but no cryptPassword configured; storing plaintext"
                    );
                    *warned = true;
                }
                FieldValue::Text(plaintext.to_string())
            }
        }
    }

    pub fn decrypt_from_storage(&self, stored: &str) -> Result<String> {
        match &self.crypto_key {
            Some(key) => key.decrypt(stored),
            None => Ok(stored.to_string()),
        }
    }

    /// Truncate a Text/Enum value to the column's size bound, returning
    /// whether truncation occurred (caller attaches the warning).
    pub fn truncate_text(value: &str, column_size: Option<usize>) -> (String, bool) {
        match column_size {
            Some(max) if value.chars().count() > max => {
                (value.chars().take(max).collect(), true)
            }
            _ => (value.to_string(), false),
        }
    }

    /// Validate an enum shape's widest discriminant fits the column.
    pub fn validate_enum_width(shape: &ValueShape) -> Result<usize> {
        if let ValueShape::Enum { variants } = shape {
            let longest = variants.iter().map(|v| v.len()).max().unwrap_or(0);
            Ok(longest.max(MAX_ENUM_VALUE_LENGTH))
        } else {
            Err(PersistError::Registration("not an enum shape".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_truncates_and_flags() {
        let (v, truncated) = ValueCodec::truncate_text("hello world", Some(5));
        assert_eq!(v, "hello");
        assert!(truncated);
    }

    #[test]
    fn truncate_text_no_bound_is_noop() {
        let (v, truncated) = ValueCodec::truncate_text("hello world", None);
        assert_eq!(v, "hello world");
        assert!(!truncated);
    }

    #[test]
    fn missing_crypto_key_falls_back_to_plaintext() {
        let codec = ValueCodec::new(None);
        let stored = codec.encrypt_for_storage("secret");
        assert_eq!(stored, FieldValue::Text("secret".to_string()));
    }

    #[test]
    fn canonical_key_distinguishes_variants() {
        let a = FieldValue::Int(1).canonical_key();
        let b = FieldValue::SmallInt(1).canonical_key();
        assert_ne!(a, b);
    }
}
