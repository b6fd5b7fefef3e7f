//! FieldSpec: classification and canonical naming for a single field of a
//! registered EntityType (spec §3/§4.1).

use crate::value::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Data,
    Reference,
    Complex,
    Accumulation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComplexShape {
    Array,
    List,
    Set,
    Map,
}

/// What values a field can hold. `Reference`/`Complex` carry enough
/// information for the Loader/Saver to build entry tables and resolve
/// targets without reflecting on a real Rust type.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueShape {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Double,
    Decimal,
    Text { max_len: Option<usize> },
    Bytes,
    Date,
    Time,
    DateTime,
    Enum { variants: Vec<String> },
    /// A field whose application type has no native ValueShape; converted
    /// via a user-registered StringCodec keyed by `type_name`.
    StringSerialized { type_name: String },
    Reference { target: String, on_delete_cascade: bool },
    Complex { shape: ComplexShape, element: Box<ValueShape>, key: Option<Box<ValueShape>> },
}

impl ValueShape {
    pub fn matches(&self, value: &FieldValue) -> bool {
        use FieldValue as V;
        match (self, value) {
            (_, V::Null) => true,
            (ValueShape::Bool, V::Bool(_)) => true,
            (ValueShape::SmallInt, V::SmallInt(_)) => true,
            (ValueShape::Int, V::Int(_)) => true,
            (ValueShape::BigInt, V::BigInt(_)) => true,
            (ValueShape::Double, V::Double(_)) => true,
            (ValueShape::Decimal, V::Decimal(_)) => true,
            (ValueShape::Text { .. }, V::Text(_)) => true,
            (ValueShape::Bytes, V::Bytes(_)) => true,
            (ValueShape::Date, V::Date(_)) => true,
            (ValueShape::Time, V::Time(_)) => true,
            (ValueShape::DateTime, V::DateTime(_)) => true,
            (ValueShape::Enum { variants }, V::Enum(v)) => variants.contains(v),
            (ValueShape::StringSerialized { .. }, V::Text(_)) => true,
            (ValueShape::Reference { .. }, V::Reference(_)) => true,
            (ValueShape::Complex { shape: ComplexShape::Set, .. }, V::Set(_)) => true,
            (ValueShape::Complex { shape: ComplexShape::Map, .. }, V::Map(_)) => true,
            (ValueShape::Complex { shape: ComplexShape::List, .. }, V::List(_)) => true,
            (ValueShape::Complex { shape: ComplexShape::Array, .. }, V::List(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldVersion(pub String);

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub owner: String,
    pub name: String,
    pub kind: FieldKind,
    pub shape: ValueShape,
    pub nullable: bool,
    /// Fields sharing the same group name form a multi-column UNIQUE
    /// constraint; `None` means not part of any uniqueness group.
    pub unique_group: Option<String>,
    pub column_size: Option<usize>,
    pub is_encrypted: bool,
    pub is_secret_for_logging: bool,
    pub created_in: Option<FieldVersion>,
    pub changed_in: Vec<FieldVersion>,
    pub removed_in: Option<FieldVersion>,
    /// For `Accumulation` fields: the name of the reference field on the
    /// target type whose inverse this field materializes.
    pub accumulation_inverse_of: Option<String>,
    pub column_name: String,
    pub entry_table_name: Option<String>,
}

impl FieldSpec {
    pub fn is_persisted(&self) -> bool {
        !matches!(self.kind, FieldKind::Accumulation)
    }

    pub fn reference_target(&self) -> Option<&str> {
        match &self.shape {
            ValueShape::Reference { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn on_delete_cascade(&self) -> bool {
        matches!(
            &self.shape,
            ValueShape::Reference { on_delete_cascade: true, .. }
        )
    }
}
