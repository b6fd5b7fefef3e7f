use crate::dialect::{Dialect, DialectFamily};
use crate::registry::{ComplexShape, ValueShape};

/// Oracle-like dialect family.
pub struct OracleDialect;

impl Dialect for OracleDialect {
    fn family(&self) -> DialectFamily {
        DialectFamily::OracleLike
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn column_type_sql(&self, shape: &ValueShape) -> String {
        match shape {
            ValueShape::Bool => "NUMBER(1)".into(),
            ValueShape::SmallInt => "NUMBER(5)".into(),
            ValueShape::Int => "NUMBER(10)".into(),
            ValueShape::BigInt => "NUMBER(19)".into(),
            ValueShape::Double => "BINARY_DOUBLE".into(),
            ValueShape::Decimal => "NUMBER(38, 10)".into(),
            ValueShape::Text { max_len: Some(n) } if *n <= 4000 => format!("VARCHAR2({n})"),
            ValueShape::Text { .. } => "CLOB".into(),
            ValueShape::Bytes => "BLOB".into(),
            ValueShape::Date => "DATE".into(),
            ValueShape::Time => "VARCHAR2(18)".into(),
            ValueShape::DateTime => "TIMESTAMP(3)".into(),
            ValueShape::Enum { variants } => {
                let longest = variants.iter().map(|v| v.len()).max().unwrap_or(0);
                format!("VARCHAR2({})", longest.max(crate::value::MAX_ENUM_VALUE_LENGTH))
            }
            ValueShape::StringSerialized { .. } => "CLOB".into(),
            ValueShape::Reference { .. } => "NUMBER(19)".into(),
            ValueShape::Complex { shape: ComplexShape::Map, .. } => "-- entry table --".into(),
            ValueShape::Complex { .. } => "-- entry table --".into(),
        }
    }

    fn supports_cascade_in_cycle(&self) -> bool {
        false
    }

    fn preserves_millis(&self) -> bool {
        true
    }

    fn supports_information_schema(&self) -> bool {
        // Oracle uses ALL_TAB_COLUMNS / ALL_CONSTRAINTS instead; its
        // SchemaIntrospector is supplied by the dialect provider, not the
        // generic information_schema implementation.
        false
    }
}
