use crate::dialect::{Dialect, DialectFamily};
use crate::registry::{ComplexShape, ValueShape};

/// ANSI-SQL-ish fallback dialect, used when no more specific family
/// applies (spec §2: "four dialect families ... generic").
pub struct GenericDialect;

impl Dialect for GenericDialect {
    fn family(&self) -> DialectFamily {
        DialectFamily::Generic
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn column_type_sql(&self, shape: &ValueShape) -> String {
        match shape {
            ValueShape::Bool => "BOOLEAN".into(),
            ValueShape::SmallInt => "SMALLINT".into(),
            ValueShape::Int => "INTEGER".into(),
            ValueShape::BigInt => "BIGINT".into(),
            ValueShape::Double => "DOUBLE PRECISION".into(),
            ValueShape::Decimal => "DECIMAL(38, 10)".into(),
            ValueShape::Text { max_len: Some(n) } => format!("VARCHAR({n})"),
            ValueShape::Text { max_len: None } => "TEXT".into(),
            ValueShape::Bytes => "BYTEA".into(),
            ValueShape::Date => "DATE".into(),
            ValueShape::Time => "TIME".into(),
            ValueShape::DateTime => "TIMESTAMP".into(),
            ValueShape::Enum { variants } => {
                let longest = variants.iter().map(|v| v.len()).max().unwrap_or(0);
                format!("VARCHAR({})", longest.max(crate::value::MAX_ENUM_VALUE_LENGTH))
            }
            ValueShape::StringSerialized { .. } => "TEXT".into(),
            ValueShape::Reference { .. } => "BIGINT".into(),
            ValueShape::Complex { shape: ComplexShape::Map, .. } => "-- entry table --".into(),
            ValueShape::Complex { .. } => "-- entry table --".into(),
        }
    }

    fn supports_cascade_in_cycle(&self) -> bool {
        true
    }

    fn preserves_millis(&self) -> bool {
        true
    }
}
