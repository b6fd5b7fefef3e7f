use crate::dialect::{Dialect, DialectFamily};
use crate::registry::{ComplexShape, ValueShape};

/// MySQL-like dialect family.
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn family(&self) -> DialectFamily {
        DialectFamily::MySqlLike
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn column_type_sql(&self, shape: &ValueShape) -> String {
        match shape {
            ValueShape::Bool => "TINYINT(1)".into(),
            ValueShape::SmallInt => "SMALLINT".into(),
            ValueShape::Int => "INT".into(),
            ValueShape::BigInt => "BIGINT".into(),
            ValueShape::Double => "DOUBLE".into(),
            ValueShape::Decimal => "DECIMAL(38, 10)".into(),
            ValueShape::Text { max_len: Some(n) } if *n <= 65535 => format!("VARCHAR({n})"),
            ValueShape::Text { .. } => "LONGTEXT".into(),
            ValueShape::Bytes => "LONGBLOB".into(),
            ValueShape::Date => "DATE".into(),
            ValueShape::Time => "TIME(3)".into(),
            ValueShape::DateTime => "DATETIME(3)".into(),
            ValueShape::Enum { variants } => {
                let longest = variants.iter().map(|v| v.len()).max().unwrap_or(0);
                format!("VARCHAR({})", longest.max(crate::value::MAX_ENUM_VALUE_LENGTH))
            }
            ValueShape::StringSerialized { .. } => "LONGTEXT".into(),
            ValueShape::Reference { .. } => "BIGINT".into(),
            ValueShape::Complex { shape: ComplexShape::Map, .. } => "-- entry table --".into(),
            ValueShape::Complex { .. } => "-- entry table --".into(),
        }
    }

    fn supports_cascade_in_cycle(&self) -> bool {
        // InnoDB rejects multiple cascade paths that could revisit the
        // same row, which reference cycles create.
        false
    }

    fn preserves_millis(&self) -> bool {
        true
    }
}
