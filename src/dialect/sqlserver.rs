use crate::dialect::{Dialect, DialectFamily};
use crate::registry::{ComplexShape, ValueShape};

/// SQL-Server-like dialect family.
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn family(&self) -> DialectFamily {
        DialectFamily::SqlServerLike
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn column_type_sql(&self, shape: &ValueShape) -> String {
        match shape {
            ValueShape::Bool => "BIT".into(),
            ValueShape::SmallInt => "SMALLINT".into(),
            ValueShape::Int => "INT".into(),
            ValueShape::BigInt => "BIGINT".into(),
            ValueShape::Double => "FLOAT".into(),
            ValueShape::Decimal => "DECIMAL(38, 10)".into(),
            ValueShape::Text { max_len: Some(n) } if *n <= 4000 => format!("NVARCHAR({n})"),
            ValueShape::Text { .. } => "NVARCHAR(MAX)".into(),
            ValueShape::Bytes => "VARBINARY(MAX)".into(),
            ValueShape::Date => "DATE".into(),
            ValueShape::Time => "TIME(3)".into(),
            ValueShape::DateTime => "DATETIME2(3)".into(),
            ValueShape::Enum { variants } => {
                let longest = variants.iter().map(|v| v.len()).max().unwrap_or(0);
                format!("NVARCHAR({})", longest.max(crate::value::MAX_ENUM_VALUE_LENGTH))
            }
            ValueShape::StringSerialized { .. } => "NVARCHAR(MAX)".into(),
            ValueShape::Reference { .. } => "BIGINT".into(),
            ValueShape::Complex { shape: ComplexShape::Map, .. } => "-- entry table --".into(),
            ValueShape::Complex { .. } => "-- entry table --".into(),
        }
    }

    fn supports_cascade_in_cycle(&self) -> bool {
        // SQL Server rejects FK graphs with cascade cycles outright.
        false
    }

    fn preserves_millis(&self) -> bool {
        // DATETIME2(3) rounds to the millisecond, not truncates.
        true
    }
}
