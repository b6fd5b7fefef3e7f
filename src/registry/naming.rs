//! Canonical SQL name derivation (spec §4.1/§6). Bit-exact because callers
//! build raw WHERE-clause strings against these names directly.

const TABLE_PREFIX: &str = "DOM_";
pub const ID_COLUMN: &str = "ID";
pub const DOMAIN_CLASS_COLUMN: &str = "DOMAIN_CLASS";
pub const LAST_MODIFIED_COLUMN: &str = "LAST_MODIFIED";

/// A conservative subset of ANSI SQL reserved words likely to collide with
/// entity/field names in practice.
const RESERVED_WORDS: &[&str] = &[
    "ORDER", "GROUP", "SELECT", "TABLE", "WHERE", "FROM", "USER", "CHECK", "INDEX", "KEY",
    "LEVEL", "TYPE", "VALUE", "SIZE", "DATE", "TIME", "LIMIT", "OFFSET", "UNION", "VIEW",
];
const RESERVED_PREFIX: &str = "F_";

/// "UpperCamelCase" / "lowerCamelCase" -> "UPPER_SNAKE_CASE".
pub fn upper_camel_to_upper_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() * 2);
    let chars: Vec<char> = name.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_is_lower_or_digit = i > 0
                && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_is_lower = chars.get(i + 1).map(|c| c.is_lowercase()).unwrap_or(false);
            let prev_is_upper = i > 0 && chars[i - 1].is_uppercase();
            if i > 0 && (prev_is_lower_or_digit || (prev_is_upper && next_is_lower)) {
                out.push('_');
            }
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_uppercase());
        }
    }
    out
}

fn prefix_if_reserved(candidate: String) -> String {
    if RESERVED_WORDS.contains(&candidate.as_str()) {
        format!("{RESERVED_PREFIX}{candidate}")
    } else {
        candidate
    }
}

/// Table name for an EntityType: "DOM_" + UPPER_SNAKE(type name).
pub fn table_name(entity_type_name: &str) -> String {
    format!("{TABLE_PREFIX}{}", upper_camel_to_upper_snake(entity_type_name))
}

/// Column name for a Data field.
pub fn data_column_name(field_name: &str) -> String {
    prefix_if_reserved(upper_camel_to_upper_snake(field_name))
}

/// Column name for a Reference field f: X -> Y yields `F_ID`.
pub fn reference_column_name(field_name: &str) -> String {
    let base = upper_camel_to_upper_snake(field_name);
    prefix_if_reserved(format!("{base}_ID"))
}

/// Entry table name for a Complex field: `<MAIN_TABLE>_<FIELD>`.
pub fn entry_table_name(main_table: &str, field_name: &str) -> String {
    format!("{main_table}_{}", upper_camel_to_upper_snake(field_name))
}

/// Shadow table name for an exclusive-allocation lock type on a given
/// main table: `<TABLE>_LOCK_<UPPER_SNAKE(lock_type)>` (spec §4.8's
/// "select-and-insert-shadow protocol").
pub fn lock_table_name(main_table: &str, lock_type: &str) -> String {
    format!("{main_table}_LOCK_{}", upper_camel_to_upper_snake(lock_type))
}

pub const ENTRY_MAIN_REF_SUFFIX: &str = "_ID";
pub const ENTRY_ELEMENT_COLUMN: &str = "ELEMENT";
pub const ENTRY_ELEMENT_ORDER_COLUMN: &str = "ELEMENT_ORDER";
pub const ENTRY_KEY_COLUMN: &str = "ENTRY_KEY";
pub const ENTRY_VALUE_COLUMN: &str = "ENTRY_VALUE";

/// Column referencing the main table's id from an entry table:
/// `<TABLE>_ID`.
pub fn entry_main_ref_column(main_table: &str) -> String {
    format!("{main_table}{ENTRY_MAIN_REF_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_to_snake_basic() {
        assert_eq!(upper_camel_to_upper_snake("Person"), "PERSON");
        assert_eq!(upper_camel_to_upper_snake("businessUnit"), "BUSINESS_UNIT");
        assert_eq!(upper_camel_to_upper_snake("CBUEntity"), "CBU_ENTITY");
        assert_eq!(upper_camel_to_upper_snake("orderId"), "ORDER_ID");
    }

    #[test]
    fn table_name_has_prefix() {
        assert_eq!(table_name("Person"), "DOM_PERSON");
        assert_eq!(table_name("InvoiceLine"), "DOM_INVOICE_LINE");
    }

    #[test]
    fn reference_column_adds_id_suffix() {
        assert_eq!(reference_column_name("parent"), "PARENT_ID");
        assert_eq!(reference_column_name("owningOrder"), "OWNING_ORDER_ID");
    }

    #[test]
    fn reserved_words_get_prefixed() {
        assert_eq!(data_column_name("order"), "F_ORDER");
        assert_eq!(data_column_name("size"), "F_SIZE");
        assert_eq!(data_column_name("name"), "NAME");
    }

    #[test]
    fn entry_table_naming() {
        assert_eq!(entry_table_name("DOM_PERSON", "aliases"), "DOM_PERSON_ALIASES");
        assert_eq!(entry_main_ref_column("DOM_PERSON_ALIASES"), "DOM_PERSON_ALIASES_ID");
    }

    #[test]
    fn lock_table_naming() {
        assert_eq!(lock_table_name("DOM_ORDER", "fulfillment"), "DOM_ORDER_LOCK_FULFILLMENT");
    }
}
