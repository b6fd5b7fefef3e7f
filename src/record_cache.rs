//! RecordCache (spec §4.4): the last-known database image of each stored
//! object, used for change detection and rollback. Written only by
//! Loader (on fresh load/reload) and Saver (after a successful
//! insert/update); read by Saver to compute diffs.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::value::{FieldValue, ObjectId};

/// column name -> last-known value, sorted for deterministic diffing
/// (spec §3: "Sorted by column name").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectRecord {
    pub columns: BTreeMap<String, FieldValue>,
    /// For List/Array-shaped complex fields: the fractional order keys
    /// last persisted for each element, positionally paired with the
    /// corresponding `FieldValue::List` in `columns` (spec §4.7). Not
    /// meaningful for Set/Map fields, which carry no order.
    pub list_keys: BTreeMap<String, Vec<i64>>,
}

impl ObjectRecord {
    pub fn diff<'a>(&'a self, current: &'a BTreeMap<String, FieldValue>) -> Vec<&'a str> {
        current
            .iter()
            .filter(|(col, val)| self.columns.get(*col) != Some(*val))
            .map(|(col, _)| col.as_str())
            .collect()
    }
}

#[derive(Default)]
pub struct RecordCache {
    records: RwLock<HashMap<(String, ObjectId), ObjectRecord>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_name: &str, id: ObjectId) -> Option<ObjectRecord> {
        self.records.read().unwrap().get(&(type_name.to_string(), id)).cloned()
    }

    pub fn put(&self, type_name: &str, id: ObjectId, record: ObjectRecord) {
        self.records.write().unwrap().insert((type_name.to_string(), id), record);
    }

    pub fn remove(&self, type_name: &str, id: ObjectId) {
        self.records.write().unwrap().remove(&(type_name.to_string(), id));
    }

    pub fn contains(&self, type_name: &str, id: ObjectId) -> bool {
        self.records.read().unwrap().contains_key(&(type_name.to_string(), id))
    }
}
