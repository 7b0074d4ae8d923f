//! Record state: named columns plus their version metadata.

use crate::version::ColumnVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved column name marking a record-level tombstone.
///
/// Applications must not use it as a column name of their own.
pub const TOMBSTONE_COLUMN: &str = "__deleted__";

/// The live columns of a record.
pub type Fields<V> = BTreeMap<String, V>;

/// One record of the store.
///
/// Every key of `fields` has an entry in `column_versions`; the reverse
/// does not hold. A column with metadata but no value is a cleared
/// column, and a record whose metadata contains [`TOMBSTONE_COLUMN`] is
/// deleted: its `fields` are empty and stay empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record<V> {
    pub fields: Fields<V>,
    pub column_versions: BTreeMap<String, ColumnVersion>,
}

impl<V> Record<V> {
    pub fn new(fields: Fields<V>, column_versions: BTreeMap<String, ColumnVersion>) -> Self {
        Self {
            fields,
            column_versions,
        }
    }

    /// A deleted record: no fields, only the tombstone marker.
    pub fn tombstone(version: ColumnVersion) -> Self {
        let mut column_versions = BTreeMap::new();
        column_versions.insert(TOMBSTONE_COLUMN.to_string(), version);
        Self {
            fields: Fields::new(),
            column_versions,
        }
    }

    /// Whether this record has been deleted.
    pub fn is_tombstoned(&self) -> bool {
        self.column_versions.contains_key(TOMBSTONE_COLUMN)
    }

    /// Version metadata of the tombstone, if the record is deleted.
    pub fn tombstone_version(&self) -> Option<&ColumnVersion> {
        self.column_versions.get(TOMBSTONE_COLUMN)
    }
}

impl<V> Default for Record<V> {
    fn default() -> Self {
        Self {
            fields: Fields::new(),
            column_versions: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_record_shape() {
        let record: Record<String> = Record::tombstone(ColumnVersion::new(1, 3, 1, 3));

        assert!(record.is_tombstoned());
        assert!(record.fields.is_empty());
        assert_eq!(record.tombstone_version().unwrap().db_version, 3);
    }

    #[test]
    fn test_live_record_is_not_tombstoned() {
        let mut record: Record<String> = Record::default();
        record.fields.insert("name".into(), "a".into());
        record
            .column_versions
            .insert("name".into(), ColumnVersion::new(1, 1, 1, 1));

        assert!(!record.is_tombstoned());
        assert!(record.tombstone_version().is_none());
    }
}
