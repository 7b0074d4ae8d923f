//! The change record: the atomic unit shipped between replicas.
//!
//! A change describes exactly one of three events, encoded in the
//! optional `col_name` / `value` pair:
//!
//! - `col_name: Some, value: Some` sets a column;
//! - `col_name: Some, value: None` clears a column;
//! - `col_name: None, value: None` deletes the whole record.
//!
//! Changes carry the version metadata the receiver needs to run conflict
//! resolution and nothing else; transports and persistence layers are
//! expected to serialize this shape faithfully and may use `flags` for
//! their own bookkeeping.

use crate::clock::{NodeId, Version};
use crate::version::{supersedes, Precedence};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// A single replicated change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change<K, V> {
    pub record_id: K,
    /// `None` marks a record-level deletion.
    pub col_name: Option<String>,
    /// `None` together with a column name marks a column clear.
    pub value: Option<V>,
    pub col_version: u64,
    pub db_version: Version,
    pub node_id: NodeId,
    /// Reserved for transports. The core neither sets nor reads it.
    pub flags: Option<u32>,
}

/// Borrowed view of what a change does.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChangeKind<'a, V> {
    /// Delete the whole record.
    RecordDelete,
    /// Clear one column, keeping its version metadata.
    ColumnClear { col_name: &'a str },
    /// Set one column to a value.
    ColumnSet { col_name: &'a str, value: &'a V },
}

impl<K, V> Change<K, V> {
    /// A column write.
    pub fn set(
        record_id: K,
        col_name: impl Into<String>,
        value: V,
        col_version: u64,
        db_version: Version,
        node_id: NodeId,
    ) -> Self {
        Self {
            record_id,
            col_name: Some(col_name.into()),
            value: Some(value),
            col_version,
            db_version,
            node_id,
            flags: None,
        }
    }

    /// A column clear (column tombstone).
    pub fn clear(
        record_id: K,
        col_name: impl Into<String>,
        col_version: u64,
        db_version: Version,
        node_id: NodeId,
    ) -> Self {
        Self {
            record_id,
            col_name: Some(col_name.into()),
            value: None,
            col_version,
            db_version,
            node_id,
            flags: None,
        }
    }

    /// A record deletion.
    pub fn delete(record_id: K, col_version: u64, db_version: Version, node_id: NodeId) -> Self {
        Self {
            record_id,
            col_name: None,
            value: None,
            col_version,
            db_version,
            node_id,
            flags: None,
        }
    }

    /// What this change does, as a sum over the optional pair.
    pub fn kind(&self) -> ChangeKind<'_, V> {
        match (&self.col_name, &self.value) {
            (None, _) => ChangeKind::RecordDelete,
            (Some(col_name), None) => ChangeKind::ColumnClear { col_name },
            (Some(col_name), Some(value)) => ChangeKind::ColumnSet { col_name, value },
        }
    }

    /// Whether this change deletes its record.
    pub fn is_delete(&self) -> bool {
        self.col_name.is_none()
    }

    /// The precedence triple used for conflict resolution.
    pub fn precedence(&self) -> Precedence {
        (self.col_version, self.db_version, self.node_id)
    }
}

/// Collapse a batch of changes to one entry per `(record_id, col_name)`
/// key, keeping the dominant entry under the conflict resolution order.
///
/// Record deletions (`col_name: None`) form their own key per record and
/// never absorb column entries. Applying the compressed batch to any
/// replica yields the same state as applying the original, so batches can
/// be compressed anywhere between producer and consumer. Output order is
/// unspecified.
pub fn compress_changes<K, V>(changes: &mut Vec<Change<K, V>>)
where
    K: Ord + Clone,
{
    if changes.len() < 2 {
        return;
    }

    let mut dominant: BTreeMap<(K, Option<String>), Change<K, V>> = BTreeMap::new();
    for change in changes.drain(..) {
        let key = (change.record_id.clone(), change.col_name.clone());
        match dominant.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(change);
            }
            Entry::Occupied(mut slot) => {
                if supersedes(change.precedence(), slot.get().precedence()) {
                    slot.insert(change);
                }
            }
        }
    }

    changes.extend(dominant.into_values());
}
