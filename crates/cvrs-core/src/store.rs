//! The record store: a delta-state CRDT over keyed records.
//!
//! A [`RecordStore`] owns a map of records, a logical clock and a node
//! id. Local mutations return the [`Change`]s they produced; shipping
//! those changes to any other replica and merging them there converges
//! both stores, regardless of delivery order or duplication.
//!
//! Merge rules, in order:
//!
//! 1. Every incoming change advances the local clock past its
//!    `db_version`.
//! 2. A record deletion installs a tombstone. Tombstones are permanent:
//!    once a record is deleted, column writes for it are dropped and
//!    local inserts are refused.
//! 3. A column write or clear is accepted iff its precedence triple
//!    `(col_version, db_version, node_id)` strictly exceeds the local
//!    one (see [`crate::version::supersedes`]). Rejected changes are
//!    discarded silently.
//!
//! # Parent overlay
//!
//! A store may hold a shared read-only handle to a parent store. The
//! child then inherits every record of the parent without copying: reads
//! compose the child's map over the parent chain, writes land only in
//! the child's own map, and a child tombstone hides the parent's record
//! from the child's view. Parent chains may nest; cycles are a
//! construction error the store does not detect.

use crate::change::{compress_changes, Change};
use crate::clock::{LogicalClock, NodeId, Version};
use crate::record::{Fields, Record, TOMBSTONE_COLUMN};
use crate::version::{supersedes, ColumnVersion};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, trace};

/// A replicated, keyed record store.
#[derive(Clone, Debug)]
pub struct RecordStore<K, V>
where
    K: Ord + Clone + Debug,
{
    node_id: NodeId,
    clock: LogicalClock,
    data: BTreeMap<K, Record<V>>,
    tombstones: BTreeSet<K>,
    parent: Option<Arc<RecordStore<K, V>>>,
    /// Clock value covered by pre-loaded changes. Delta extraction never
    /// re-emits anything at or below this mark.
    base_db_version: Version,
}

impl<K, V> RecordStore<K, V>
where
    K: Ord + Clone + Debug,
    V: Clone + PartialEq,
{
    /// Create an empty store.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            clock: LogicalClock::new(),
            data: BTreeMap::new(),
            tombstones: BTreeSet::new(),
            parent: None,
            base_db_version: 0,
        }
    }

    /// Create a store layered over `parent`.
    ///
    /// The child starts with the parent's clock value so that its own
    /// writes order after the history it inherits. The parent is never
    /// mutated through the child.
    pub fn with_parent(node_id: NodeId, parent: Arc<RecordStore<K, V>>) -> Self {
        Self {
            node_id,
            clock: parent.clock.clone(),
            data: BTreeMap::new(),
            tombstones: BTreeSet::new(),
            parent: Some(parent),
            base_db_version: 0,
        }
    }

    /// Create a store from changes loaded out of persistent storage.
    ///
    /// The changes are installed as-is, the clock resumes at their
    /// highest `db_version`, and that same value becomes the base below
    /// which [`RecordStore::get_changes_since`] will not re-emit.
    pub fn from_changes(node_id: NodeId, changes: Vec<Change<K, V>>) -> Self {
        let mut store = Self::new(node_id);
        let top = changes.iter().map(|c| c.db_version).max().unwrap_or(0);
        for change in changes {
            let local_db_version = change.db_version;
            store.apply_change(change, local_db_version, false);
        }
        store.clock = LogicalClock::starting_at(top);
        store.base_db_version = top;
        store
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn base_db_version(&self) -> Version {
        self.base_db_version
    }

    pub fn parent(&self) -> Option<&Arc<RecordStore<K, V>>> {
        self.parent.as_ref()
    }

    /// Whether `record_id` exists in this store or any ancestor,
    /// tombstoned or not.
    pub fn contains_record(&self, record_id: &K) -> bool {
        self.data.contains_key(record_id)
            || self
                .parent
                .as_ref()
                .map_or(false, |p| p.contains_record(record_id))
    }

    /// Whether `record_id` is deleted here or in any ancestor.
    pub fn is_tombstoned(&self, record_id: &K) -> bool {
        self.is_locally_tombstoned(record_id)
            || self
                .parent
                .as_ref()
                .map_or(false, |p| p.is_tombstoned(record_id))
    }

    fn is_locally_tombstoned(&self, record_id: &K) -> bool {
        self.tombstones.contains(record_id)
            || self
                .data
                .get(record_id)
                .map_or(false, Record::is_tombstoned)
    }

    /// Insert a record or update some of its columns.
    ///
    /// Returns the changes to ship to other replicas; one change per
    /// column, each with its own clock tick. Returns an empty vector
    /// without touching anything when the record is tombstoned (locally
    /// or in an ancestor) or `fields` is empty.
    pub fn insert_or_update(
        &mut self,
        record_id: K,
        fields: impl IntoIterator<Item = (String, V)>,
    ) -> Vec<Change<K, V>> {
        let fields: Fields<V> = fields.into_iter().collect();
        if fields.is_empty() {
            return Vec::new();
        }
        if self.is_tombstoned(&record_id) {
            debug!(record_id = ?record_id, "insert ignored: record is tombstoned");
            return Vec::new();
        }

        let mut changes = Vec::with_capacity(fields.len());
        for (col_name, value) in fields {
            let db_version = self.clock.tick();
            let col_version = self
                .effective_column_version(&record_id, &col_name)
                .map_or(1, |meta| meta.col_version + 1);
            let meta = ColumnVersion::new(col_version, db_version, self.node_id, db_version);

            let record = self.data.entry(record_id.clone()).or_default();
            record.fields.insert(col_name.clone(), value.clone());
            record.column_versions.insert(col_name.clone(), meta);

            changes.push(Change::set(
                record_id.clone(),
                col_name,
                value,
                col_version,
                db_version,
                self.node_id,
            ));
        }
        changes
    }

    /// Delete a record.
    ///
    /// The record's fields are dropped and a permanent tombstone takes
    /// their place; the single returned change carries the deletion to
    /// other replicas. Deleting an already-deleted record is a no-op.
    pub fn delete_record(&mut self, record_id: &K) -> Vec<Change<K, V>> {
        if self.is_tombstoned(record_id) {
            debug!(record_id = ?record_id, "delete ignored: record already tombstoned");
            return Vec::new();
        }

        let db_version = self.clock.tick();
        let meta = ColumnVersion::new(1, db_version, self.node_id, db_version);
        self.data.insert(record_id.clone(), Record::tombstone(meta));
        self.tombstones.insert(record_id.clone());
        debug!(record_id = ?record_id, db_version, "record deleted");

        vec![Change::delete(record_id.clone(), 1, db_version, self.node_id)]
    }

    /// Merge changes received from another replica.
    ///
    /// Idempotent and commutative: re-delivering or reordering a change
    /// set cannot alter the outcome. `ignore_parent` restricts all
    /// lookups to this store's own map and lets writes through the
    /// tombstone guard; it is meant for replaying a parent's deletions
    /// (or a revert) onto a diverged child, not for ordinary exchange.
    pub fn merge_changes(&mut self, changes: &[Change<K, V>], ignore_parent: bool) {
        for change in changes {
            self.clock.update(change.db_version);
            let local_db_version = self.clock.current_time();
            self.apply_change(change.clone(), local_db_version, ignore_parent);
        }
    }

    fn apply_change(&mut self, change: Change<K, V>, local_db_version: Version, ignore_parent: bool) {
        let Change {
            record_id,
            col_name,
            value,
            col_version,
            db_version,
            node_id,
            ..
        } = change;

        let Some(col_name) = col_name else {
            // Record deletion. Between two tombstones the higher
            // (col_version, node_id) pair wins; against anything else the
            // deletion always installs.
            if let Some(existing) = self.data.get(&record_id).and_then(Record::tombstone_version) {
                if (col_version, node_id) <= (existing.col_version, existing.node_id) {
                    trace!(record_id = ?record_id, "deletion ignored: existing tombstone dominates");
                    return;
                }
            }
            let meta = ColumnVersion::new(col_version, db_version, node_id, local_db_version);
            self.data.insert(record_id.clone(), Record::tombstone(meta));
            self.tombstones.insert(record_id);
            return;
        };

        if !ignore_parent && self.is_tombstoned(&record_id) {
            trace!(record_id = ?record_id, col_name = %col_name, "column write ignored: record is tombstoned");
            return;
        }

        let local = if ignore_parent {
            self.data
                .get(&record_id)
                .and_then(|r| r.column_versions.get(&col_name))
                .cloned()
        } else {
            self.effective_column_version(&record_id, &col_name)
        };

        let incoming = ColumnVersion::new(col_version, db_version, node_id, local_db_version);
        if let Some(existing) = &local {
            if !supersedes(incoming.precedence(), existing.precedence()) {
                trace!(record_id = ?record_id, col_name = %col_name, "column write ignored: local version dominates");
                return;
            }
        }

        let record = self.data.entry(record_id).or_default();
        match value {
            Some(value) => {
                record.fields.insert(col_name.clone(), value);
            }
            None => {
                record.fields.remove(&col_name);
            }
        }
        record.column_versions.insert(col_name, incoming);
    }

    /// Every change whose local acceptance version is above `version`,
    /// including the parent chain, compressed to one entry per
    /// `(record_id, col_name)`.
    ///
    /// A store built by [`RecordStore::from_changes`] additionally
    /// withholds everything at or below its base version, so reloading
    /// from storage does not make old changes reappear as new deltas.
    pub fn get_changes_since(&self, version: Version) -> Vec<Change<K, V>> {
        let mut changes = self.local_changes_since(version);
        if let Some(parent) = &self.parent {
            changes.extend(parent.get_changes_since(version));
        }
        compress_changes(&mut changes);
        changes
    }

    fn local_changes_since(&self, version: Version) -> Vec<Change<K, V>> {
        let threshold = version.max(self.base_db_version);
        let mut changes = Vec::new();
        for (record_id, record) in &self.data {
            for (col_name, meta) in &record.column_versions {
                if meta.local_db_version <= threshold {
                    continue;
                }
                let change = if col_name == TOMBSTONE_COLUMN {
                    Change::delete(
                        record_id.clone(),
                        meta.col_version,
                        meta.db_version,
                        meta.node_id,
                    )
                } else {
                    Change {
                        record_id: record_id.clone(),
                        col_name: Some(col_name.clone()),
                        value: record.fields.get(col_name).cloned(),
                        col_version: meta.col_version,
                        db_version: meta.db_version,
                        node_id: meta.node_id,
                        flags: None,
                    }
                };
                changes.push(change);
            }
        }
        changes
    }

    /// The changes that would take this store's view back to its
    /// parent's: the parent's value where the two differ, a column clear
    /// where the parent has no such column, a record deletion where it
    /// has no such record or has itself deleted it.
    ///
    /// The output describes the parent's state; it does not dominate the
    /// child's own writes under conflict resolution, so feeding it back
    /// through [`RecordStore::merge_changes`] is not guaranteed to
    /// restore anything. It is meant for a privileged application
    /// channel. Without a parent the divergence is empty.
    pub fn revert(&self) -> Vec<Change<K, V>> {
        let Some(parent) = &self.parent else {
            return Vec::new();
        };
        let parent_view = parent.get_data();
        let now = self.clock.current_time();

        let mut changes = Vec::new();
        for (record_id, record) in &self.data {
            let Some(parent_record) = parent_view.get(record_id) else {
                // The parent never had this record
                changes.push(Change::delete(record_id.clone(), 1, now, self.node_id));
                continue;
            };

            if let Some(meta) = parent_record.tombstone_version() {
                // The parent has deleted this record; a live child record
                // diverges from that by existing at all
                if !record.is_tombstoned() {
                    changes.push(Change::delete(
                        record_id.clone(),
                        meta.col_version,
                        meta.db_version,
                        meta.node_id,
                    ));
                }
                continue;
            }

            if record.is_tombstoned() {
                // Deleted here, alive in the parent: bring every parent
                // column back
                for (col_name, value) in &parent_record.fields {
                    if let Some(meta) = parent_record.column_versions.get(col_name) {
                        changes.push(Change::set(
                            record_id.clone(),
                            col_name.clone(),
                            value.clone(),
                            meta.col_version,
                            meta.db_version,
                            meta.node_id,
                        ));
                    }
                }
                continue;
            }

            for (col_name, meta) in &record.column_versions {
                let ours = record.fields.get(col_name);
                let theirs = parent_record.fields.get(col_name);
                match (ours, theirs) {
                    (Some(v), Some(pv)) if v == pv => {}
                    (None, None) => {}
                    (_, Some(pv)) => {
                        if let Some(parent_meta) = parent_record.column_versions.get(col_name) {
                            changes.push(Change::set(
                                record_id.clone(),
                                col_name.clone(),
                                pv.clone(),
                                parent_meta.col_version,
                                parent_meta.db_version,
                                parent_meta.node_id,
                            ));
                        }
                    }
                    (_, None) => {
                        changes.push(Change::clear(
                            record_id.clone(),
                            col_name.clone(),
                            meta.col_version,
                            now,
                            self.node_id,
                        ));
                    }
                }
            }
        }
        changes
    }

    /// One record, composed across the parent chain.
    ///
    /// The child's columns overlay the parent's; a tombstone on either
    /// side hides the other side's columns entirely.
    pub fn get_record(&self, record_id: &K) -> Option<Record<V>> {
        let own = self.data.get(record_id);
        if let Some(record) = own {
            if record.is_tombstoned() {
                return Some(record.clone());
            }
        }
        let inherited = self.parent.as_ref().and_then(|p| p.get_record(record_id));
        match (own, inherited) {
            (None, None) => None,
            (Some(record), None) => Some(record.clone()),
            (None, Some(parent_record)) => Some(parent_record),
            (Some(record), Some(base)) => Some(overlay(base, record)),
        }
    }

    /// The full visible state: the union of all records in this store
    /// and its ancestors, child layers taking precedence per column.
    pub fn get_data(&self) -> BTreeMap<K, Record<V>> {
        let mut data = match &self.parent {
            Some(parent) => parent.get_data(),
            None => BTreeMap::new(),
        };
        for (record_id, record) in &self.data {
            match data.entry(record_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record.clone());
                }
                Entry::Occupied(mut slot) => {
                    let composed = overlay(slot.get().clone(), record);
                    slot.insert(composed);
                }
            }
        }
        data
    }

    /// First metadata found for `(record_id, col_name)` walking self,
    /// then the ancestors.
    fn effective_column_version(&self, record_id: &K, col_name: &str) -> Option<ColumnVersion> {
        if let Some(meta) = self
            .data
            .get(record_id)
            .and_then(|r| r.column_versions.get(col_name))
        {
            return Some(meta.clone());
        }
        self.parent
            .as_ref()
            .and_then(|p| p.effective_column_version(record_id, col_name))
    }
}

/// Layer `upper` over `base`, column by column. A tombstone on either
/// layer replaces the composition wholesale.
fn overlay<V: Clone>(base: Record<V>, upper: &Record<V>) -> Record<V> {
    if upper.is_tombstoned() || base.is_tombstoned() {
        return upper.clone();
    }
    let mut composed = base;
    for (col_name, value) in &upper.fields {
        composed.fields.insert(col_name.clone(), value.clone());
    }
    for (col_name, meta) in &upper.column_versions {
        composed
            .column_versions
            .insert(col_name.clone(), meta.clone());
    }
    composed
}
