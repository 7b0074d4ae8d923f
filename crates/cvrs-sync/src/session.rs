//! Sync sessions: a store plus the bookkeeping for exchanging deltas.
//!
//! Two flows are supported. The push flow cuts outgoing [`ChangeBatch`]es
//! against per-peer acknowledgments, so a peer that confirmed version `v`
//! is never sent anything at or below `v` again. The pull flow reads a
//! source store directly and remembers, per source, the clock value
//! already consumed. Both ride on `merge_changes`, so duplicated or
//! reordered delivery cannot corrupt anything; the cursors only trim the
//! traffic.

use crate::transport::{ChangeBatch, SyncAck};
use cvrs_core::{NodeId, RecordStore, Version};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

/// A store wired for delta exchange.
#[derive(Clone, Debug)]
pub struct SyncSession<K, V>
where
    K: Ord + Clone + Debug,
{
    store: RecordStore<K, V>,
    /// Per peer: our clock value the peer has acknowledged.
    peer_acks: BTreeMap<NodeId, Version>,
    /// Per source: the source clock value already pulled through.
    pull_cursors: BTreeMap<NodeId, Version>,
}

impl<K, V> SyncSession<K, V>
where
    K: Ord + Clone + Debug,
    V: Clone + PartialEq,
{
    pub fn new(store: RecordStore<K, V>) -> Self {
        Self {
            store,
            peer_acks: BTreeMap::new(),
            pull_cursors: BTreeMap::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.store.node_id()
    }

    pub fn store(&self) -> &RecordStore<K, V> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore<K, V> {
        &mut self.store
    }

    pub fn into_store(self) -> RecordStore<K, V> {
        self.store
    }

    /// Register a peer for the push flow.
    pub fn register_peer(&mut self, peer: NodeId) {
        self.peer_acks.entry(peer).or_insert(0);
    }

    /// Our clock value `peer` has acknowledged so far.
    pub fn acked_by(&self, peer: NodeId) -> Version {
        self.peer_acks.get(&peer).copied().unwrap_or(0)
    }

    /// Cut a batch of everything `peer` has not yet acknowledged.
    ///
    /// Returns `None` when the peer is up to date.
    pub fn prepare_sync(&self, peer: NodeId) -> Option<ChangeBatch<K, V>> {
        let acked = self.acked_by(peer);
        let changes = self.store.get_changes_since(acked);
        if changes.is_empty() {
            return None;
        }
        Some(ChangeBatch {
            from: self.node_id(),
            to: peer,
            up_to: self.store.clock().current_time(),
            changes,
        })
    }

    /// Merge a received batch and produce the acknowledgment to send back.
    pub fn receive_changes(&mut self, batch: &ChangeBatch<K, V>) -> SyncAck {
        debug!(
            from = batch.from,
            to = batch.to,
            count = batch.changes.len(),
            "merging change batch"
        );
        self.store.merge_changes(&batch.changes, false);
        SyncAck {
            from: self.node_id(),
            to: batch.from,
            version: batch.up_to,
        }
    }

    /// Record a peer's acknowledgment.
    pub fn receive_ack(&mut self, ack: &SyncAck) {
        let acked = self.peer_acks.entry(ack.from).or_insert(0);
        *acked = (*acked).max(ack.version);
    }

    /// Pull everything new from `source` directly, advancing this
    /// session's cursor for it. Returns the number of changes merged.
    pub fn pull_from(&mut self, source: &RecordStore<K, V>) -> usize {
        let cursor = self
            .pull_cursors
            .get(&source.node_id())
            .copied()
            .unwrap_or(0);
        let changes = source.get_changes_since(cursor);
        self.store.merge_changes(&changes, false);
        self.pull_cursors
            .insert(source.node_id(), source.clock().current_time());
        changes.len()
    }
}
