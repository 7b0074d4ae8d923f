//! A cluster of replicas joined by a simulated network.
//!
//! Drives full exchange rounds over the [`NetworkSimulator`] and checks
//! convergence. This is the harness the integration and stress tests use
//! to batter the store with loss, duplication and reordering.

use crate::error::{Result, SyncError};
use crate::session::SyncSession;
use crate::transport::{NetworkConfig, NetworkSimulator, SyncMessage};
use cvrs_core::{NodeId, RecordStore};
use std::fmt::Debug;

/// N replicas and the network between them.
#[derive(Debug)]
pub struct SyncCluster<K, V>
where
    K: Ord + Clone + Debug,
{
    replicas: Vec<SyncSession<K, V>>,
    network: NetworkSimulator<K, V>,
}

impl<K, V> SyncCluster<K, V>
where
    K: Ord + Clone + Debug,
    V: Clone + PartialEq,
{
    /// A cluster of `n` replicas with node ids `1..=n`.
    ///
    /// Panics when `n` is 0; use [`SyncCluster::with_node_ids`] to handle
    /// that case as an error.
    pub fn new(n: usize, config: NetworkConfig) -> Self {
        Self::with_node_ids((1..=n as NodeId).collect(), config)
            .expect("generated node ids are non-empty and unique")
    }

    /// A cluster with explicit node ids.
    pub fn with_node_ids(node_ids: Vec<NodeId>, config: NetworkConfig) -> Result<Self> {
        if node_ids.is_empty() {
            return Err(SyncError::EmptyCluster);
        }
        let mut replicas: Vec<SyncSession<K, V>> = Vec::with_capacity(node_ids.len());
        for &node_id in &node_ids {
            if replicas.iter().any(|r| r.node_id() == node_id) {
                return Err(SyncError::DuplicateReplica(node_id));
            }
            let mut session = SyncSession::new(RecordStore::new(node_id));
            for &peer in &node_ids {
                if peer != node_id {
                    session.register_peer(peer);
                }
            }
            replicas.push(session);
        }
        Ok(Self {
            replicas,
            network: NetworkSimulator::new(config),
        })
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn replica(&self, idx: usize) -> &SyncSession<K, V> {
        &self.replicas[idx]
    }

    pub fn store(&self, idx: usize) -> &RecordStore<K, V> {
        self.replicas[idx].store()
    }

    pub fn store_mut(&mut self, idx: usize) -> &mut RecordStore<K, V> {
        self.replicas[idx].store_mut()
    }

    /// Queue this replica's outstanding batches for every peer.
    pub fn broadcast_from(&mut self, idx: usize) {
        let peers: Vec<NodeId> = self
            .replicas
            .iter()
            .map(|r| r.node_id())
            .filter(|&id| id != self.replicas[idx].node_id())
            .collect();
        for peer in peers {
            if let Some(batch) = self.replicas[idx].prepare_sync(peer) {
                self.network.send(SyncMessage::Changes(batch));
            }
        }
    }

    /// Deliver one in-flight message. Returns false when the network is
    /// drained.
    pub fn process_one(&mut self) -> Result<bool> {
        let Some(msg) = self.network.receive() else {
            return Ok(false);
        };
        let recipient = msg.recipient();
        let target = self
            .replicas
            .iter_mut()
            .find(|r| r.node_id() == recipient)
            .ok_or(SyncError::UnknownReplica(recipient))?;
        match msg {
            SyncMessage::Changes(batch) => {
                let ack = target.receive_changes(&batch);
                self.network.send(SyncMessage::Ack(ack));
            }
            SyncMessage::Ack(ack) => {
                target.receive_ack(&ack);
            }
        }
        Ok(true)
    }

    /// Deliver everything currently in flight.
    pub fn drain_network(&mut self) -> Result<()> {
        while self.process_one()? {}
        Ok(())
    }

    /// One full round: every replica broadcasts, then the network drains.
    pub fn full_sync_round(&mut self) -> Result<()> {
        for idx in 0..self.replicas.len() {
            self.broadcast_from(idx);
        }
        self.drain_network()
    }

    /// Re-inject lost messages and drain again.
    pub fn retransmit_and_process(&mut self) -> Result<()> {
        self.network.retransmit_lost();
        self.drain_network()
    }

    /// Whether every replica reports the same data.
    pub fn is_converged(&self) -> bool {
        if self.replicas.len() < 2 {
            return true;
        }
        let first = self.replicas[0].store().get_data();
        self.replicas
            .iter()
            .skip(1)
            .all(|r| r.store().get_data() == first)
    }
}
