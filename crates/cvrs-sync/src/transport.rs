//! Messages and transport simulation for change exchange.
//!
//! The real transport is the application's concern; what lives here is
//! the message shapes replicas exchange and an in-memory simulator that
//! can lose, duplicate and reorder those messages. The simulator is what
//! the convergence tests run on: a store that survives the chaotic
//! configuration survives an at-least-once network.

use cvrs_core::{Change, NodeId, Version};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A batch of changes from one replica to another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch<K, V> {
    pub from: NodeId,
    pub to: NodeId,
    /// Sender clock value when the batch was cut. Acknowledging it lets
    /// the sender stop re-sending everything below it.
    pub up_to: Version,
    pub changes: Vec<Change<K, V>>,
}

/// Acknowledgment of a received batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAck {
    pub from: NodeId,
    pub to: NodeId,
    /// The sender clock value being confirmed.
    pub version: Version,
}

/// Messages of the exchange protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncMessage<K, V> {
    Changes(ChangeBatch<K, V>),
    Ack(SyncAck),
}

impl<K, V> SyncMessage<K, V> {
    /// The replica this message is addressed to.
    pub fn recipient(&self) -> NodeId {
        match self {
            SyncMessage::Changes(batch) => batch.to,
            SyncMessage::Ack(ack) => ack.to,
        }
    }
}

/// Network fault configuration for simulation.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Probability of message loss (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability of message duplication (0.0 - 1.0)
    pub dup_rate: f64,
    /// Probability of message reordering (0.0 - 1.0)
    pub reorder_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            dup_rate: 0.0,
            reorder_rate: 0.0,
        }
    }
}

impl NetworkConfig {
    /// A network that only loses messages.
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    /// A network that only duplicates messages.
    pub fn with_dups(dup_rate: f64) -> Self {
        Self {
            dup_rate,
            ..Default::default()
        }
    }

    /// A network with every problem at once.
    pub fn chaotic() -> Self {
        Self {
            loss_rate: 0.1,
            dup_rate: 0.2,
            reorder_rate: 0.3,
        }
    }
}

/// Deterministic in-memory network for testing exchange under faults.
#[derive(Debug)]
pub struct NetworkSimulator<K, V> {
    /// Messages in flight
    in_flight: VecDeque<SyncMessage<K, V>>,
    /// Messages that were "lost"
    lost: Vec<SyncMessage<K, V>>,
    config: NetworkConfig,
    /// LCG state, fixed seed so failures reproduce
    rng_state: u64,
}

impl<K: Clone, V: Clone> NetworkSimulator<K, V> {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            in_flight: VecDeque::new(),
            lost: Vec::new(),
            config,
            rng_state: 12345,
        }
    }

    fn next_random(&mut self) -> f64 {
        self.rng_state = self.rng_state.wrapping_mul(1103515245).wrapping_add(12345);
        ((self.rng_state >> 16) & 0x7fff) as f64 / 32768.0
    }

    /// Send a message, subject to the configured faults.
    pub fn send(&mut self, msg: SyncMessage<K, V>) {
        if self.next_random() < self.config.loss_rate {
            self.lost.push(msg);
            return;
        }

        if self.next_random() < self.config.dup_rate {
            self.in_flight.push_back(msg.clone());
        }

        if !self.in_flight.is_empty() && self.next_random() < self.config.reorder_rate {
            let pos = (self.next_random() * self.in_flight.len() as f64) as usize;
            let pos = pos.min(self.in_flight.len() - 1);
            self.in_flight.insert(pos, msg);
        } else {
            self.in_flight.push_back(msg);
        }
    }

    /// Receive the next message, if any.
    pub fn receive(&mut self) -> Option<SyncMessage<K, V>> {
        self.in_flight.pop_front()
    }

    /// Put lost messages back in flight, as a retransmission would.
    pub fn retransmit_lost(&mut self) {
        for msg in self.lost.drain(..) {
            self.in_flight.push_back(msg);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn lost_count(&self) -> usize {
        self.lost.len()
    }
}
