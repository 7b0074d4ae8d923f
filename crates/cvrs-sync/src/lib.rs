//! # cvrs-sync
//!
//! Synchronization layer for the CVRS record store.
//!
//! `cvrs-core` produces and consumes change sets but ships nothing;
//! this crate adds the plumbing between replicas:
//! - [`SyncSession`]: a store plus per-peer cursors, for push-style
//!   batching with acknowledgments or direct pull sync
//! - [`ChangeBatch`] / [`SyncAck`]: the exchange protocol messages
//! - [`NetworkSimulator`]: an in-memory network with configurable loss,
//!   duplication and reordering
//! - [`SyncCluster`]: an N-replica harness for convergence testing
//!
//! The exchange is deliberately dumb: batches are cut with
//! `get_changes_since`, merged with `merge_changes`, and all fault
//! tolerance comes from the core's idempotence and commutativity. Losing
//! a message only delays convergence until the next retransmission.

pub mod cluster;
pub mod error;
pub mod session;
pub mod transport;

pub use cluster::SyncCluster;
pub use error::{Result, SyncError};
pub use session::SyncSession;
pub use transport::{ChangeBatch, NetworkConfig, NetworkSimulator, SyncAck, SyncMessage};
