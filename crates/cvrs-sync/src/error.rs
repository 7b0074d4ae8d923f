//! Error types for the sync layer.

use cvrs_core::NodeId;
use thiserror::Error;

/// Errors that can occur while wiring replicas together.
///
/// The store itself is total; only the routing layer around it can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Unknown replica: {0}")]
    UnknownReplica(NodeId),

    #[error("Duplicate replica id: {0}")]
    DuplicateReplica(NodeId),

    #[error("Cluster has no replicas")]
    EmptyCluster,
}

pub type Result<T> = std::result::Result<T, SyncError>;
