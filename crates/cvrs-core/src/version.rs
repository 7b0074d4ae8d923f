//! Per-column version metadata and the conflict resolution rule.
//!
//! Each column of each record carries a [`ColumnVersion`]. Concurrent
//! writes to the same column are decided by comparing precedence triples
//! `(col_version, db_version, node_id)` lexicographically:
//!
//! - `col_version` counts semantic updates to the column and wins first,
//!   so two offline edits on one replica dominate a single edit elsewhere;
//! - `db_version` orders writes made by one replica;
//! - `node_id` breaks exact ties deterministically.
//!
//! The rule is a pure function of the two triples: every replica reaches
//! the same verdict on the same inputs, which is what makes merges
//! convergent. Swapping in another ordering (say wall-clock LWW) only
//! requires replacing [`supersedes`].

use crate::clock::{NodeId, Version};
use serde::{Deserialize, Serialize};

/// Precedence key of a column write, compared lexicographically.
pub type Precedence = (u64, Version, NodeId);

/// Version metadata attached to a single column of a record.
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
pub struct ColumnVersion {
    /// Number of updates this column has received across the cluster.
    pub col_version: u64,
    /// Logical clock value at the originating replica when written.
    pub db_version: Version,
    /// Replica that produced the winning write.
    pub node_id: NodeId,
    /// Local clock value when this replica accepted the write.
    ///
    /// Only consulted by delta extraction; conflict resolution never
    /// looks at it.
    pub local_db_version: Version,
}

impl ColumnVersion {
    pub fn new(
        col_version: u64,
        db_version: Version,
        node_id: NodeId,
        local_db_version: Version,
    ) -> Self {
        Self {
            col_version,
            db_version,
            node_id,
            local_db_version,
        }
    }

    /// The precedence triple used for conflict resolution.
    pub fn precedence(&self) -> Precedence {
        (self.col_version, self.db_version, self.node_id)
    }
}

/// Equality ignores `local_db_version`: it records when *this* replica
/// accepted the write, and replicas that have observed the same set of
/// changes must compare equal.
impl PartialEq for ColumnVersion {
    fn eq(&self, other: &Self) -> bool {
        self.col_version == other.col_version
            && self.db_version == other.db_version
            && self.node_id == other.node_id
    }
}

/// True when an incoming write with precedence `incoming` replaces a
/// column currently at `local`.
///
/// Strict comparison: an equal triple is the same write arriving again
/// and must be a no-op.
pub fn supersedes(incoming: Precedence, local: Precedence) -> bool {
    incoming > local
}
