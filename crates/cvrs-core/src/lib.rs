//! # cvrs-core
//!
//! Core of CVRS, a delta-state CRDT for a keyed record store. Each record
//! is a map of named columns; each column carries its own version
//! metadata, so replicas can edit records concurrently and exchange
//! compact change sets instead of whole states.
//!
//! This crate provides:
//! - A per-replica [`LogicalClock`] driving `db_version` numbering
//! - The [`Change`] value object that transports ship verbatim
//! - [`RecordStore`]: insert/update, tombstone-correct deletion, merging,
//!   delta extraction (`get_changes_since`) and parent overlays
//! - A pure conflict resolution rule over `(col_version, db_version,
//!   node_id)` triples
//! - [`compress_changes`]: collapse a change batch to its minimal
//!   equivalent
//!
//! Two stores that have merged the same set of changes report identical
//! [`RecordStore::get_data`] views, whatever the delivery order or
//! multiplicity. The crate does no I/O and spawns nothing; transport and
//! persistence belong to the application.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cvrs_core::RecordStore;
//!
//! let mut n1: RecordStore<String, String> = RecordStore::new(1);
//! let mut n2: RecordStore<String, String> = RecordStore::new(2);
//!
//! let changes = n1.insert_or_update(
//!     "user-7".into(),
//!     [("name".to_string(), "ada".to_string())],
//! );
//! n2.merge_changes(&changes, false);
//!
//! assert_eq!(n1.get_data(), n2.get_data());
//! ```

pub mod change;
pub mod clock;
pub mod record;
pub mod store;
pub mod version;

pub use change::{compress_changes, Change, ChangeKind};
pub use clock::{LogicalClock, NodeId, Version};
pub use record::{Fields, Record, TOMBSTONE_COLUMN};
pub use store::RecordStore;
pub use version::{supersedes, ColumnVersion, Precedence};
