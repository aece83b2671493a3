//! RayDB - embedded property-graph storage engine
//!
//! # Architecture
//!
//! RayDB uses a **Snapshot + Delta + WAL** architecture:
//!
//! - **Snapshot**: memory-mapped columnar CSR format for fast reads
//! - **Delta**: in-memory overlay of changes since the snapshot
//! - **WAL**: append-only log making commits durable and replayable
//! - **MVCC**: optional snapshot isolation with version chains and GC
//!
//! Reads merge the snapshot with the delta under MVCC visibility; the
//! compactor periodically folds the delta into the next snapshot
//! generation. Databases are either a directory (`manifest.gdm`,
//! `snapshots/`, `wal/`) or a single `.raydb` container file.

#![deny(clippy::all)]

pub mod cache;
pub mod check;
pub mod constants;
pub mod core;
pub mod error;
pub mod graph;
pub mod mvcc;
pub mod types;
pub mod util;
pub mod vector;

pub use error::{RayError, Result};
pub use types::{
  DbStats, ETypeId, LabelId, NodeId, PropKeyId, PropValue, PropValueTag, Timestamp, TxId,
};

pub use graph::{begin_read_tx, begin_tx, close_graph_db, commit, open_graph_db, rollback};
pub use graph::{GraphDB, OpenOptions, TxHandle};

/// Crate version string.
pub fn version() -> &'static str {
  env!("CARGO_PKG_VERSION")
}
