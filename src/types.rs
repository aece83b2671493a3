//! Core value and identifier types shared across the engine.

use bitflags::bitflags;

// ============================================================================
// Identifier aliases
// ============================================================================

/// Stable 64-bit node identity, assigned monotonically, never reused.
pub type NodeId = u64;
/// Snapshot-local physical slot of a node.
pub type PhysNode = u32;
/// Index into the snapshot string table.
pub type StringId = u32;
pub type LabelId = u32;
pub type ETypeId = u32;
pub type PropKeyId = u32;
pub type TxId = u64;
/// MVCC logical timestamp (start / commit).
pub type Timestamp = u64;

// ============================================================================
// Property values
// ============================================================================

/// On-disk tag for a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropValueTag {
  Null = 0,
  Bool = 1,
  I64 = 2,
  F64 = 3,
  String = 4,
  VectorF32 = 5,
}

impl PropValueTag {
  pub fn from_u8(tag: u8) -> Option<Self> {
    match tag {
      0 => Some(Self::Null),
      1 => Some(Self::Bool),
      2 => Some(Self::I64),
      3 => Some(Self::F64),
      4 => Some(Self::String),
      5 => Some(Self::VectorF32),
      _ => None,
    }
  }
}

/// A property value attached to a node or an edge.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
  Null,
  Bool(bool),
  I64(i64),
  F64(f64),
  String(String),
  VectorF32(Vec<f32>),
}

impl PropValue {
  pub fn tag(&self) -> PropValueTag {
    match self {
      PropValue::Null => PropValueTag::Null,
      PropValue::Bool(_) => PropValueTag::Bool,
      PropValue::I64(_) => PropValueTag::I64,
      PropValue::F64(_) => PropValueTag::F64,
      PropValue::String(_) => PropValueTag::String,
      PropValue::VectorF32(_) => PropValueTag::VectorF32,
    }
  }
}

// ============================================================================
// Edge patches (delta)
// ============================================================================

/// One edge endpoint patch in the delta, keyed from the owning node's side.
/// `other` is the destination for out-patches and the source for in-patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgePatch {
  pub etype: ETypeId,
  pub other: NodeId,
}

// ============================================================================
// Snapshot header
// ============================================================================

bitflags! {
  /// Feature flags recorded in the snapshot header.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct SnapshotFlags: u32 {
    const HAS_IN_EDGES = 1 << 0;
    const HAS_NODE_LABELS = 1 << 1;
    const HAS_PROPERTIES = 1 << 2;
    const HAS_KEY_BUCKETS = 1 << 3;
    const HAS_VECTOR_STORES = 1 << 4;
  }
}

/// Parsed fixed-size snapshot header.
#[derive(Debug, Clone)]
pub struct SnapshotHeader {
  pub magic: u32,
  pub version: u32,
  pub flags: SnapshotFlags,
  pub generation: u64,
  pub created_unix_ns: u64,
  pub num_nodes: u64,
  pub num_edges: u64,
  pub max_node_id: u64,
  pub num_strings: u64,
  /// Highest label id with a definition; the id space may have holes
  /// (an aborted definition wastes its id), so this is not a count.
  pub max_label_id: u32,
  pub max_etype_id: u32,
  pub max_propkey_id: u32,
  pub section_count: u32,
}

// ============================================================================
// Check results
// ============================================================================

/// Outcome of a full snapshot integrity check.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
  pub valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MvccStats {
  pub active_transactions: usize,
  pub min_active_ts: Timestamp,
  pub versions_pruned: u64,
  pub chains_truncated: u64,
  pub gc_runs: u64,
}

/// Aggregate database statistics, reported by `GraphDB::stats`.
#[derive(Debug, Clone, Default)]
pub struct DbStats {
  pub snapshot_gen: u64,
  pub snapshot_nodes: u64,
  pub snapshot_edges: u64,
  pub snapshot_max_node_id: u64,
  pub delta_nodes_created: usize,
  pub delta_nodes_deleted: usize,
  pub delta_edges_added: usize,
  pub delta_edges_deleted: usize,
  pub wal_seq: u64,
  pub wal_bytes: u64,
  pub recommend_compact: bool,
  pub mvcc: Option<MvccStats>,
}
