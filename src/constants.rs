//! Magic numbers and format constants.

use crate::types::NodeId;

// ============================================================================
// Magic bytes (little-endian u32 unless noted)
// ============================================================================

/// Snapshot magic: "GDSN"
pub const MAGIC_SNAPSHOT: u32 = 0x4e534447;

/// Manifest magic: "GDMF"
pub const MAGIC_MANIFEST: u32 = 0x464d4447;

/// Vector store blob magic: "VEC1"
pub const MAGIC_VECTOR: u32 = 0x31434556;

/// Single-file container magic (16 bytes): "RayDB format 1\0\0"
pub const MAGIC_CONTAINER: [u8; 16] = [
  0x52, 0x61, 0x79, 0x44, 0x42, 0x20, 0x66, 0x6f, // "RayDB fo"
  0x72, 0x6d, 0x61, 0x74, 0x20, 0x31, 0x00, 0x00, // "rmat 1\0\0"
];

// ============================================================================
// Format versions
// ============================================================================

pub const VERSION_SNAPSHOT: u32 = 1;
pub const VERSION_MANIFEST: u32 = 1;
pub const VERSION_VECTOR: u32 = 1;
pub const VERSION_CONTAINER: u32 = 1;

// ============================================================================
// Layout
// ============================================================================

/// Fixed snapshot header size in bytes.
pub const SNAPSHOT_HEADER_SIZE: usize = 80;

/// Packed section-table entry: id u16 + offset u64 + length u64 + crc u32.
pub const SECTION_ENTRY_SIZE: usize = 22;

/// 64-byte section alignment for mmap friendliness.
pub const SECTION_ALIGNMENT: usize = 64;

/// Key-index entry: hash u64 + string_id u32 + pad u32 + node_id u64.
pub const KEY_INDEX_ENTRY_SIZE: usize = 24;

/// Node property record: phys u32 + propkey u32 + tag u8 + pad[7] + payload u64.
pub const NODE_PROP_ENTRY_SIZE: usize = 24;

/// Edge property record: src u32 + etype u32 + dst u32 + propkey u32 + tag u8 + pad[7] + payload u64.
pub const EDGE_PROP_ENTRY_SIZE: usize = 32;

/// WAL record envelope without payload: type u8 + tx_id u64 + payload_len u32 + crc u32.
pub const WAL_RECORD_OVERHEAD: usize = 17;

/// Single-file container header page (holds both directory slots).
pub const CONTAINER_HEADER_SIZE: usize = 4096;

/// Default reserved WAL region inside a container (4MB).
pub const CONTAINER_WAL_DEFAULT_SIZE: usize = 4 * 1024 * 1024;

// ============================================================================
// File names
// ============================================================================

pub const MANIFEST_FILE: &str = "manifest.gdm";
pub const LOCK_FILE: &str = "lock";
pub const SNAPSHOTS_DIR: &str = "snapshots";
pub const WAL_DIR: &str = "wal";

/// Single-file extension
pub const EXT_RAYDB: &str = "raydb";

pub fn snapshot_filename(generation: u64) -> String {
  format!("{generation:016}.gds")
}

pub fn wal_filename(seq: u64) -> String {
  format!("{seq:016}.wal")
}

// ============================================================================
// WAL sizing
// ============================================================================

/// Default soft cap on buffered WAL bytes before a checkpoint is forced (64MB).
pub const WAL_DEFAULT_SIZE: usize = 64 * 1024 * 1024;

// ============================================================================
// Compaction thresholds
// ============================================================================

/// Default delta/snapshot ratio that triggers auto-checkpoint.
pub const DEFAULT_CHECKPOINT_THRESHOLD: f64 = 0.1;

/// Floor on the snapshot size used in the ratio so tiny databases still compact.
pub const COMPACT_MIN_BASE: usize = 1024;

// ============================================================================
// Initial IDs (start from 1, 0 is reserved/null)
// ============================================================================

pub const INITIAL_NODE_ID: NodeId = 1;
pub const INITIAL_LABEL_ID: u32 = 1;
pub const INITIAL_ETYPE_ID: u32 = 1;
pub const INITIAL_PROPKEY_ID: u32 = 1;
pub const INITIAL_TX_ID: u64 = 1;

/// Snapshot generation starts at 1; 0 means no snapshot yet.
pub const INITIAL_SNAPSHOT_GEN: u64 = 0;
