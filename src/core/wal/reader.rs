//! WAL recovery scan.
//!
//! A segment is a byte stream of records; scanning stops at the first
//! record that is truncated or fails its CRC, and everything from there on
//! is treated as never written. Only transactions whose `COMMIT` record
//! appears in the same segment are replayed, in commit order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::constants::WAL_DIR;
use crate::core::wal::record::{WalRecord, WalRecordType};
use crate::error::Result;
use crate::types::TxId;

#[derive(Debug, Default)]
pub struct SegmentScan {
  pub records: Vec<WalRecord>,
  /// Byte length of the valid record prefix.
  pub valid_len: usize,
  /// Whether trailing bytes were discarded.
  pub truncated_tail: bool,
}

/// Scan raw segment bytes into the valid record prefix.
pub fn scan_segment_bytes(bytes: &[u8]) -> SegmentScan {
  let mut scan = SegmentScan::default();
  let mut offset = 0;
  while offset < bytes.len() {
    match WalRecord::decode(bytes, offset) {
      Some((record, consumed)) => {
        scan.records.push(record);
        offset += consumed;
      }
      None => {
        scan.truncated_tail = true;
        break;
      }
    }
  }
  scan.valid_len = offset;
  scan
}

/// Scan a segment file.
pub fn scan_segment(path: &Path) -> Result<SegmentScan> {
  let bytes = std::fs::read(path)?;
  let scan = scan_segment_bytes(&bytes);
  if scan.truncated_tail {
    log::warn!(
      "WAL segment {} has {} invalid trailing bytes; discarded",
      path.display(),
      bytes.len() - scan.valid_len
    );
  }
  Ok(scan)
}

/// Group records into committed transactions, ordered by the position of
/// their `COMMIT` record. Aborted and unterminated transactions vanish.
pub fn extract_committed(records: &[WalRecord]) -> Vec<(TxId, Vec<WalRecord>)> {
  let mut open: HashMap<TxId, Vec<WalRecord>> = HashMap::new();
  let mut committed = Vec::new();

  for record in records {
    match record.record_type {
      WalRecordType::Begin => {
        open.insert(record.tx_id, Vec::new());
      }
      WalRecordType::Commit => {
        if let Some(ops) = open.remove(&record.tx_id) {
          committed.push((record.tx_id, ops));
        }
      }
      WalRecordType::Abort => {
        open.remove(&record.tx_id);
      }
      WalRecordType::Checkpoint => {}
      _ => {
        // Records outside an explicit BEGIN still belong to their tx.
        open.entry(record.tx_id).or_default().push(record.clone());
      }
    }
  }

  committed
}

/// Highest tx id observed in a record stream, 0 when empty.
pub fn max_tx_id(records: &[WalRecord]) -> TxId {
  records.iter().map(|r| r.tx_id).max().unwrap_or(0)
}

/// List segment sequence numbers present under `<root>/wal`, ascending.
pub fn list_segments(root: &Path) -> Result<Vec<(u64, PathBuf)>> {
  let dir = root.join(WAL_DIR);
  let mut segments = Vec::new();
  if !dir.exists() {
    return Ok(segments);
  }
  for entry in std::fs::read_dir(&dir)? {
    let entry = entry?;
    let path = entry.path();
    if path.extension().is_some_and(|ext| ext == "wal") {
      if let Some(seq) = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse::<u64>().ok())
      {
        segments.push((seq, path));
      }
    }
  }
  segments.sort_by_key(|(seq, _)| *seq);
  Ok(segments)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::wal::record::*;

  fn rec(record_type: WalRecordType, tx_id: TxId) -> WalRecord {
    WalRecord::new(record_type, tx_id, Vec::new())
  }

  #[test]
  fn commit_order_preserved() {
    // tx2 commits before tx1.
    let records = vec![
      rec(WalRecordType::Begin, 1),
      WalRecord::new(WalRecordType::CreateNode, 1, build_create_node_payload(1, None)),
      rec(WalRecordType::Begin, 2),
      WalRecord::new(WalRecordType::CreateNode, 2, build_create_node_payload(2, None)),
      rec(WalRecordType::Commit, 2),
      rec(WalRecordType::Commit, 1),
    ];
    let committed = extract_committed(&records);
    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].0, 2);
    assert_eq!(committed[1].0, 1);
  }

  #[test]
  fn uncommitted_and_aborted_are_dropped() {
    let records = vec![
      rec(WalRecordType::Begin, 1),
      WalRecord::new(WalRecordType::CreateNode, 1, build_create_node_payload(1, None)),
      rec(WalRecordType::Begin, 2),
      WalRecord::new(WalRecordType::CreateNode, 2, build_create_node_payload(2, None)),
      rec(WalRecordType::Abort, 2),
    ];
    assert!(extract_committed(&records).is_empty());
    assert_eq!(max_tx_id(&records), 2);
  }

  #[test]
  fn scan_stops_at_garbage() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&rec(WalRecordType::Begin, 1).encode());
    bytes.extend_from_slice(&rec(WalRecordType::Commit, 1).encode());
    let valid = bytes.len();
    bytes.extend_from_slice(&[0x5a; 37]);

    let scan = scan_segment_bytes(&bytes);
    assert_eq!(scan.records.len(), 2);
    assert_eq!(scan.valid_len, valid);
    assert!(scan.truncated_tail);
  }

  #[test]
  fn scan_every_truncation_point_is_a_prefix() {
    // Truncating at any byte offset yields a prefix of committed
    // transactions, never a partial record.
    let mut bytes = Vec::new();
    for tx in 1..=3u64 {
      bytes.extend_from_slice(&rec(WalRecordType::Begin, tx).encode());
      bytes.extend_from_slice(
        &WalRecord::new(
          WalRecordType::CreateNode,
          tx,
          build_create_node_payload(tx, None),
        )
        .encode(),
      );
      bytes.extend_from_slice(&rec(WalRecordType::Commit, tx).encode());
    }

    let full = extract_committed(&scan_segment_bytes(&bytes).records).len();
    assert_eq!(full, 3);

    for cut in 0..bytes.len() {
      let scan = scan_segment_bytes(&bytes[..cut]);
      let committed = extract_committed(&scan.records);
      assert!(committed.len() <= full);
      for (i, (tx_id, _)) in committed.iter().enumerate() {
        assert_eq!(*tx_id, i as u64 + 1);
      }
    }
  }
}
