//! WAL segment writer.
//!
//! Segments are plain files named `<start_tx_id>.wal` under `wal/`. A
//! transaction's records are appended as one contiguous batch terminated by
//! its `COMMIT` record, followed by a single fsync; nothing the transaction
//! wrote is considered durable before that fsync returns.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::constants::{wal_filename, WAL_DIR};
use crate::core::wal::reader::scan_segment_bytes;
use crate::core::wal::record::WalRecord;
use crate::error::{RayError, Result};

pub struct WalWriter {
  file: File,
  path: PathBuf,
  /// Segment sequence number (the first tx id the segment may contain).
  seq: u64,
  /// Bytes of valid records currently in the segment.
  len: u64,
  /// Soft cap on segment bytes; exceeding it surfaces `WalBufferFull`.
  max_bytes: u64,
}

impl WalWriter {
  /// Create a fresh segment file, truncating any stale file with the same
  /// sequence number.
  pub fn create(root: &Path, seq: u64, max_bytes: u64) -> Result<Self> {
    let path = root.join(WAL_DIR).join(wal_filename(seq));
    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(true)
      .open(&path)?;
    Ok(Self {
      file,
      path,
      seq,
      len: 0,
      max_bytes,
    })
  }

  /// Open an existing segment for appending. The tail past the last valid
  /// record is discarded (it is defined as never written), so appends land
  /// directly after the valid prefix.
  pub fn open(root: &Path, seq: u64, max_bytes: u64) -> Result<Self> {
    let path = root.join(WAL_DIR).join(wal_filename(seq));
    if !path.exists() {
      return Self::create(root, seq, max_bytes);
    }

    let bytes = std::fs::read(&path)?;
    let scan = scan_segment_bytes(&bytes);
    let valid_len = scan.valid_len as u64;

    let mut file = OpenOptions::new().write(true).read(true).open(&path)?;
    if valid_len < bytes.len() as u64 {
      log::warn!(
        "discarding {} trailing WAL bytes in {}",
        bytes.len() as u64 - valid_len,
        path.display()
      );
      file.set_len(valid_len)?;
    }
    file.seek(SeekFrom::Start(valid_len))?;

    Ok(Self {
      file,
      path,
      seq,
      len: valid_len,
      max_bytes,
    })
  }

  /// Open a segment without touching it: garbage tails are left in place
  /// (read-only opens must not mutate the database directory).
  pub fn open_readonly(root: &Path, seq: u64) -> Result<Self> {
    let path = root.join(WAL_DIR).join(wal_filename(seq));
    let (file, len) = if path.exists() {
      let bytes = std::fs::read(&path)?;
      let valid_len = scan_segment_bytes(&bytes).valid_len as u64;
      (OpenOptions::new().read(true).open(&path)?, valid_len)
    } else {
      (
        OpenOptions::new()
          .read(true)
          .write(true)
          .create(true)
          .truncate(false)
          .open(&path)?,
        0,
      )
    };
    Ok(Self {
      file,
      path,
      seq,
      len,
      max_bytes: 0,
    })
  }

  pub fn seq(&self) -> u64 {
    self.seq
  }

  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Whether appending `additional` bytes would cross the soft cap.
  pub fn would_overflow(&self, additional: usize) -> bool {
    self.len + additional as u64 > self.max_bytes
  }

  /// Append a commit batch and fsync. The batch must already end with the
  /// transaction's `COMMIT` record.
  pub fn append_commit(&mut self, records: &[WalRecord]) -> Result<()> {
    let total: usize = records.iter().map(WalRecord::encoded_len).sum();
    if self.would_overflow(total) {
      return Err(RayError::WalBufferFull);
    }

    let mut batch = Vec::with_capacity(total);
    for record in records {
      batch.extend_from_slice(&record.encode());
    }

    self.file.write_all(&batch)?;
    self.file.sync_all()?;
    self.len += batch.len() as u64;
    Ok(())
  }

  /// Sync without appending (used at close).
  pub fn sync(&mut self) -> Result<()> {
    self.file.sync_all()?;
    Ok(())
  }
}
