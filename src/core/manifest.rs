//! Manifest: the small versioned file that names the active snapshot
//! generation and WAL segments.
//!
//! Layout: `GDMF | version u32 | snapshot_gen u64 | wal_seq u64 |
//! wal_floor u64 | options_len u32 | options_json | crc32c u32` with the CRC
//! over everything before it. The manifest is rewritten atomically
//! (temp file + rename + directory fsync); corruption is fatal at open.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{MAGIC_MANIFEST, MANIFEST_FILE, VERSION_MANIFEST};
use crate::error::{RayError, Result};
use crate::util::binary::{read_u32, read_u64, write_u32, write_u64};
use crate::util::crc::crc32c;

/// Durable open options recorded alongside the pointers so a reopen can
/// validate expectations (MVCC on/off cannot silently flip, for example).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestOptions {
  pub mvcc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
  /// Generation of the active snapshot; 0 when none has been written yet.
  pub snapshot_gen: u64,
  /// Sequence number of the segment currently appended to.
  pub wal_seq: u64,
  /// Oldest segment that must be replayed on open.
  pub wal_floor: u64,
  pub options: ManifestOptions,
}

impl Manifest {
  pub fn empty(options: ManifestOptions) -> Self {
    Self {
      snapshot_gen: crate::constants::INITIAL_SNAPSHOT_GEN,
      wal_seq: crate::constants::INITIAL_TX_ID,
      wal_floor: crate::constants::INITIAL_TX_ID,
      options,
    }
  }

  pub fn encode(&self) -> Result<Vec<u8>> {
    let options = serde_json::to_vec(&self.options)
      .map_err(|e| RayError::Internal(format!("manifest options encode: {e}")))?;

    let mut buf = vec![0u8; 36 + options.len() + 4];
    write_u32(&mut buf, 0, MAGIC_MANIFEST);
    write_u32(&mut buf, 4, VERSION_MANIFEST);
    write_u64(&mut buf, 8, self.snapshot_gen);
    write_u64(&mut buf, 16, self.wal_seq);
    write_u64(&mut buf, 24, self.wal_floor);
    write_u32(&mut buf, 32, options.len() as u32);
    buf[36..36 + options.len()].copy_from_slice(&options);
    let crc = crc32c(&buf[..36 + options.len()]);
    write_u32(&mut buf, 36 + options.len(), crc);
    Ok(buf)
  }

  pub fn decode(buf: &[u8]) -> Result<Self> {
    if buf.len() < 40 {
      return Err(RayError::CorruptManifest(format!(
        "manifest too small: {} bytes",
        buf.len()
      )));
    }

    let magic = read_u32(buf, 0);
    if magic != MAGIC_MANIFEST {
      return Err(RayError::InvalidMagic {
        expected: MAGIC_MANIFEST,
        got: magic,
      });
    }

    let version = read_u32(buf, 4);
    if version > VERSION_MANIFEST {
      return Err(RayError::VersionMismatch {
        supported: VERSION_MANIFEST,
        found: version,
      });
    }

    let options_len = read_u32(buf, 32) as usize;
    let body_end = 36 + options_len;
    if buf.len() < body_end + 4 {
      return Err(RayError::CorruptManifest("options blob truncated".to_string()));
    }

    let stored_crc = read_u32(buf, body_end);
    let computed = crc32c(&buf[..body_end]);
    if stored_crc != computed {
      return Err(RayError::CrcMismatch {
        stored: stored_crc,
        computed,
      });
    }

    let options: ManifestOptions = serde_json::from_slice(&buf[36..body_end])
      .map_err(|e| RayError::CorruptManifest(format!("options blob: {e}")))?;

    Ok(Self {
      snapshot_gen: read_u64(buf, 8),
      wal_seq: read_u64(buf, 16),
      wal_floor: read_u64(buf, 24),
      options,
    })
  }
}

/// Read the manifest under `root`, or `None` when the database is new.
pub fn read_manifest(root: &Path) -> Result<Option<Manifest>> {
  let path = root.join(MANIFEST_FILE);
  if !path.exists() {
    return Ok(None);
  }
  let bytes = std::fs::read(&path)?;
  Manifest::decode(&bytes).map(Some)
}

/// Atomically publish a manifest: write to a temp path, fsync, rename over
/// the live file, fsync the directory.
pub fn write_manifest(root: &Path, manifest: &Manifest) -> Result<()> {
  let bytes = manifest.encode()?;
  let tmp = root.join(format!("{MANIFEST_FILE}.tmp"));
  {
    let mut file = OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(true)
      .open(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
  }
  std::fs::rename(&tmp, root.join(MANIFEST_FILE))?;
  sync_dir(root)?;
  Ok(())
}

/// Fsync a directory so a rename inside it is durable.
pub fn sync_dir(dir: &Path) -> Result<()> {
  #[cfg(unix)]
  {
    File::open(dir)?.sync_all()?;
  }
  #[cfg(not(unix))]
  {
    let _ = dir;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn round_trip() {
    let dir = tempdir().unwrap();
    assert!(read_manifest(dir.path()).unwrap().is_none());

    let manifest = Manifest {
      snapshot_gen: 4,
      wal_seq: 129,
      wal_floor: 97,
      options: ManifestOptions { mvcc: true },
    };
    write_manifest(dir.path(), &manifest).unwrap();

    let loaded = read_manifest(dir.path()).unwrap().unwrap();
    assert_eq!(loaded, manifest);
  }

  #[test]
  fn corruption_is_fatal() {
    let dir = tempdir().unwrap();
    write_manifest(dir.path(), &Manifest::empty(ManifestOptions::default())).unwrap();

    let path = dir.path().join(MANIFEST_FILE);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[10] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let err = read_manifest(dir.path()).unwrap_err();
    assert!(matches!(
      err,
      RayError::CrcMismatch { .. } | RayError::CorruptManifest(_)
    ));
  }

  #[test]
  fn rewrite_replaces_atomically() {
    let dir = tempdir().unwrap();
    let mut manifest = Manifest::empty(ManifestOptions::default());
    write_manifest(dir.path(), &manifest).unwrap();

    manifest.snapshot_gen = 9;
    write_manifest(dir.path(), &manifest).unwrap();
    assert_eq!(read_manifest(dir.path()).unwrap().unwrap().snapshot_gen, 9);
    assert!(!dir.path().join(format!("{MANIFEST_FILE}.tmp")).exists());
  }
}
