//! Single-file `.raydb` container.
//!
//! Layout: a 4 KiB header page holding the magic and two section-directory
//! slots, a reserved in-place WAL region, then the snapshot image and the
//! embedded manifest blob. The active-slot byte is written and fsynced
//! after the slot it points at, which makes the directory flip the durable
//! commit point for a checkpoint.
//!
//! A checkpoint publishes the new snapshot in two hops: first appended past
//! the live data and flipped in, then rewritten at the canonical offset
//! right after the WAL region and flipped again, letting the file be
//! truncated back. A crash between any two steps leaves the active slot
//! pointing at fully-written bytes. The WAL region carries a small epoch
//! header so records from before a checkpoint are never replayed on top of
//! the snapshot that folded them.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::constants::*;
use crate::core::manifest::{sync_dir, Manifest};
use crate::core::wal::reader::{scan_segment_bytes, SegmentScan};
use crate::core::wal::record::WalRecord;
use crate::error::{RayError, Result};
use crate::util::binary::{align_up, read_u32, read_u64, write_u32, write_u64};
use crate::util::crc::crc32c;
use crate::util::mmap::{map_file, Mmap};

const SLOT_A_OFFSET: usize = 64;
const SLOT_B_OFFSET: usize = 256;
const SLOT_SIZE: usize = 76;
const ACTIVE_SLOT_OFFSET: usize = 20;
const WAL_REGION_HEADER: usize = 16;

/// WAL region epoch header magic: "GWAL"
const MAGIC_WAL_REGION: u32 = 0x4c415747;

// ============================================================================
// Directory slot
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DirectorySlot {
  epoch: u64,
  manifest_off: u64,
  manifest_len: u64,
  snapshot_off: u64,
  snapshot_len: u64,
  wal_off: u64,
  wal_len: u64,
  /// WAL region epoch; the region header must match for records to count.
  wal_seq: u64,
}

impl DirectorySlot {
  fn encode(&self) -> [u8; SLOT_SIZE] {
    let mut buf = [0u8; SLOT_SIZE];
    write_u64(&mut buf, 0, self.epoch);
    write_u64(&mut buf, 8, self.manifest_off);
    write_u64(&mut buf, 16, self.manifest_len);
    write_u64(&mut buf, 24, self.snapshot_off);
    write_u64(&mut buf, 32, self.snapshot_len);
    write_u64(&mut buf, 40, self.wal_off);
    write_u64(&mut buf, 48, self.wal_len);
    write_u64(&mut buf, 56, self.wal_seq);
    let crc = crc32c(&buf[..SLOT_SIZE - 4]);
    write_u32(&mut buf, SLOT_SIZE - 4, crc);
    buf
  }

  fn decode(buf: &[u8]) -> Result<Self> {
    let stored = read_u32(buf, SLOT_SIZE - 4);
    let computed = crc32c(&buf[..SLOT_SIZE - 4]);
    if stored != computed {
      return Err(RayError::CrcMismatch {
        stored,
        computed,
      });
    }
    Ok(Self {
      epoch: read_u64(buf, 0),
      manifest_off: read_u64(buf, 8),
      manifest_len: read_u64(buf, 16),
      snapshot_off: read_u64(buf, 24),
      snapshot_len: read_u64(buf, 32),
      wal_off: read_u64(buf, 40),
      wal_len: read_u64(buf, 48),
      wal_seq: read_u64(buf, 56),
    })
  }
}

// ============================================================================
// Container
// ============================================================================

pub struct Container {
  file: File,
  path: PathBuf,
  slot: DirectorySlot,
  active_slot: u8,
  manifest: Manifest,
  /// Write cursor inside the WAL region, past the epoch header.
  wal_cursor: u64,
  /// Soft cap on WAL bytes (region size governs the hard cap).
  wal_soft_cap: u64,
}

impl Container {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  pub fn snapshot_generation(&self) -> u64 {
    self.manifest.snapshot_gen
  }

  pub fn wal_bytes(&self) -> u64 {
    self.wal_cursor.saturating_sub(WAL_REGION_HEADER as u64)
  }

  pub fn wal_capacity(&self) -> u64 {
    self.slot.wal_len.min(self.wal_soft_cap + WAL_REGION_HEADER as u64)
  }

  /// Lower the effective WAL cap below the reserved region size.
  pub fn set_wal_soft_cap(&mut self, bytes: u64) {
    self.wal_soft_cap = bytes.max(1);
  }

  /// Create a fresh container file.
  pub fn create(path: &Path, wal_len: usize, manifest: Manifest) -> Result<Self> {
    let mut file = OpenOptions::new()
      .create_new(true)
      .read(true)
      .write(true)
      .open(path)?;

    let wal_len = align_up(wal_len.max(64 * 1024), 4096) as u64;
    let slot = DirectorySlot {
      epoch: 1,
      manifest_off: 0,
      manifest_len: 0,
      snapshot_off: 0,
      snapshot_len: 0,
      wal_off: CONTAINER_HEADER_SIZE as u64,
      wal_len,
      wal_seq: 1,
    };

    let mut header = vec![0u8; CONTAINER_HEADER_SIZE];
    header[..16].copy_from_slice(&MAGIC_CONTAINER);
    write_u32(&mut header, 16, VERSION_CONTAINER);
    header[ACTIVE_SLOT_OFFSET] = 0;
    header[SLOT_A_OFFSET..SLOT_A_OFFSET + SLOT_SIZE].copy_from_slice(&slot.encode());
    file.write_all(&header)?;

    // Reserve the WAL region and stamp its epoch header.
    file.set_len(CONTAINER_HEADER_SIZE as u64 + wal_len)?;
    write_wal_region_header(&mut file, slot.wal_off, slot.wal_seq)?;
    file.sync_all()?;
    if let Some(dir) = path.parent() {
      sync_dir(dir)?;
    }

    let mut container = Self {
      file,
      path: path.to_path_buf(),
      slot,
      active_slot: 0,
      manifest,
      wal_cursor: WAL_REGION_HEADER as u64,
      wal_soft_cap: wal_len,
    };
    // Persist the initial manifest blob via an empty checkpoint image.
    container.persist_manifest_only()?;
    Ok(container)
  }

  /// Open an existing container and scan its WAL region.
  pub fn open(path: &Path) -> Result<(Self, SegmentScan)> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;

    let mut header = vec![0u8; CONTAINER_HEADER_SIZE];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)?;

    if header[..16] != MAGIC_CONTAINER {
      return Err(RayError::CorruptManifest(
        "not a raydb container (bad magic)".to_string(),
      ));
    }
    let version = read_u32(&header, 16);
    if version > VERSION_CONTAINER {
      return Err(RayError::VersionMismatch {
        supported: VERSION_CONTAINER,
        found: version,
      });
    }

    let active_slot = header[ACTIVE_SLOT_OFFSET];
    let slot_offset = if active_slot == 0 {
      SLOT_A_OFFSET
    } else {
      SLOT_B_OFFSET
    };
    let slot = DirectorySlot::decode(&header[slot_offset..slot_offset + SLOT_SIZE])
      .map_err(|e| RayError::CorruptManifest(format!("active directory slot: {e}")))?;

    let manifest = if slot.manifest_len > 0 {
      let mut blob = vec![0u8; slot.manifest_len as usize];
      file.seek(SeekFrom::Start(slot.manifest_off))?;
      file.read_exact(&mut blob)?;
      Manifest::decode(&blob)?
    } else {
      Manifest::empty(Default::default())
    };

    // Scan the WAL region; a stale epoch header means the region is empty.
    let mut region = vec![0u8; slot.wal_len as usize];
    file.seek(SeekFrom::Start(slot.wal_off))?;
    file.read_exact(&mut region)?;

    let scan = if wal_region_seq(&region) == Some(slot.wal_seq) {
      scan_segment_bytes(&region[WAL_REGION_HEADER..])
    } else {
      SegmentScan::default()
    };
    let wal_cursor = WAL_REGION_HEADER as u64 + scan.valid_len as u64;
    let wal_soft_cap = slot.wal_len;

    Ok((
      Self {
        file,
        path: path.to_path_buf(),
        slot,
        active_slot,
        manifest,
        wal_cursor,
        wal_soft_cap,
      },
      scan,
    ))
  }

  /// Map the file and return the active snapshot's byte offset, when one
  /// has been checkpointed.
  pub fn map_snapshot(&self) -> Result<Option<(Arc<Mmap>, usize)>> {
    if self.slot.snapshot_len == 0 {
      return Ok(None);
    }
    let mmap = map_file(&self.file)?;
    Ok(Some((Arc::new(mmap), self.slot.snapshot_off as usize)))
  }

  // ==========================================================================
  // WAL region
  // ==========================================================================

  pub fn wal_would_overflow(&self, additional: usize) -> bool {
    self.wal_cursor + additional as u64 > self.wal_capacity()
  }

  /// Append a commit batch into the WAL region and fsync.
  pub fn wal_append_commit(&mut self, records: &[WalRecord]) -> Result<()> {
    let total: usize = records.iter().map(WalRecord::encoded_len).sum();
    if self.wal_would_overflow(total) {
      return Err(RayError::WalBufferFull);
    }

    let mut batch = Vec::with_capacity(total);
    for record in records {
      batch.extend_from_slice(&record.encode());
    }

    self
      .file
      .seek(SeekFrom::Start(self.slot.wal_off + self.wal_cursor))?;
    self.file.write_all(&batch)?;
    self.file.sync_all()?;
    self.wal_cursor += batch.len() as u64;
    Ok(())
  }

  // ==========================================================================
  // Checkpoint publish
  // ==========================================================================

  /// Publish a new snapshot image and manifest, then reset the WAL region.
  /// See the module docs for the two-hop crash-safety argument.
  pub fn publish_checkpoint(&mut self, snapshot_image: &[u8], manifest: Manifest) -> Result<()> {
    let manifest_blob = manifest.encode()?;
    let wal_end = self.slot.wal_off + self.slot.wal_len;
    let canonical = align_up(wal_end as usize, SECTION_ALIGNMENT) as u64;

    // Hop 1: append past every live byte.
    let live_end = (self.slot.snapshot_off + self.slot.snapshot_len)
      .max(self.slot.manifest_off + self.slot.manifest_len)
      .max(canonical + snapshot_image.len() as u64);
    let staging = align_up(live_end as usize, SECTION_ALIGNMENT) as u64;

    let staged = self.write_image_at(staging, snapshot_image, &manifest_blob)?;
    self.flip_to(staged)?;

    // Hop 2: rewrite at the canonical offset and flip again so the file
    // can shrink back.
    let canonical_slot = self.write_image_at(canonical, snapshot_image, &manifest_blob)?;
    self.flip_to(canonical_slot)?;

    let end = canonical_slot.manifest_off + canonical_slot.manifest_len;
    self.file.set_len(end)?;

    // Invalidate old WAL records last; a crash before this leaves a region
    // whose epoch no longer matches the slot, which scans as empty.
    write_wal_region_header(&mut self.file, self.slot.wal_off, self.slot.wal_seq)?;
    self.file.sync_all()?;

    self.wal_cursor = WAL_REGION_HEADER as u64;
    self.manifest = manifest;
    Ok(())
  }

  fn persist_manifest_only(&mut self) -> Result<()> {
    let blob = self.manifest.encode()?;
    let offset = self.slot.wal_off + self.slot.wal_len;
    self.file.seek(SeekFrom::Start(offset))?;
    self.file.write_all(&blob)?;
    self.file.sync_all()?;

    let mut slot = self.slot;
    slot.epoch += 1;
    slot.manifest_off = offset;
    slot.manifest_len = blob.len() as u64;
    self.flip_to(slot)?;
    Ok(())
  }

  fn write_image_at(
    &mut self,
    offset: u64,
    snapshot_image: &[u8],
    manifest_blob: &[u8],
  ) -> Result<DirectorySlot> {
    self.file.seek(SeekFrom::Start(offset))?;
    self.file.write_all(snapshot_image)?;
    let manifest_off = align_up((offset as usize) + snapshot_image.len(), 8) as u64;
    self.file.seek(SeekFrom::Start(manifest_off))?;
    self.file.write_all(manifest_blob)?;
    self.file.sync_all()?;

    Ok(DirectorySlot {
      epoch: self.slot.epoch + 1,
      manifest_off,
      manifest_len: manifest_blob.len() as u64,
      snapshot_off: offset,
      snapshot_len: snapshot_image.len() as u64,
      wal_off: self.slot.wal_off,
      wal_len: self.slot.wal_len,
      wal_seq: self.slot.wal_seq + 1,
    })
  }

  /// Write `slot` into the inactive directory slot, fsync, then flip the
  /// active byte and fsync again. The flip is the commit point.
  fn flip_to(&mut self, slot: DirectorySlot) -> Result<()> {
    let target = if self.active_slot == 0 {
      SLOT_B_OFFSET
    } else {
      SLOT_A_OFFSET
    };
    self.file.seek(SeekFrom::Start(target as u64))?;
    self.file.write_all(&slot.encode())?;
    self.file.sync_all()?;

    let new_active = 1 - self.active_slot;
    self.file.seek(SeekFrom::Start(ACTIVE_SLOT_OFFSET as u64))?;
    self.file.write_all(&[new_active])?;
    self.file.sync_all()?;

    self.active_slot = new_active;
    self.slot = slot;
    Ok(())
  }

  pub fn sync(&mut self) -> Result<()> {
    self.file.sync_all()?;
    Ok(())
  }
}

fn write_wal_region_header(file: &mut File, wal_off: u64, seq: u64) -> Result<()> {
  let mut header = [0u8; WAL_REGION_HEADER];
  write_u32(&mut header, 0, MAGIC_WAL_REGION);
  write_u64(&mut header, 4, seq);
  let crc = crc32c(&header[..12]);
  write_u32(&mut header, 12, crc);
  file.seek(SeekFrom::Start(wal_off))?;
  file.write_all(&header)?;
  Ok(())
}

fn wal_region_seq(region: &[u8]) -> Option<u64> {
  if region.len() < WAL_REGION_HEADER {
    return None;
  }
  if read_u32(region, 0) != MAGIC_WAL_REGION {
    return None;
  }
  if crc32c(&region[..12]) != read_u32(region, 12) {
    return None;
  }
  Some(read_u64(region, 4))
}

/// Whether a path names a single-file database.
pub fn is_container_path(path: &Path) -> bool {
  path.extension().is_some_and(|ext| ext == EXT_RAYDB)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::manifest::ManifestOptions;
  use crate::core::snapshot::writer::{build_snapshot, SnapshotInput};
  use crate::core::wal::reader::extract_committed;
  use crate::core::wal::record::{build_create_node_payload, WalRecordType};
  use std::collections::HashMap;
  use tempfile::tempdir;

  fn commit_batch(tx: u64) -> Vec<WalRecord> {
    vec![
      WalRecord::new(WalRecordType::Begin, tx, Vec::new()),
      WalRecord::new(
        WalRecordType::CreateNode,
        tx,
        build_create_node_payload(tx, None),
      ),
      WalRecord::new(WalRecordType::Commit, tx, Vec::new()),
    ]
  }

  fn empty_image(generation: u64) -> Vec<u8> {
    build_snapshot(SnapshotInput {
      generation,
      nodes: vec![],
      edges: vec![],
      labels: HashMap::new(),
      etypes: HashMap::new(),
      propkeys: HashMap::new(),
      vector_stores: Vec::new(),
    })
    .unwrap()
  }

  #[test]
  fn create_reopen_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.raydb");
    let container =
      Container::create(&path, 64 * 1024, Manifest::empty(ManifestOptions::default())).unwrap();
    drop(container);

    let (container, scan) = Container::open(&path).unwrap();
    assert!(scan.records.is_empty());
    assert_eq!(container.snapshot_generation(), 0);
    assert!(container.map_snapshot().unwrap().is_none());
  }

  #[test]
  fn wal_records_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.raydb");
    let mut container =
      Container::create(&path, 64 * 1024, Manifest::empty(ManifestOptions::default())).unwrap();
    container.wal_append_commit(&commit_batch(1)).unwrap();
    container.wal_append_commit(&commit_batch(2)).unwrap();
    drop(container);

    let (_container, scan) = Container::open(&path).unwrap();
    let committed = extract_committed(&scan.records);
    assert_eq!(committed.len(), 2);
  }

  #[test]
  fn checkpoint_resets_wal_and_publishes_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.raydb");
    let mut container =
      Container::create(&path, 64 * 1024, Manifest::empty(ManifestOptions::default())).unwrap();
    container.wal_append_commit(&commit_batch(1)).unwrap();

    let mut manifest = container.manifest().clone();
    manifest.snapshot_gen = 1;
    container
      .publish_checkpoint(&empty_image(1), manifest)
      .unwrap();
    assert_eq!(container.wal_bytes(), 0);

    // Records from before the checkpoint are gone; the snapshot is live.
    let (container, scan) = Container::open(&path).unwrap();
    assert!(extract_committed(&scan.records).is_empty());
    assert_eq!(container.snapshot_generation(), 1);
    let (mmap, offset) = container.map_snapshot().unwrap().unwrap();
    let snap = crate::core::snapshot::reader::SnapshotData::parse(
      mmap,
      offset,
      &Default::default(),
    )
    .unwrap();
    assert_eq!(snap.header.generation, 1);
  }

  #[test]
  fn wal_after_checkpoint_replays() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.raydb");
    let mut container =
      Container::create(&path, 64 * 1024, Manifest::empty(ManifestOptions::default())).unwrap();

    let mut manifest = container.manifest().clone();
    manifest.snapshot_gen = 1;
    container
      .publish_checkpoint(&empty_image(1), manifest)
      .unwrap();
    container.wal_append_commit(&commit_batch(7)).unwrap();
    drop(container);

    let (_container, scan) = Container::open(&path).unwrap();
    let committed = extract_committed(&scan.records);
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].0, 7);
  }

  #[test]
  fn region_overflow_is_wal_buffer_full() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.raydb");
    let mut container =
      Container::create(&path, 64 * 1024, Manifest::empty(ManifestOptions::default())).unwrap();

    let big = vec![WalRecord::new(
      WalRecordType::SetNodeProp,
      1,
      vec![0u8; 80 * 1024],
    )];
    let err = container.wal_append_commit(&big).unwrap_err();
    assert!(matches!(err, RayError::WalBufferFull));
  }
}
