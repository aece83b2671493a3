//! Zero-copy snapshot reader over a memory-mapped image.
//!
//! The reader exposes typed views over section slices; nothing is copied
//! until a caller materializes a value. All lookups are O(1) (bucket, slot)
//! or O(log n) (binary search over sorted rows and property records).

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::constants::*;
use crate::core::snapshot::sections::{
  parse_section_table, verify_section_crcs, SectionEntry, SectionId,
};
use crate::error::{RayError, Result};
use crate::types::*;
use crate::util::binary::*;
use crate::util::hash::xxhash64_string;
use crate::util::mmap::{map_file, Mmap};

// ============================================================================
// Backing storage
// ============================================================================

enum Backing {
  Mapped(Arc<Mmap>),
  Owned(Arc<[u8]>),
}

impl Backing {
  fn bytes(&self) -> &[u8] {
    match self {
      Backing::Mapped(mmap) => &mmap[..],
      Backing::Owned(bytes) => bytes,
    }
  }
}

// ============================================================================
// Snapshot reader
// ============================================================================

/// Options for parsing a snapshot image.
#[derive(Debug, Clone, Default)]
pub struct ParseSnapshotOptions {
  /// Skip per-section CRC validation (trusted in-memory images only).
  pub skip_crc_validation: bool,
}

/// Parsed snapshot with cached section entries.
pub struct SnapshotData {
  backing: Backing,
  /// Byte offset of the snapshot image inside the backing storage.
  base: usize,
  pub header: SnapshotHeader,
  sections: Vec<SectionEntry>,
  /// Total image length including header, table and aligned sections.
  image_len: usize,
}

impl SnapshotData {
  /// Load and mmap a standalone snapshot file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let file = File::open(path.as_ref())?;
    let mmap = map_file(&file)?;
    Self::parse(Arc::new(mmap), 0, &ParseSnapshotOptions::default())
  }

  /// Parse a snapshot image at `base` inside a mapped file.
  pub fn parse(mmap: Arc<Mmap>, base: usize, options: &ParseSnapshotOptions) -> Result<Self> {
    let header = Self::parse_header(&mmap[base..])?;
    Self::finish_parse(Backing::Mapped(mmap), base, header, options)
  }

  /// Parse a snapshot image held in memory (used by tests and the compactor).
  pub fn parse_bytes(bytes: Arc<[u8]>, options: &ParseSnapshotOptions) -> Result<Self> {
    let header = Self::parse_header(&bytes)?;
    Self::finish_parse(Backing::Owned(bytes), 0, header, options)
  }

  fn parse_header(image: &[u8]) -> Result<SnapshotHeader> {
    if image.len() < SNAPSHOT_HEADER_SIZE {
      return Err(RayError::CorruptSnapshot(format!(
        "snapshot too small: {} bytes",
        image.len()
      )));
    }

    let magic = read_u32(image, 0);
    if magic != MAGIC_SNAPSHOT {
      return Err(RayError::InvalidMagic {
        expected: MAGIC_SNAPSHOT,
        got: magic,
      });
    }

    let version = read_u32(image, 4);
    if version > VERSION_SNAPSHOT {
      return Err(RayError::VersionMismatch {
        supported: VERSION_SNAPSHOT,
        found: version,
      });
    }

    Ok(SnapshotHeader {
      magic,
      version,
      flags: SnapshotFlags::from_bits_truncate(read_u32(image, 8)),
      generation: read_u64(image, 12),
      created_unix_ns: read_u64(image, 20),
      num_nodes: read_u64(image, 28),
      num_edges: read_u64(image, 36),
      max_node_id: read_u64(image, 44),
      num_strings: read_u64(image, 52),
      max_label_id: read_u32(image, 60),
      max_etype_id: read_u32(image, 64),
      max_propkey_id: read_u32(image, 68),
      section_count: read_u32(image, 72),
    })
  }

  fn finish_parse(
    backing: Backing,
    base: usize,
    header: SnapshotHeader,
    options: &ParseSnapshotOptions,
  ) -> Result<Self> {
    let image = &backing.bytes()[base..];
    let section_count = header.section_count as usize;
    if section_count > SectionId::COUNT {
      return Err(RayError::CorruptSnapshot(format!(
        "section count {section_count} exceeds maximum {}",
        SectionId::COUNT
      )));
    }

    let parsed = parse_section_table(image, section_count)?;
    let image_len = align_up(parsed.max_section_end, SECTION_ALIGNMENT);
    if image_len > image.len() {
      return Err(RayError::CorruptSnapshot(format!(
        "snapshot truncated: expected {image_len} bytes, found {}",
        image.len()
      )));
    }

    if !options.skip_crc_validation {
      verify_section_crcs(image, &parsed.sections)?;
    }

    Ok(Self {
      backing,
      base,
      header,
      sections: parsed.sections,
      image_len,
    })
  }

  /// Length of the snapshot image in bytes.
  pub fn image_len(&self) -> usize {
    self.image_len
  }

  /// Borrow a section's bytes, or `None` if absent.
  pub fn section(&self, id: SectionId) -> Option<&[u8]> {
    let entry = &self.sections[id as usize];
    if entry.length == 0 {
      return None;
    }
    let start = self.base + entry.offset as usize;
    Some(&self.backing.bytes()[start..start + entry.length as usize])
  }

  // ==========================================================================
  // Node id mapping
  // ==========================================================================

  /// Stable node id for a physical slot.
  #[inline]
  pub fn node_id(&self, phys: PhysNode) -> Option<NodeId> {
    let section = self.section(SectionId::PhysToNodeId)?;
    let idx = phys as usize;
    if idx * 8 + 8 > section.len() {
      return None;
    }
    Some(read_u64_at(section, idx))
  }

  /// Physical slot for a stable node id, or `None` if the node is absent
  /// from this snapshot.
  #[inline]
  pub fn phys_node(&self, node_id: NodeId) -> Option<PhysNode> {
    let section = self.section(SectionId::NodeIdToPhys)?;
    let idx = usize::try_from(node_id).ok()?;
    if idx * 4 + 4 > section.len() {
      return None;
    }
    let phys = read_i32_at(section, idx);
    if phys < 0 {
      None
    } else {
      Some(phys as PhysNode)
    }
  }

  #[inline]
  pub fn has_node(&self, node_id: NodeId) -> bool {
    self.phys_node(node_id).is_some()
  }

  // ==========================================================================
  // String table
  // ==========================================================================

  /// Borrow a string by id. Id 0 is the reserved empty string.
  pub fn string(&self, string_id: StringId) -> Option<&str> {
    if string_id == 0 {
      return Some("");
    }

    let offsets = self.section(SectionId::StringOffsets)?;
    let bytes = self.section(SectionId::StringBytes)?;

    let idx = string_id as usize;
    if idx * 4 + 8 > offsets.len() {
      return None;
    }

    let start = read_u32_at(offsets, idx) as usize;
    let end = read_u32_at(offsets, idx + 1) as usize;
    if start > end || end > bytes.len() {
      return None;
    }

    std::str::from_utf8(&bytes[start..end]).ok()
  }

  fn name_from_table(&self, section: SectionId, id: u32) -> Option<&str> {
    let ids = self.section(section)?;
    let idx = id as usize;
    if idx * 4 + 4 > ids.len() {
      return None;
    }
    let string_id = read_u32_at(ids, idx);
    if string_id == 0 {
      return None;
    }
    self.string(string_id)
  }

  pub fn label_name(&self, id: LabelId) -> Option<&str> {
    self.name_from_table(SectionId::LabelNames, id)
  }

  pub fn etype_name(&self, id: ETypeId) -> Option<&str> {
    self.name_from_table(SectionId::EtypeNames, id)
  }

  pub fn propkey_name(&self, id: PropKeyId) -> Option<&str> {
    self.name_from_table(SectionId::PropkeyNames, id)
  }

  /// The key owned by a node, if any.
  pub fn node_key(&self, phys: PhysNode) -> Option<&str> {
    let string_id = {
      let section = self.section(SectionId::NodeKeyStrings)?;
      let idx = phys as usize;
      if idx * 4 + 4 > section.len() {
        return None;
      }
      read_u32_at(section, idx)
    };
    if string_id == 0 {
      return None;
    }
    self.string(string_id)
  }

  // ==========================================================================
  // Key index
  // ==========================================================================

  /// Probe the bucketed key index for `key`.
  pub fn lookup_by_key(&self, key: &str) -> Option<NodeId> {
    let entries = self.section(SectionId::KeyEntries)?;
    let num_entries = entries.len() / KEY_INDEX_ENTRY_SIZE;
    if num_entries == 0 {
      return None;
    }

    let hash = xxhash64_string(key);
    let (lo, hi) = match self.key_bucket_range(hash) {
      Some(range) => range,
      None => self.key_hash_range(entries, hash, num_entries),
    };

    for i in lo..hi.min(num_entries) {
      let offset = i * KEY_INDEX_ENTRY_SIZE;
      if read_u64(entries, offset) != hash {
        continue;
      }
      let string_id = read_u32(entries, offset + 8);
      let node_id = read_u64(entries, offset + 16);
      if self.string(string_id) == Some(key) {
        return Some(node_id);
      }
    }

    None
  }

  fn key_bucket_range(&self, hash: u64) -> Option<(usize, usize)> {
    if !self.header.flags.contains(SnapshotFlags::HAS_KEY_BUCKETS) {
      return None;
    }
    let buckets = self.section(SectionId::KeyBuckets)?;
    if buckets.len() < 8 {
      return None;
    }
    let num_buckets = buckets.len() / 4 - 1;
    let bucket = (hash % num_buckets as u64) as usize;
    Some((
      read_u32_at(buckets, bucket) as usize,
      read_u32_at(buckets, bucket + 1) as usize,
    ))
  }

  /// Binary search fallback: first entry with a matching hash.
  fn key_hash_range(&self, entries: &[u8], hash: u64, num_entries: usize) -> (usize, usize) {
    let mut lo = 0;
    let mut hi = num_entries;
    while lo < hi {
      let mid = (lo + hi) / 2;
      if read_u64(entries, mid * KEY_INDEX_ENTRY_SIZE) < hash {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }
    (lo, num_entries)
  }

  // ==========================================================================
  // Out-edge CSR
  // ==========================================================================

  fn csr_range(&self, offsets: SectionId, phys: PhysNode) -> Option<(usize, usize)> {
    let section = self.section(offsets)?;
    let idx = phys as usize;
    if idx * 4 + 8 > section.len() {
      return None;
    }
    Some((
      read_u32_at(section, idx) as usize,
      read_u32_at(section, idx + 1) as usize,
    ))
  }

  pub fn out_range(&self, phys: PhysNode) -> Option<(usize, usize)> {
    self.csr_range(SectionId::OutOffsets, phys)
  }

  pub fn out_degree(&self, phys: PhysNode) -> usize {
    self
      .out_range(phys)
      .map(|(start, end)| end - start)
      .unwrap_or(0)
  }

  /// `(etype, dst_phys)` of the out-edge at flat index `idx`.
  pub fn out_edge_at(&self, idx: usize) -> Option<(ETypeId, PhysNode)> {
    let etypes = self.section(SectionId::OutEtype)?;
    let dsts = self.section(SectionId::OutDst)?;
    if idx * 4 + 4 > etypes.len() || idx * 4 + 4 > dsts.len() {
      return None;
    }
    Some((read_u32_at(etypes, idx), read_u32_at(dsts, idx)))
  }

  /// Binary search a source row for `(etype, dst_phys)`.
  pub fn find_out_edge(
    &self,
    src_phys: PhysNode,
    etype: ETypeId,
    dst_phys: PhysNode,
  ) -> Option<usize> {
    let (start, end) = self.out_range(src_phys)?;
    let etypes = self.section(SectionId::OutEtype)?;
    let dsts = self.section(SectionId::OutDst)?;

    let mut lo = start;
    let mut hi = end;
    while lo < hi {
      let mid = (lo + hi) / 2;
      let mid_key = (read_u32_at(etypes, mid), read_u32_at(dsts, mid));
      if mid_key < (etype, dst_phys) {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }

    if lo < end && (read_u32_at(etypes, lo), read_u32_at(dsts, lo)) == (etype, dst_phys) {
      Some(lo)
    } else {
      None
    }
  }

  pub fn has_edge(&self, src_phys: PhysNode, etype: ETypeId, dst_phys: PhysNode) -> bool {
    self.find_out_edge(src_phys, etype, dst_phys).is_some()
  }

  /// The contiguous sub-range of a source row holding edges of `etype`.
  pub fn out_etype_range(&self, phys: PhysNode, etype: ETypeId) -> (usize, usize) {
    let Some((start, end)) = self.out_range(phys) else {
      return (0, 0);
    };
    let Some(etypes) = self.section(SectionId::OutEtype) else {
      return (0, 0);
    };
    (
      lower_bound_u32(etypes, start, end, etype),
      lower_bound_u32(etypes, start, end, etype + 1),
    )
  }

  /// Iterate `(etype, dst_phys)` over a source row, sorted by `(etype, dst)`.
  pub fn iter_out_edges(&self, phys: PhysNode) -> impl Iterator<Item = (ETypeId, PhysNode)> + '_ {
    let (start, end) = self.out_range(phys).unwrap_or((0, 0));
    (start..end).filter_map(move |i| self.out_edge_at(i))
  }

  // ==========================================================================
  // In-edge CSR
  // ==========================================================================

  pub fn in_range(&self, phys: PhysNode) -> Option<(usize, usize)> {
    if !self.header.flags.contains(SnapshotFlags::HAS_IN_EDGES) {
      return None;
    }
    self.csr_range(SectionId::InOffsets, phys)
  }

  pub fn in_degree(&self, phys: PhysNode) -> usize {
    self
      .in_range(phys)
      .map(|(start, end)| end - start)
      .unwrap_or(0)
  }

  /// `(etype, src_phys, out_index)` of the in-edge at flat index `idx`.
  pub fn in_edge_at(&self, idx: usize) -> Option<(ETypeId, PhysNode, u32)> {
    let etypes = self.section(SectionId::InEtype)?;
    let srcs = self.section(SectionId::InSrc)?;
    let out_index = self.section(SectionId::InOutIndex)?;
    if idx * 4 + 4 > etypes.len() || idx * 4 + 4 > srcs.len() || idx * 4 + 4 > out_index.len() {
      return None;
    }
    Some((
      read_u32_at(etypes, idx),
      read_u32_at(srcs, idx),
      read_u32_at(out_index, idx),
    ))
  }

  /// The contiguous sub-range of a destination row holding edges of `etype`.
  pub fn in_etype_range(&self, phys: PhysNode, etype: ETypeId) -> (usize, usize) {
    let Some((start, end)) = self.in_range(phys) else {
      return (0, 0);
    };
    let Some(etypes) = self.section(SectionId::InEtype) else {
      return (0, 0);
    };
    (
      lower_bound_u32(etypes, start, end, etype),
      lower_bound_u32(etypes, start, end, etype + 1),
    )
  }

  pub fn iter_in_edges(&self, phys: PhysNode) -> impl Iterator<Item = (ETypeId, PhysNode, u32)> + '_ {
    let (start, end) = self.in_range(phys).unwrap_or((0, 0));
    (start..end).filter_map(move |i| self.in_edge_at(i))
  }

  // ==========================================================================
  // Node labels
  // ==========================================================================

  pub fn node_labels(&self, phys: PhysNode) -> Vec<LabelId> {
    if !self.header.flags.contains(SnapshotFlags::HAS_NODE_LABELS) {
      return Vec::new();
    }
    let Some((start, end)) = self.csr_range(SectionId::NodeLabelOffsets, phys) else {
      return Vec::new();
    };
    let Some(ids) = self.section(SectionId::NodeLabelIds) else {
      return Vec::new();
    };
    (start..end)
      .filter(|i| i * 4 + 4 <= ids.len())
      .map(|i| read_u32_at(ids, i))
      .collect()
  }

  // ==========================================================================
  // Properties
  // ==========================================================================

  /// Look up one node property record by `(phys, propkey)`.
  pub fn node_prop(&self, phys: PhysNode, propkey: PropKeyId) -> Option<PropValue> {
    let records = self.section(SectionId::NodeProps)?;
    let count = records.len() / NODE_PROP_ENTRY_SIZE;
    let target = (phys, propkey);

    let mut lo = 0;
    let mut hi = count;
    while lo < hi {
      let mid = (lo + hi) / 2;
      let offset = mid * NODE_PROP_ENTRY_SIZE;
      let key = (read_u32(records, offset), read_u32(records, offset + 4));
      if key < target {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }

    if lo >= count {
      return None;
    }
    let offset = lo * NODE_PROP_ENTRY_SIZE;
    if (read_u32(records, offset), read_u32(records, offset + 4)) != target {
      return None;
    }
    self.decode_scalar(records[offset + 8], read_u64(records, offset + 16))
  }

  /// All properties of a node, in propkey order.
  pub fn node_props(&self, phys: PhysNode) -> HashMap<PropKeyId, PropValue> {
    let mut props = HashMap::new();
    let Some(records) = self.section(SectionId::NodeProps) else {
      return props;
    };
    let count = records.len() / NODE_PROP_ENTRY_SIZE;

    // Find the first record for this node, then scan its run.
    let mut lo = 0;
    let mut hi = count;
    while lo < hi {
      let mid = (lo + hi) / 2;
      if read_u32(records, mid * NODE_PROP_ENTRY_SIZE) < phys {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }
    for i in lo..count {
      let offset = i * NODE_PROP_ENTRY_SIZE;
      if read_u32(records, offset) != phys {
        break;
      }
      let propkey = read_u32(records, offset + 4);
      if let Some(value) = self.decode_scalar(records[offset + 8], read_u64(records, offset + 16)) {
        props.insert(propkey, value);
      }
    }
    props
  }

  /// Look up one edge property record by `(src_phys, etype, dst_phys, propkey)`.
  pub fn edge_prop(
    &self,
    src_phys: PhysNode,
    etype: ETypeId,
    dst_phys: PhysNode,
    propkey: PropKeyId,
  ) -> Option<PropValue> {
    let records = self.section(SectionId::EdgeProps)?;
    let count = records.len() / EDGE_PROP_ENTRY_SIZE;
    let target = (src_phys, etype, dst_phys, propkey);

    let mut lo = 0;
    let mut hi = count;
    while lo < hi {
      let mid = (lo + hi) / 2;
      if edge_prop_key(records, mid) < target {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }

    if lo >= count || edge_prop_key(records, lo) != target {
      return None;
    }
    let offset = lo * EDGE_PROP_ENTRY_SIZE;
    self.decode_scalar(records[offset + 16], read_u64(records, offset + 24))
  }

  /// All properties of an edge triple, in propkey order.
  pub fn edge_props(
    &self,
    src_phys: PhysNode,
    etype: ETypeId,
    dst_phys: PhysNode,
  ) -> HashMap<PropKeyId, PropValue> {
    let mut props = HashMap::new();
    let Some(records) = self.section(SectionId::EdgeProps) else {
      return props;
    };
    let count = records.len() / EDGE_PROP_ENTRY_SIZE;
    let triple = (src_phys, etype, dst_phys);

    let mut lo = 0;
    let mut hi = count;
    while lo < hi {
      let mid = (lo + hi) / 2;
      let key = edge_prop_key(records, mid);
      if (key.0, key.1, key.2) < triple {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }
    for i in lo..count {
      let key = edge_prop_key(records, i);
      if (key.0, key.1, key.2) != triple {
        break;
      }
      let offset = i * EDGE_PROP_ENTRY_SIZE;
      if let Some(value) = self.decode_scalar(records[offset + 16], read_u64(records, offset + 24))
      {
        props.insert(key.3, value);
      }
    }
    props
  }

  /// Decode an inline or string-referencing property payload. Vector values
  /// never appear in property sections; they live in the vector store.
  fn decode_scalar(&self, tag: u8, payload: u64) -> Option<PropValue> {
    match PropValueTag::from_u8(tag)? {
      PropValueTag::Null => Some(PropValue::Null),
      PropValueTag::Bool => Some(PropValue::Bool(payload != 0)),
      PropValueTag::I64 => Some(PropValue::I64(payload as i64)),
      PropValueTag::F64 => Some(PropValue::F64(f64::from_bits(payload))),
      PropValueTag::String => {
        let s = self.string(payload as StringId)?;
        Some(PropValue::String(s.to_string()))
      }
      PropValueTag::VectorF32 => None,
    }
  }

  // ==========================================================================
  // Vector store blobs
  // ==========================================================================

  /// Per-propkey vector store blobs embedded in this snapshot.
  pub fn vector_store_blobs(&self) -> Vec<(PropKeyId, &[u8])> {
    let mut out = Vec::new();
    let (Some(index), Some(blob)) = (
      self.section(SectionId::VectorStoreIndex),
      self.section(SectionId::VectorStoreBlob),
    ) else {
      return out;
    };
    if index.len() < 4 {
      return out;
    }

    let count = read_u32(index, 0) as usize;
    for i in 0..count {
      let base = 4 + i * 20;
      if base + 20 > index.len() {
        break;
      }
      let propkey = read_u32(index, base);
      let offset = read_u64(index, base + 4) as usize;
      let length = read_u64(index, base + 12) as usize;
      if offset + length <= blob.len() {
        out.push((propkey, &blob[offset..offset + length]));
      }
    }
    out
  }
}

fn edge_prop_key(records: &[u8], idx: usize) -> (u32, u32, u32, u32) {
  let offset = idx * EDGE_PROP_ENTRY_SIZE;
  (
    read_u32(records, offset),
    read_u32(records, offset + 4),
    read_u32(records, offset + 8),
    read_u32(records, offset + 12),
  )
}

/// First index in `[start, end)` whose u32 element is `>= target`.
fn lower_bound_u32(section: &[u8], start: usize, end: usize, target: u32) -> usize {
  let mut lo = start;
  let mut hi = end;
  while lo < hi {
    let mid = (lo + hi) / 2;
    if read_u32_at(section, mid) < target {
      lo = mid + 1;
    } else {
      hi = mid;
    }
  }
  lo
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::snapshot::writer::{build_snapshot, NodeInput, SnapshotInput};
  use std::collections::HashMap as StdHashMap;

  fn sample_snapshot() -> SnapshotData {
    let mut props = StdHashMap::new();
    props.insert(1, PropValue::String("Alice".to_string()));
    props.insert(2, PropValue::I64(30));

    let input = SnapshotInput {
      generation: 3,
      nodes: vec![
        NodeInput {
          node_id: 1,
          key: Some("user:alice".to_string()),
          labels: vec![1],
          props,
        },
        NodeInput {
          node_id: 2,
          key: Some("user:bob".to_string()),
          labels: vec![1],
          props: StdHashMap::new(),
        },
        NodeInput {
          node_id: 5,
          key: None,
          labels: vec![],
          props: StdHashMap::new(),
        },
      ],
      edges: vec![
        crate::core::snapshot::writer::EdgeInput {
          src: 1,
          etype: 1,
          dst: 2,
          props: StdHashMap::from([(3, PropValue::F64(0.5))]),
        },
        crate::core::snapshot::writer::EdgeInput {
          src: 1,
          etype: 2,
          dst: 5,
          props: StdHashMap::new(),
        },
        crate::core::snapshot::writer::EdgeInput {
          src: 2,
          etype: 1,
          dst: 1,
          props: StdHashMap::new(),
        },
      ],
      labels: StdHashMap::from([(1, "Person".to_string())]),
      etypes: StdHashMap::from([(1, "KNOWS".to_string()), (2, "CREATED".to_string())]),
      propkeys: StdHashMap::from([
        (1, "name".to_string()),
        (2, "age".to_string()),
        (3, "weight".to_string()),
      ]),
      vector_stores: Vec::new(),
    };

    let image = build_snapshot(input).unwrap();
    SnapshotData::parse_bytes(Arc::from(image.into_boxed_slice()), &Default::default()).unwrap()
  }

  #[test]
  fn header_counts() {
    let snap = sample_snapshot();
    assert_eq!(snap.header.generation, 3);
    assert_eq!(snap.header.num_nodes, 3);
    assert_eq!(snap.header.num_edges, 3);
    assert_eq!(snap.header.max_node_id, 5);
  }

  #[test]
  fn id_mapping_round_trip() {
    let snap = sample_snapshot();
    for node_id in [1u64, 2, 5] {
      let phys = snap.phys_node(node_id).unwrap();
      assert_eq!(snap.node_id(phys), Some(node_id));
    }
    assert_eq!(snap.phys_node(3), None);
    assert_eq!(snap.phys_node(99), None);
  }

  #[test]
  fn key_lookup() {
    let snap = sample_snapshot();
    assert_eq!(snap.lookup_by_key("user:alice"), Some(1));
    assert_eq!(snap.lookup_by_key("user:bob"), Some(2));
    assert_eq!(snap.lookup_by_key("user:carol"), None);

    let alice_phys = snap.phys_node(1).unwrap();
    assert_eq!(snap.node_key(alice_phys), Some("user:alice"));
  }

  #[test]
  fn edges_sorted_and_searchable() {
    let snap = sample_snapshot();
    let alice = snap.phys_node(1).unwrap();
    let bob = snap.phys_node(2).unwrap();
    let doc = snap.phys_node(5).unwrap();

    let edges: Vec<_> = snap.iter_out_edges(alice).collect();
    assert_eq!(edges, vec![(1, bob), (2, doc)]);

    assert!(snap.has_edge(alice, 1, bob));
    assert!(!snap.has_edge(alice, 1, doc));
    assert!(snap.has_edge(bob, 1, alice));

    let (lo, hi) = snap.out_etype_range(alice, 2);
    assert_eq!(hi - lo, 1);
    assert_eq!(snap.out_edge_at(lo), Some((2, doc)));
  }

  #[test]
  fn in_edges_reciprocal() {
    let snap = sample_snapshot();
    let alice = snap.phys_node(1).unwrap();
    let bob = snap.phys_node(2).unwrap();

    let in_edges: Vec<_> = snap.iter_in_edges(bob).collect();
    assert_eq!(in_edges.len(), 1);
    let (etype, src, out_idx) = in_edges[0];
    assert_eq!((etype, src), (1, alice));
    assert_eq!(snap.out_edge_at(out_idx as usize), Some((1, bob)));
  }

  #[test]
  fn props_and_names() {
    let snap = sample_snapshot();
    let alice = snap.phys_node(1).unwrap();
    let bob = snap.phys_node(2).unwrap();

    assert_eq!(
      snap.node_prop(alice, 1),
      Some(PropValue::String("Alice".to_string()))
    );
    assert_eq!(snap.node_prop(alice, 2), Some(PropValue::I64(30)));
    assert_eq!(snap.node_prop(alice, 9), None);
    assert_eq!(snap.node_props(alice).len(), 2);

    assert_eq!(snap.edge_prop(alice, 1, bob, 3), Some(PropValue::F64(0.5)));
    assert_eq!(snap.edge_prop(alice, 1, bob, 4), None);

    assert_eq!(snap.label_name(1), Some("Person"));
    assert_eq!(snap.etype_name(2), Some("CREATED"));
    assert_eq!(snap.propkey_name(3), Some("weight"));
    assert_eq!(snap.etype_name(9), None);
  }

  #[test]
  fn corrupt_section_detected() {
    let mut props = StdHashMap::new();
    props.insert(1, PropValue::I64(7));
    let image = build_snapshot(SnapshotInput {
      generation: 1,
      nodes: vec![NodeInput {
        node_id: 1,
        key: Some("n".to_string()),
        labels: vec![],
        props,
      }],
      edges: vec![],
      labels: StdHashMap::new(),
      etypes: StdHashMap::new(),
      propkeys: StdHashMap::from([(1, "x".to_string())]),
      vector_stores: Vec::new(),
    })
    .unwrap();

    // Flip one byte inside the first section (sections start at the first
    // 64-byte boundary past the header and table).
    let mut corrupted = image.clone();
    let idx = align_up(
      SNAPSHOT_HEADER_SIZE + SectionId::COUNT * SECTION_ENTRY_SIZE,
      SECTION_ALIGNMENT,
    ) + 1;
    corrupted[idx] ^= 0xff;
    let parsed = SnapshotData::parse_bytes(Arc::from(corrupted.into_boxed_slice()), &Default::default());
    assert!(matches!(
      parsed,
      Err(RayError::CrcMismatch { .. }) | Err(RayError::CorruptSnapshot(_))
    ));

    // The pristine image still parses.
    assert!(SnapshotData::parse_bytes(Arc::from(image.into_boxed_slice()), &Default::default()).is_ok());
  }
}
