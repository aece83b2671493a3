//! Snapshot builder.
//!
//! Assembles a complete snapshot image in memory from a flat node/edge
//! listing: string interning, CSR with the reciprocal in-edge arrays, the
//! bucketed key index, sorted property records and embedded vector store
//! blobs. The compactor and the container checkpoint both go through here.

use std::collections::HashMap;

use crate::constants::*;
use crate::core::snapshot::sections::{write_section_table, SectionEntry, SectionId};
use crate::error::{RayError, Result};
use crate::types::*;
use crate::util::binary::*;
use crate::util::crc::crc32c;
use crate::util::hash::xxhash64_string;

// ============================================================================
// Build input
// ============================================================================

#[derive(Debug, Clone)]
pub struct NodeInput {
  pub node_id: NodeId,
  pub key: Option<String>,
  pub labels: Vec<LabelId>,
  pub props: HashMap<PropKeyId, PropValue>,
}

#[derive(Debug, Clone)]
pub struct EdgeInput {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
  pub props: HashMap<PropKeyId, PropValue>,
}

#[derive(Debug)]
pub struct SnapshotInput {
  pub generation: u64,
  pub nodes: Vec<NodeInput>,
  pub edges: Vec<EdgeInput>,
  pub labels: HashMap<LabelId, String>,
  pub etypes: HashMap<ETypeId, String>,
  pub propkeys: HashMap<PropKeyId, String>,
  /// Pre-serialized per-propkey vector store blobs.
  pub vector_stores: Vec<(PropKeyId, Vec<u8>)>,
}

// ============================================================================
// String interning
// ============================================================================

struct StringTable {
  strings: Vec<String>,
  ids: HashMap<String, StringId>,
}

impl StringTable {
  fn new() -> Self {
    // StringId 0 is the reserved empty string.
    Self {
      strings: vec![String::new()],
      ids: HashMap::from([(String::new(), 0)]),
    }
  }

  fn intern(&mut self, s: &str) -> StringId {
    if let Some(&id) = self.ids.get(s) {
      return id;
    }
    let id = self.strings.len() as StringId;
    self.strings.push(s.to_string());
    self.ids.insert(s.to_string(), id);
    id
  }

  fn lookup(&self, s: &str) -> StringId {
    self.ids.get(s).copied().unwrap_or(0)
  }

  fn len(&self) -> usize {
    self.strings.len()
  }
}

// ============================================================================
// CSR assembly
// ============================================================================

struct Csr {
  offsets: Vec<u32>,
  etype: Vec<u32>,
  /// dst_phys for out-edges, src_phys for in-edges.
  other: Vec<u32>,
  out_index: Vec<u32>,
}

fn build_out_csr(
  num_nodes: usize,
  edges: &[(PhysNode, ETypeId, PhysNode)],
) -> Csr {
  let mut rows: Vec<Vec<(ETypeId, PhysNode)>> = vec![Vec::new(); num_nodes];
  for &(src, etype, dst) in edges {
    rows[src as usize].push((etype, dst));
  }

  let mut offsets = Vec::with_capacity(num_nodes + 1);
  let mut etype_arr = Vec::with_capacity(edges.len());
  let mut dst_arr = Vec::with_capacity(edges.len());
  offsets.push(0u32);
  for row in &mut rows {
    row.sort_unstable();
    row.dedup();
    for &(etype, dst) in row.iter() {
      etype_arr.push(etype);
      dst_arr.push(dst);
    }
    offsets.push(etype_arr.len() as u32);
  }

  Csr {
    offsets,
    etype: etype_arr,
    other: dst_arr,
    out_index: Vec::new(),
  }
}

fn build_in_csr(num_nodes: usize, out: &Csr) -> Csr {
  let mut rows: Vec<Vec<(ETypeId, PhysNode, u32)>> = vec![Vec::new(); num_nodes];
  for src in 0..num_nodes {
    let start = out.offsets[src] as usize;
    let end = out.offsets[src + 1] as usize;
    for i in start..end {
      rows[out.other[i] as usize].push((out.etype[i], src as PhysNode, i as u32));
    }
  }

  let num_edges = out.other.len();
  let mut offsets = Vec::with_capacity(num_nodes + 1);
  let mut etype_arr = Vec::with_capacity(num_edges);
  let mut src_arr = Vec::with_capacity(num_edges);
  let mut out_index = Vec::with_capacity(num_edges);
  offsets.push(0u32);
  for row in &mut rows {
    // Sort by (etype, src); the out-index tags along.
    row.sort_unstable();
    for &(etype, src, idx) in row.iter() {
      etype_arr.push(etype);
      src_arr.push(src);
      out_index.push(idx);
    }
    offsets.push(etype_arr.len() as u32);
  }

  Csr {
    offsets,
    etype: etype_arr,
    other: src_arr,
    out_index,
  }
}

// ============================================================================
// Key index
// ============================================================================

struct KeyIndex {
  /// Sorted by (bucket, hash, string_id, node_id).
  entries: Vec<(u64, StringId, NodeId)>,
  buckets: Vec<u32>,
}

fn build_key_index(nodes: &[NodeInput], key_strings: &[StringId]) -> KeyIndex {
  let mut entries: Vec<(u64, StringId, NodeId)> = nodes
    .iter()
    .enumerate()
    .filter_map(|(i, node)| {
      node
        .key
        .as_ref()
        .map(|key| (xxhash64_string(key), key_strings[i], node.node_id))
    })
    .collect();

  let num_buckets = std::cmp::max(16, entries.len() * 2);
  let mut buckets = vec![0u32; num_buckets + 1];
  if entries.is_empty() {
    return KeyIndex { entries, buckets };
  }

  let nb = num_buckets as u64;
  entries.sort_unstable_by(|a, b| {
    ((a.0 % nb), a.0, a.1, a.2).cmp(&((b.0 % nb), b.0, b.1, b.2))
  });

  let mut counts = vec![0u32; num_buckets];
  for entry in &entries {
    counts[(entry.0 % nb) as usize] += 1;
  }
  for i in 0..num_buckets {
    buckets[i + 1] = buckets[i] + counts[i];
  }

  KeyIndex { entries, buckets }
}

// ============================================================================
// Property records
// ============================================================================

fn encode_scalar(value: &PropValue, strings: &StringTable) -> Result<(u8, u64)> {
  match value {
    PropValue::Null => Ok((PropValueTag::Null as u8, 0)),
    PropValue::Bool(b) => Ok((PropValueTag::Bool as u8, u64::from(*b))),
    PropValue::I64(v) => Ok((PropValueTag::I64 as u8, *v as u64)),
    PropValue::F64(v) => Ok((PropValueTag::F64 as u8, v.to_bits())),
    PropValue::String(s) => Ok((PropValueTag::String as u8, strings.lookup(s) as u64)),
    PropValue::VectorF32(_) => Err(RayError::Internal(
      "vector values belong to the vector store, not property sections".to_string(),
    )),
  }
}

// ============================================================================
// Snapshot assembly
// ============================================================================

/// Build a complete snapshot image in memory.
pub fn build_snapshot(input: SnapshotInput) -> Result<Vec<u8>> {
  let SnapshotInput {
    generation,
    mut nodes,
    edges,
    labels,
    etypes,
    propkeys,
    vector_stores,
  } = input;

  // Physical slots are assigned in ascending node-id order, which keeps
  // (etype, dst_phys) sort order equal to (etype, dst_id) order.
  nodes.sort_by_key(|n| n.node_id);

  let num_nodes = nodes.len();
  let mut node_to_phys: HashMap<NodeId, PhysNode> = HashMap::with_capacity(num_nodes);
  let mut max_node_id: NodeId = 0;
  for (i, node) in nodes.iter().enumerate() {
    if node_to_phys.insert(node.node_id, i as PhysNode).is_some() {
      return Err(RayError::Internal(format!(
        "duplicate node id {} in snapshot input",
        node.node_id
      )));
    }
    max_node_id = max_node_id.max(node.node_id);
  }

  let mut phys_edges = Vec::with_capacity(edges.len());
  for edge in &edges {
    let (Some(&src), Some(&dst)) = (node_to_phys.get(&edge.src), node_to_phys.get(&edge.dst))
    else {
      return Err(RayError::CorruptSnapshot(format!(
        "edge references missing node(s): src={}, dst={}",
        edge.src, edge.dst
      )));
    };
    phys_edges.push((src, edge.etype, dst));
  }

  // ---- string table ----
  // Name tables are sized by the highest id present, not the entry count:
  // the id space may have holes from aborted definitions, and a name whose
  // id exceeds the table length would silently vanish from the snapshot.
  let max_label_id = labels.keys().max().copied().unwrap_or(0);
  let max_etype_id = etypes.keys().max().copied().unwrap_or(0);
  let max_propkey_id = propkeys.keys().max().copied().unwrap_or(0);

  let mut strings = StringTable::new();
  let label_names =
    intern_name_table(max_label_id as usize, |i| labels.get(&(i as u32)), &mut strings);
  let etype_names =
    intern_name_table(max_etype_id as usize, |i| etypes.get(&(i as u32)), &mut strings);
  let propkey_names =
    intern_name_table(max_propkey_id as usize, |i| propkeys.get(&(i as u32)), &mut strings);

  let key_strings: Vec<StringId> = nodes
    .iter()
    .map(|n| n.key.as_deref().map(|k| strings.intern(k)).unwrap_or(0))
    .collect();

  for node in &nodes {
    intern_string_values(&node.props, &mut strings);
  }
  for edge in &edges {
    intern_string_values(&edge.props, &mut strings);
  }

  // ---- CSR ----
  let out_csr = build_out_csr(num_nodes, &phys_edges);
  let num_edges = out_csr.other.len();
  let in_csr = build_in_csr(num_nodes, &out_csr);

  // ---- key index ----
  let key_index = build_key_index(&nodes, &key_strings);

  // ---- node labels ----
  let mut label_offsets = Vec::with_capacity(num_nodes + 1);
  let mut label_ids = Vec::new();
  label_offsets.push(0u32);
  for node in &nodes {
    let mut ls = node.labels.clone();
    ls.sort_unstable();
    ls.dedup();
    label_ids.extend(ls);
    label_offsets.push(label_ids.len() as u32);
  }

  // ---- property records ----
  let mut node_prop_records = Vec::new();
  for (phys, node) in nodes.iter().enumerate() {
    let mut sorted: Vec<_> = node
      .props
      .iter()
      .filter(|(_, v)| !matches!(v, PropValue::VectorF32(_)))
      .collect();
    sorted.sort_by_key(|(k, _)| **k);
    for (&propkey, value) in sorted {
      let (tag, payload) = encode_scalar(value, &strings)?;
      node_prop_records.push((phys as u32, propkey, tag, payload));
    }
  }

  let mut edge_prop_records = Vec::new();
  for edge in &edges {
    if edge.props.is_empty() {
      continue;
    }
    let src = node_to_phys[&edge.src];
    let dst = node_to_phys[&edge.dst];
    let mut sorted: Vec<_> = edge
      .props
      .iter()
      .filter(|(_, v)| !matches!(v, PropValue::VectorF32(_)))
      .collect();
    sorted.sort_by_key(|(k, _)| **k);
    for (&propkey, value) in sorted {
      let (tag, payload) = encode_scalar(value, &strings)?;
      edge_prop_records.push((src, edge.etype, dst, propkey, tag, payload));
    }
  }
  edge_prop_records.sort_by_key(|r| (r.0, r.1, r.2, r.3));

  let has_properties = !node_prop_records.is_empty() || !edge_prop_records.is_empty();

  // ---- encode sections ----
  let mut section_data: Vec<(SectionId, Vec<u8>)> = Vec::new();
  let mut push = |id: SectionId, data: Vec<u8>| section_data.push((id, data));

  push(SectionId::StringOffsets, encode_string_offsets(&strings));
  push(SectionId::StringBytes, encode_string_bytes(&strings));
  push(
    SectionId::PhysToNodeId,
    encode_u64_slice(&nodes.iter().map(|n| n.node_id).collect::<Vec<_>>()),
  );
  push(
    SectionId::NodeIdToPhys,
    encode_nodeid_to_phys(&node_to_phys, max_node_id),
  );
  push(SectionId::OutOffsets, encode_u32_slice(&out_csr.offsets));
  push(SectionId::OutEtype, encode_u32_slice(&out_csr.etype));
  push(SectionId::OutDst, encode_u32_slice(&out_csr.other));
  push(SectionId::InOffsets, encode_u32_slice(&in_csr.offsets));
  push(SectionId::InEtype, encode_u32_slice(&in_csr.etype));
  push(SectionId::InSrc, encode_u32_slice(&in_csr.other));
  push(SectionId::InOutIndex, encode_u32_slice(&in_csr.out_index));
  push(SectionId::KeyEntries, encode_key_entries(&key_index));
  push(SectionId::KeyBuckets, encode_u32_slice(&key_index.buckets));
  push(SectionId::NodeKeyStrings, encode_u32_slice(&key_strings));
  push(SectionId::LabelNames, encode_u32_slice(&label_names));
  push(SectionId::EtypeNames, encode_u32_slice(&etype_names));
  push(SectionId::PropkeyNames, encode_u32_slice(&propkey_names));
  push(SectionId::NodeLabelOffsets, encode_u32_slice(&label_offsets));
  push(SectionId::NodeLabelIds, encode_u32_slice(&label_ids));
  push(SectionId::NodeProps, encode_node_props(&node_prop_records));
  push(SectionId::EdgeProps, encode_edge_props(&edge_prop_records));

  let (vec_index, vec_blob) = encode_vector_stores(&vector_stores);
  let has_vector_stores = !vec_blob.is_empty();
  push(SectionId::VectorStoreIndex, vec_index);
  push(SectionId::VectorStoreBlob, vec_blob);

  // ---- layout ----
  let table_end = SNAPSHOT_HEADER_SIZE + SectionId::COUNT * SECTION_ENTRY_SIZE;
  let mut cursor = align_up(table_end, SECTION_ALIGNMENT);
  let mut entries: Vec<(SectionId, SectionEntry)> = Vec::with_capacity(section_data.len());
  for (id, data) in &section_data {
    let entry = if data.is_empty() {
      SectionEntry::default()
    } else {
      let entry = SectionEntry {
        offset: cursor as u64,
        length: data.len() as u64,
        crc: crc32c(data),
      };
      cursor = align_up(cursor + data.len(), SECTION_ALIGNMENT);
      entry
    };
    entries.push((*id, entry));
  }

  let total = cursor;
  let mut image = vec![0u8; total];

  // ---- header ----
  let mut flags = SnapshotFlags::HAS_IN_EDGES | SnapshotFlags::HAS_NODE_LABELS;
  if has_properties {
    flags |= SnapshotFlags::HAS_PROPERTIES;
  }
  if !key_index.entries.is_empty() {
    flags |= SnapshotFlags::HAS_KEY_BUCKETS;
  }
  if has_vector_stores {
    flags |= SnapshotFlags::HAS_VECTOR_STORES;
  }

  let created_unix_ns = std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_nanos() as u64)
    .unwrap_or(0);

  write_u32(&mut image, 0, MAGIC_SNAPSHOT);
  write_u32(&mut image, 4, VERSION_SNAPSHOT);
  write_u32(&mut image, 8, flags.bits());
  write_u64(&mut image, 12, generation);
  write_u64(&mut image, 20, created_unix_ns);
  write_u64(&mut image, 28, num_nodes as u64);
  write_u64(&mut image, 36, num_edges as u64);
  write_u64(&mut image, 44, max_node_id);
  write_u64(&mut image, 52, strings.len() as u64);
  write_u32(&mut image, 60, max_label_id);
  write_u32(&mut image, 64, max_etype_id);
  write_u32(&mut image, 68, max_propkey_id);
  write_u32(&mut image, 72, SectionId::COUNT as u32);

  write_section_table(&mut image, &entries);

  for ((_, data), (_, entry)) in section_data.iter().zip(&entries) {
    if entry.length > 0 {
      let start = entry.offset as usize;
      image[start..start + data.len()].copy_from_slice(data);
    }
  }

  Ok(image)
}

fn intern_name_table<'a, F>(count: usize, lookup: F, strings: &mut StringTable) -> Vec<StringId>
where
  F: Fn(usize) -> Option<&'a String>,
{
  let mut ids = vec![0u32];
  for i in 1..=count {
    ids.push(match lookup(i) {
      Some(name) => strings.intern(name),
      None => 0,
    });
  }
  ids
}

fn intern_string_values(props: &HashMap<PropKeyId, PropValue>, strings: &mut StringTable) {
  let mut sorted: Vec<_> = props.iter().collect();
  sorted.sort_by_key(|(k, _)| **k);
  for (_, value) in sorted {
    if let PropValue::String(s) = value {
      strings.intern(s);
    }
  }
}

fn encode_string_offsets(strings: &StringTable) -> Vec<u8> {
  let mut offsets = Vec::with_capacity(strings.len() + 1);
  let mut cursor = 0u32;
  offsets.push(0);
  for s in &strings.strings {
    cursor += s.len() as u32;
    offsets.push(cursor);
  }
  encode_u32_slice(&offsets)
}

fn encode_string_bytes(strings: &StringTable) -> Vec<u8> {
  let mut bytes = Vec::new();
  for s in &strings.strings {
    bytes.extend_from_slice(s.as_bytes());
  }
  bytes
}

fn encode_nodeid_to_phys(map: &HashMap<NodeId, PhysNode>, max_node_id: NodeId) -> Vec<u8> {
  let size = max_node_id as usize + 1;
  let mut data = vec![0u8; size * 4];
  for i in 0..size {
    write_i32(&mut data, i * 4, -1);
  }
  for (&node_id, &phys) in map {
    write_i32(&mut data, node_id as usize * 4, phys as i32);
  }
  data
}

fn encode_key_entries(index: &KeyIndex) -> Vec<u8> {
  let mut data = vec![0u8; index.entries.len() * KEY_INDEX_ENTRY_SIZE];
  for (i, &(hash, string_id, node_id)) in index.entries.iter().enumerate() {
    let offset = i * KEY_INDEX_ENTRY_SIZE;
    write_u64(&mut data, offset, hash);
    write_u32(&mut data, offset + 8, string_id);
    write_u64(&mut data, offset + 16, node_id);
  }
  data
}

fn encode_node_props(records: &[(u32, u32, u8, u64)]) -> Vec<u8> {
  let mut data = vec![0u8; records.len() * NODE_PROP_ENTRY_SIZE];
  for (i, &(phys, propkey, tag, payload)) in records.iter().enumerate() {
    let offset = i * NODE_PROP_ENTRY_SIZE;
    write_u32(&mut data, offset, phys);
    write_u32(&mut data, offset + 4, propkey);
    data[offset + 8] = tag;
    write_u64(&mut data, offset + 16, payload);
  }
  data
}

fn encode_edge_props(records: &[(u32, u32, u32, u32, u8, u64)]) -> Vec<u8> {
  let mut data = vec![0u8; records.len() * EDGE_PROP_ENTRY_SIZE];
  for (i, &(src, etype, dst, propkey, tag, payload)) in records.iter().enumerate() {
    let offset = i * EDGE_PROP_ENTRY_SIZE;
    write_u32(&mut data, offset, src);
    write_u32(&mut data, offset + 4, etype);
    write_u32(&mut data, offset + 8, dst);
    write_u32(&mut data, offset + 12, propkey);
    data[offset + 16] = tag;
    write_u64(&mut data, offset + 24, payload);
  }
  data
}

fn encode_vector_stores(stores: &[(PropKeyId, Vec<u8>)]) -> (Vec<u8>, Vec<u8>) {
  if stores.is_empty() {
    return (Vec::new(), Vec::new());
  }

  let mut ordered: Vec<_> = stores.iter().collect();
  ordered.sort_by_key(|(propkey, _)| *propkey);

  let mut index = vec![0u8; 4 + ordered.len() * 20];
  write_u32(&mut index, 0, ordered.len() as u32);
  let mut blob = Vec::new();
  for (i, (propkey, encoded)) in ordered.iter().enumerate() {
    let base = 4 + i * 20;
    write_u32(&mut index, base, *propkey);
    write_u64(&mut index, base + 4, blob.len() as u64);
    write_u64(&mut index, base + 12, encoded.len() as u64);
    blob.extend_from_slice(encoded);
  }
  (index, blob)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::snapshot::reader::SnapshotData;
  use std::sync::Arc;

  fn parse(image: Vec<u8>) -> SnapshotData {
    SnapshotData::parse_bytes(Arc::from(image.into_boxed_slice()), &Default::default()).unwrap()
  }

  #[test]
  fn empty_snapshot() {
    let image = build_snapshot(SnapshotInput {
      generation: 1,
      nodes: vec![],
      edges: vec![],
      labels: HashMap::new(),
      etypes: HashMap::new(),
      propkeys: HashMap::new(),
      vector_stores: Vec::new(),
    })
    .unwrap();

    let snap = parse(image);
    assert_eq!(snap.header.num_nodes, 0);
    assert_eq!(snap.header.num_edges, 0);
    assert_eq!(snap.lookup_by_key("anything"), None);
  }

  #[test]
  fn duplicate_edges_collapse() {
    let image = build_snapshot(SnapshotInput {
      generation: 1,
      nodes: vec![
        NodeInput {
          node_id: 1,
          key: None,
          labels: vec![],
          props: HashMap::new(),
        },
        NodeInput {
          node_id: 2,
          key: None,
          labels: vec![],
          props: HashMap::new(),
        },
      ],
      edges: vec![
        EdgeInput {
          src: 1,
          etype: 1,
          dst: 2,
          props: HashMap::new(),
        },
        EdgeInput {
          src: 1,
          etype: 1,
          dst: 2,
          props: HashMap::new(),
        },
      ],
      labels: HashMap::new(),
      etypes: HashMap::from([(1, "REL".to_string())]),
      propkeys: HashMap::new(),
      vector_stores: Vec::new(),
    })
    .unwrap();

    let snap = parse(image);
    assert_eq!(snap.header.num_edges, 1);
  }

  #[test]
  fn edge_to_missing_node_is_an_error() {
    let result = build_snapshot(SnapshotInput {
      generation: 1,
      nodes: vec![],
      edges: vec![EdgeInput {
        src: 1,
        etype: 1,
        dst: 2,
        props: HashMap::new(),
      }],
      labels: HashMap::new(),
      etypes: HashMap::new(),
      propkeys: HashMap::new(),
      vector_stores: Vec::new(),
    });
    assert!(result.is_err());
  }

  #[test]
  fn string_table_interning() {
    let mut table = StringTable::new();
    assert_eq!(table.len(), 1);
    assert_eq!(table.intern("hello"), 1);
    assert_eq!(table.intern("world"), 2);
    assert_eq!(table.intern("hello"), 1);
    assert_eq!(table.lookup("world"), 2);
    assert_eq!(table.lookup("missing"), 0);
  }

  #[test]
  fn sparse_name_tables_keep_high_ids() {
    // Id 1 was wasted by an aborted definition; only id 2 carries a name.
    let image = build_snapshot(SnapshotInput {
      generation: 1,
      nodes: vec![NodeInput {
        node_id: 1,
        key: None,
        labels: vec![2],
        props: HashMap::new(),
      }],
      edges: vec![],
      labels: HashMap::from([(2, "Person".to_string())]),
      etypes: HashMap::from([(3, "KNOWS".to_string())]),
      propkeys: HashMap::from([(5, "name".to_string())]),
      vector_stores: Vec::new(),
    })
    .unwrap();

    let snap = parse(image);
    assert_eq!(snap.header.max_label_id, 2);
    assert_eq!(snap.header.max_etype_id, 3);
    assert_eq!(snap.header.max_propkey_id, 5);
    assert_eq!(snap.label_name(1), None);
    assert_eq!(snap.label_name(2), Some("Person"));
    assert_eq!(snap.etype_name(3), Some("KNOWS"));
    assert_eq!(snap.propkey_name(5), Some("name"));
    assert_eq!(snap.propkey_name(4), None);
  }

  #[test]
  fn vector_store_blobs_round_trip() {
    let image = build_snapshot(SnapshotInput {
      generation: 1,
      nodes: vec![NodeInput {
        node_id: 1,
        key: None,
        labels: vec![],
        props: HashMap::new(),
      }],
      edges: vec![],
      labels: HashMap::new(),
      etypes: HashMap::new(),
      propkeys: HashMap::from([(7, "embedding".to_string())]),
      vector_stores: vec![(7, vec![1, 2, 3, 4])],
    })
    .unwrap();

    let snap = parse(image);
    assert!(snap.header.flags.contains(SnapshotFlags::HAS_VECTOR_STORES));
    let blobs = snap.vector_store_blobs();
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].0, 7);
    assert_eq!(blobs[0].1, &[1, 2, 3, 4]);
  }
}
