//! Snapshot integrity checking.
//!
//! `quick_check` validates the cheap structural facts a startup path might
//! care about; `check_snapshot` is the operator tool that verifies every
//! format invariant: CSR offset monotonicity, edge sort order and
//! reciprocity, the physical/stable id bijection, key-index ordering and
//! string-table bounds. Section CRCs were already verified when the
//! snapshot was parsed.

use crate::constants::KEY_INDEX_ENTRY_SIZE;
use crate::core::snapshot::reader::SnapshotData;
use crate::core::snapshot::sections::SectionId;
use crate::types::CheckResult;
use crate::util::binary::{read_i32_at, read_u32, read_u32_at, read_u64, read_u64_at};

struct Checker<'a> {
  snapshot: &'a SnapshotData,
  num_nodes: usize,
  num_edges: usize,
  errors: Vec<String>,
  warnings: Vec<String>,
}

/// Verify every snapshot invariant. Intended as an operator tool, not a
/// startup path.
pub fn check_snapshot(snapshot: &SnapshotData) -> CheckResult {
  let (Ok(num_nodes), Ok(num_edges)) = (
    usize::try_from(snapshot.header.num_nodes),
    usize::try_from(snapshot.header.num_edges),
  ) else {
    return CheckResult {
      valid: false,
      errors: vec!["node/edge counts overflow".to_string()],
      warnings: Vec::new(),
    };
  };

  let mut checker = Checker {
    snapshot,
    num_nodes,
    num_edges,
    errors: Vec::new(),
    warnings: Vec::new(),
  };

  checker.check_offsets("out_offsets", SectionId::OutOffsets);
  checker.check_offsets("in_offsets", SectionId::InOffsets);
  checker.check_edge_targets("out_dst", SectionId::OutDst);
  checker.check_edge_targets("in_src", SectionId::InSrc);
  checker.check_mapping_bijection();
  checker.check_out_edge_order();
  checker.check_reciprocity();
  checker.check_key_index();
  checker.check_string_bounds();

  CheckResult {
    valid: checker.errors.is_empty(),
    errors: checker.errors,
    warnings: checker.warnings,
  }
}

/// Cheap structural validation: offsets arrays are present, monotone-final
/// and consistent with the edge count.
pub fn quick_check(snapshot: &SnapshotData) -> bool {
  let Ok(num_nodes) = usize::try_from(snapshot.header.num_nodes) else {
    return false;
  };
  let Ok(num_edges) = usize::try_from(snapshot.header.num_edges) else {
    return false;
  };
  if num_nodes == 0 {
    return num_edges == 0;
  }

  for section in [SectionId::OutOffsets, SectionId::InOffsets] {
    let Some(offsets) = snapshot.section(section) else {
      return false;
    };
    if offsets.len() < (num_nodes + 1) * 4 {
      return false;
    }
    if read_u32_at(offsets, num_nodes) as usize != num_edges {
      return false;
    }
  }
  true
}

impl Checker<'_> {
  fn error(&mut self, message: String) {
    self.errors.push(message);
  }

  fn check_offsets(&mut self, name: &str, section: SectionId) {
    if self.num_nodes == 0 {
      return;
    }
    let Some(offsets) = self.snapshot.section(section) else {
      self.error(format!("{name} section missing"));
      return;
    };
    if offsets.len() < (self.num_nodes + 1) * 4 {
      self.error(format!("{name} section too small"));
      return;
    }

    let mut prev = 0u32;
    for i in 0..=self.num_nodes {
      let value = read_u32_at(offsets, i);
      if value < prev {
        self.error(format!("{name} not monotonic at {i}: {prev} -> {value}"));
        return;
      }
      prev = value;
    }
    if prev as usize != self.num_edges {
      self.error(format!(
        "{name} final value {prev} != numEdges {}",
        self.num_edges
      ));
    }
  }

  fn check_edge_targets(&mut self, name: &str, section: SectionId) {
    let Some(data) = self.snapshot.section(section) else {
      if self.num_edges > 0 {
        self.error(format!("{name} section missing"));
      }
      return;
    };
    if data.len() < self.num_edges * 4 {
      self.error(format!("{name} section too small"));
      return;
    }
    for i in 0..self.num_edges {
      let phys = read_u32_at(data, i) as usize;
      if phys >= self.num_nodes {
        self.error(format!("{name}[{i}] = {phys} out of range"));
      }
    }
  }

  fn check_mapping_bijection(&mut self) {
    if self.num_nodes == 0 {
      return;
    }
    let (Some(forward), Some(inverse)) = (
      self.snapshot.section(SectionId::PhysToNodeId),
      self.snapshot.section(SectionId::NodeIdToPhys),
    ) else {
      self.error("id mapping sections missing".to_string());
      return;
    };

    let max_node_id = self.snapshot.header.max_node_id;
    let phys_limit = self.num_nodes.min(forward.len() / 8);
    for phys in 0..phys_limit {
      let node_id = read_u64_at(forward, phys);
      if node_id > max_node_id {
        self.error(format!(
          "phys_to_nodeid[{phys}] = {node_id} exceeds maxNodeId {max_node_id}"
        ));
        continue;
      }
      let idx = node_id as usize;
      if idx * 4 + 4 > inverse.len() {
        self.error(format!("nodeid_to_phys too small for node {node_id}"));
        continue;
      }
      let back = read_i32_at(inverse, idx);
      if back != phys as i32 {
        self.error(format!(
          "mapping mismatch: phys {phys} -> node {node_id} -> phys {back}"
        ));
      }
    }

    for idx in 0..inverse.len() / 4 {
      let phys = read_i32_at(inverse, idx);
      if phys == -1 {
        continue;
      }
      if phys < 0 || phys as usize >= self.num_nodes {
        self.error(format!("nodeid_to_phys[{idx}] = {phys} out of range"));
        continue;
      }
      let back = read_u64_at(forward, phys as usize);
      if back != idx as u64 {
        self.error(format!(
          "mapping mismatch: node {idx} -> phys {phys} -> node {back}"
        ));
      }
    }
  }

  fn check_out_edge_order(&mut self) {
    let (Some(offsets), Some(etypes), Some(dsts)) = (
      self.snapshot.section(SectionId::OutOffsets),
      self.snapshot.section(SectionId::OutEtype),
      self.snapshot.section(SectionId::OutDst),
    ) else {
      return;
    };
    if etypes.len() < self.num_edges * 4 || dsts.len() < self.num_edges * 4 {
      self.error("out edge sections too small".to_string());
      return;
    }

    for phys in 0..self.num_nodes {
      let start = read_u32_at(offsets, phys) as usize;
      let end = read_u32_at(offsets, phys + 1) as usize;
      for i in start.saturating_add(1)..end {
        let prev = (read_u32_at(etypes, i - 1), read_u32_at(dsts, i - 1));
        let curr = (read_u32_at(etypes, i), read_u32_at(dsts, i));
        if prev > curr {
          self.error(format!(
            "out-edges of phys {phys} unsorted at {i}: {prev:?} > {curr:?}"
          ));
          return;
        }
        if prev == curr {
          self
            .warnings
            .push(format!("duplicate out-edge for phys {phys}: {curr:?}"));
        }
      }
    }
  }

  fn check_reciprocity(&mut self) {
    let sections = (
      self.snapshot.section(SectionId::OutOffsets),
      self.snapshot.section(SectionId::OutEtype),
      self.snapshot.section(SectionId::OutDst),
      self.snapshot.section(SectionId::InOffsets),
      self.snapshot.section(SectionId::InEtype),
      self.snapshot.section(SectionId::InSrc),
      self.snapshot.section(SectionId::InOutIndex),
    );
    let (
      Some(out_offsets),
      Some(out_etype),
      Some(out_dst),
      Some(in_offsets),
      Some(in_etype),
      Some(in_src),
      Some(in_out_index),
    ) = sections
    else {
      return;
    };

    let sized = out_offsets.len() >= (self.num_nodes + 1) * 4
      && in_offsets.len() >= (self.num_nodes + 1) * 4
      && out_etype.len() >= self.num_edges * 4
      && out_dst.len() >= self.num_edges * 4
      && in_etype.len() >= self.num_edges * 4
      && in_src.len() >= self.num_edges * 4
      && in_out_index.len() >= self.num_edges * 4;
    if !sized {
      return;
    }

    // Every in-edge must point back at its out-edge via in_out_index.
    for dst_phys in 0..self.num_nodes {
      let start = read_u32_at(in_offsets, dst_phys) as usize;
      let end = read_u32_at(in_offsets, dst_phys + 1) as usize;
      for in_idx in start..end {
        let src_phys = read_u32_at(in_src, in_idx) as usize;
        let etype = read_u32_at(in_etype, in_idx);
        let out_idx = read_u32_at(in_out_index, in_idx) as usize;

        if out_idx >= self.num_edges {
          self.error(format!("in_out_index[{in_idx}] = {out_idx} out of range"));
          continue;
        }
        let out_src = owning_node(out_offsets, self.num_nodes, out_idx);
        let out_d = read_u32_at(out_dst, out_idx) as usize;
        let out_e = read_u32_at(out_etype, out_idx);
        if out_src != src_phys || out_d != dst_phys || out_e != etype {
          self.error(format!(
            "reciprocity mismatch at in[{in_idx}]: expected ({src_phys},{etype},{dst_phys}), out[{out_idx}] is ({out_src},{out_e},{out_d})"
          ));
        }
      }
    }

    // And every out-edge must have a reciprocal in-edge.
    for src_phys in 0..self.num_nodes {
      let start = read_u32_at(out_offsets, src_phys) as usize;
      let end = read_u32_at(out_offsets, src_phys + 1) as usize;
      for out_idx in start..end {
        let dst_phys = read_u32_at(out_dst, out_idx) as usize;
        let etype = read_u32_at(out_etype, out_idx);
        if dst_phys >= self.num_nodes {
          continue;
        }

        let in_start = read_u32_at(in_offsets, dst_phys) as usize;
        let in_end = read_u32_at(in_offsets, dst_phys + 1) as usize;
        let found = (in_start..in_end).any(|in_idx| {
          read_u32_at(in_out_index, in_idx) as usize == out_idx
        });
        if !found {
          self.error(format!(
            "missing reciprocal in-edge for out[{out_idx}] ({src_phys},{etype},{dst_phys})"
          ));
        }
      }
    }
  }

  fn check_key_index(&mut self) {
    let Some(entries) = self.snapshot.section(SectionId::KeyEntries) else {
      return;
    };
    let count = entries.len() / KEY_INDEX_ENTRY_SIZE;
    let num_buckets = self
      .snapshot
      .section(SectionId::KeyBuckets)
      .map(|b| (b.len() / 4).saturating_sub(1) as u64)
      .unwrap_or(0);

    for i in 1..count {
      let prev_off = (i - 1) * KEY_INDEX_ENTRY_SIZE;
      let curr_off = i * KEY_INDEX_ENTRY_SIZE;
      let prev_hash = read_u64(entries, prev_off);
      let curr_hash = read_u64(entries, curr_off);

      if num_buckets > 0 {
        let prev_bucket = prev_hash % num_buckets;
        let curr_bucket = curr_hash % num_buckets;
        if prev_bucket > curr_bucket {
          self.error(format!(
            "key index unsorted by bucket at {i}: {prev_bucket} > {curr_bucket}"
          ));
          return;
        }
        if prev_bucket < curr_bucket {
          continue;
        }
      }

      let prev_rest = (
        prev_hash,
        read_u32(entries, prev_off + 8),
        read_u64(entries, prev_off + 16),
      );
      let curr_rest = (
        curr_hash,
        read_u32(entries, curr_off + 8),
        read_u64(entries, curr_off + 16),
      );
      if prev_rest >= curr_rest {
        self.error(format!("key index unsorted within bucket at {i}"));
        return;
      }
    }
  }

  fn check_string_bounds(&mut self) {
    let Ok(num_strings) = usize::try_from(self.snapshot.header.num_strings) else {
      self.error("num_strings overflow".to_string());
      return;
    };
    let Some(offsets) = self.snapshot.section(SectionId::StringOffsets) else {
      if num_strings > 1 {
        self.error("string_offsets section missing".to_string());
      }
      return;
    };
    if offsets.len() < (num_strings + 1) * 4 {
      self.error("string_offsets section too small".to_string());
      return;
    }

    let bytes_len = self
      .snapshot
      .section(SectionId::StringBytes)
      .map(|b| b.len())
      .unwrap_or(0);
    let mut prev = 0u32;
    for i in 0..=num_strings {
      let offset = read_u32_at(offsets, i);
      if offset < prev {
        self.error(format!("string_offsets not monotonic at {i}"));
        return;
      }
      prev = offset;
    }
    if prev as usize != bytes_len {
      self.error(format!(
        "string_offsets final value {prev} != string_bytes length {bytes_len}"
      ));
    }
  }
}

/// Owner of an out-edge flat index, by binary search over the offsets.
fn owning_node(out_offsets: &[u8], num_nodes: usize, edge_idx: usize) -> usize {
  let mut lo = 0usize;
  let mut hi = num_nodes;
  while lo + 1 < hi {
    let mid = (lo + hi) / 2;
    if read_u32_at(out_offsets, mid) as usize <= edge_idx {
      lo = mid;
    } else {
      hi = mid;
    }
  }
  lo
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::snapshot::writer::{build_snapshot, EdgeInput, NodeInput, SnapshotInput};
  use std::collections::HashMap;
  use std::sync::Arc;

  fn build(nodes: Vec<NodeInput>, edges: Vec<EdgeInput>) -> SnapshotData {
    let image = build_snapshot(SnapshotInput {
      generation: 1,
      nodes,
      edges,
      labels: HashMap::new(),
      etypes: HashMap::from([(1, "E".to_string()), (2, "F".to_string())]),
      propkeys: HashMap::new(),
      vector_stores: Vec::new(),
    })
    .unwrap();
    SnapshotData::parse_bytes(Arc::from(image.into_boxed_slice()), &Default::default()).unwrap()
  }

  fn node(node_id: u64, key: Option<&str>) -> NodeInput {
    NodeInput {
      node_id,
      key: key.map(str::to_string),
      labels: Vec::new(),
      props: HashMap::new(),
    }
  }

  fn edge(src: u64, etype: u32, dst: u64) -> EdgeInput {
    EdgeInput {
      src,
      etype,
      dst,
      props: HashMap::new(),
    }
  }

  #[test]
  fn well_formed_snapshot_passes() {
    let snap = build(
      vec![
        node(1, Some("a")),
        node(2, Some("b")),
        node(4, None),
      ],
      vec![edge(1, 1, 2), edge(1, 2, 4), edge(2, 1, 1), edge(4, 1, 1)],
    );
    let result = check_snapshot(&snap);
    assert!(result.valid, "errors: {:?}", result.errors);
    assert!(result.warnings.is_empty());
    assert!(quick_check(&snap));
  }

  #[test]
  fn empty_snapshot_passes() {
    let snap = build(vec![], vec![]);
    assert!(check_snapshot(&snap).valid);
    assert!(quick_check(&snap));
  }

  #[test]
  fn larger_graph_passes() {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for i in 1..=64u64 {
      nodes.push(node(i, None));
    }
    for i in 1..64u64 {
      edges.push(edge(i, (i % 3) as u32 + 1, i + 1));
      edges.push(edge(i + 1, 1, i));
    }
    let image = build_snapshot(SnapshotInput {
      generation: 1,
      nodes,
      edges,
      labels: HashMap::new(),
      etypes: HashMap::from([
        (1, "A".to_string()),
        (2, "B".to_string()),
        (3, "C".to_string()),
      ]),
      propkeys: HashMap::new(),
      vector_stores: Vec::new(),
    })
    .unwrap();
    let snap =
      SnapshotData::parse_bytes(Arc::from(image.into_boxed_slice()), &Default::default()).unwrap();
    let result = check_snapshot(&snap);
    assert!(result.valid, "errors: {:?}", result.errors);
  }
}
