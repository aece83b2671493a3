//! Lazy merged iteration: neighbors, node and edge listings, counts.
//!
//! Neighbor iteration is a sorted three-way merge of the snapshot CSR row,
//! the shared delta's patch vectors and the transaction's staging patches,
//! with tombstone and MVCC filtering applied per element. Patch vectors
//! are copied at construction so the iterator never holds the delta lock.

use crate::core::delta::DeltaState;
use crate::graph::db::GraphDB;
use crate::graph::nodes::{node_exists_at, node_visible_at};
use crate::graph::tx::{TxHandle, TxState};
use crate::mvcc::TxKey;
use crate::types::*;

/// A fully qualified edge, as yielded by `list_edges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullEdge {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
  Out,
  In,
}

/// Inverse of the `src << 40 | etype << 20 | dst` edge-key packing.
pub(crate) fn unpack_edge_key(packed: u64) -> (NodeId, ETypeId, NodeId) {
  (
    packed >> 40,
    ((packed >> 20) & 0xfffff) as ETypeId,
    packed & 0xfffff,
  )
}

// ============================================================================
// Patch resolution
// ============================================================================

/// Collapse shared-delta and staging patches into one effective opinion
/// per `(etype, other)`: later layers win.
fn effective_patches(
  delta: &DeltaState,
  tx: Option<&TxState>,
  node: NodeId,
  direction: Direction,
  etype: Option<ETypeId>,
) -> (Vec<EdgePatch>, Vec<EdgePatch>) {
  let mut opinion: std::collections::BTreeMap<EdgePatch, bool> = std::collections::BTreeMap::new();

  let select = |d: &DeltaState, added: bool| -> Vec<EdgePatch> {
    let patches = match (direction, added) {
      (Direction::Out, true) => d.out_adds(node),
      (Direction::Out, false) => d.out_dels(node),
      (Direction::In, true) => d.in_adds(node),
      (Direction::In, false) => d.in_dels(node),
    };
    patches.to_vec()
  };

  for patch in select(delta, true) {
    opinion.insert(patch, true);
  }
  for patch in select(delta, false) {
    opinion.insert(patch, false);
  }
  if let Some(tx) = tx {
    for patch in select(&tx.pending, true) {
      opinion.insert(patch, true);
    }
    for patch in select(&tx.pending, false) {
      opinion.insert(patch, false);
    }
  }

  let mut adds = Vec::new();
  let mut dels = Vec::new();
  for (patch, added) in opinion {
    if let Some(filter) = etype {
      if patch.etype != filter {
        continue;
      }
    }
    if added {
      adds.push(patch);
    } else {
      dels.push(patch);
    }
  }
  (adds, dels)
}

// ============================================================================
// Neighbor iterator
// ============================================================================

/// Lazy neighbor sequence yielding `(etype, neighbor)` sorted ascending
/// with no duplicates. Callers may stop at any element.
pub struct NeighborIter<'a> {
  db: &'a GraphDB,
  node: NodeId,
  direction: Direction,
  snapshot: Option<std::sync::Arc<crate::core::snapshot::reader::SnapshotData>>,
  snap_pos: usize,
  snap_end: usize,
  adds: Vec<EdgePatch>,
  add_pos: usize,
  dels: Vec<EdgePatch>,
  /// The transaction's own staged edge patches; they outrank both the
  /// version chains and the shared delta.
  pending_adds: Vec<EdgePatch>,
  pending_dels: Vec<EdgePatch>,
  /// Pending node tombstones/creations from the transaction, cloned so
  /// the iterator does not borrow the staging delta.
  pending_deleted: Vec<NodeId>,
  pending_created: Vec<NodeId>,
  txid: TxId,
  read_ts: Timestamp,
}

impl<'a> NeighborIter<'a> {
  fn new(
    db: &'a GraphDB,
    tx: Option<&TxState>,
    node: NodeId,
    direction: Direction,
    etype: Option<ETypeId>,
  ) -> Self {
    let (txid, read_ts) = db.read_horizon(tx);

    let snapshot = db.snapshot.read().clone();
    let (snap_pos, snap_end) = match snapshot.as_ref().and_then(|s| {
      let phys = s.phys_node(node)?;
      Some(match (direction, etype) {
        (Direction::Out, Some(et)) => s.out_etype_range(phys, et),
        (Direction::Out, None) => s.out_range(phys).unwrap_or((0, 0)),
        (Direction::In, Some(et)) => s.in_etype_range(phys, et),
        (Direction::In, None) => s.in_range(phys).unwrap_or((0, 0)),
      })
    }) {
      Some(range) => range,
      None => (0, 0),
    };

    let (mut adds, dels) = {
      let delta = db.delta.read();
      effective_patches(&delta, tx, node, direction, etype)
    };

    // Edges only the version chains remember (cancelled in the delta or
    // folded out by a compaction) still need to be merge candidates; the
    // per-candidate chain probe then decides visibility.
    if let Some(mvcc) = db.mvcc.as_ref() {
      let chain_keys = mvcc.versions.lock().edge_chain_keys();
      for packed in chain_keys {
        let (src, edge_etype, dst) = unpack_edge_key(packed);
        let patch = match direction {
          Direction::Out if src == node => EdgePatch {
            etype: edge_etype,
            other: dst,
          },
          Direction::In if dst == node => EdgePatch {
            etype: edge_etype,
            other: src,
          },
          _ => continue,
        };
        if etype.is_some_and(|filter| filter != patch.etype) {
          continue;
        }
        adds.push(patch);
      }
      adds.sort_unstable();
      adds.dedup();
    }

    let (pending_deleted, pending_created) = match tx {
      Some(tx) => (
        tx.pending.deleted_nodes.iter().copied().collect(),
        tx.pending.created_nodes.keys().copied().collect(),
      ),
      None => (Vec::new(), Vec::new()),
    };

    let staged = |added: bool| -> Vec<EdgePatch> {
      let Some(tx) = tx else {
        return Vec::new();
      };
      let patches = match (direction, added) {
        (Direction::Out, true) => tx.pending.out_adds(node),
        (Direction::Out, false) => tx.pending.out_dels(node),
        (Direction::In, true) => tx.pending.in_adds(node),
        (Direction::In, false) => tx.pending.in_dels(node),
      };
      patches.to_vec()
    };

    Self {
      db,
      node,
      direction,
      snapshot,
      snap_pos,
      snap_end,
      adds,
      add_pos: 0,
      dels,
      pending_adds: staged(true),
      pending_dels: staged(false),
      pending_deleted,
      pending_created,
      txid,
      read_ts,
    }
  }

  fn snapshot_entry(&self) -> Option<EdgePatch> {
    let snapshot = self.snapshot.as_ref()?;
    if self.snap_pos >= self.snap_end {
      return None;
    }
    let (etype, other_phys) = match self.direction {
      Direction::Out => snapshot.out_edge_at(self.snap_pos)?,
      Direction::In => {
        let (etype, src_phys, _) = snapshot.in_edge_at(self.snap_pos)?;
        (etype, src_phys)
      }
    };
    let other = snapshot.node_id(other_phys)?;
    Some(EdgePatch { etype, other })
  }

  fn edge_key(&self, patch: EdgePatch) -> TxKey {
    match self.direction {
      Direction::Out => TxKey::edge(self.node, patch.etype, patch.other),
      Direction::In => TxKey::edge(patch.other, patch.etype, self.node),
    }
  }

  fn other_node_visible(&self, other: NodeId) -> bool {
    if self.pending_deleted.contains(&other) {
      return false;
    }
    if self.pending_created.contains(&other) {
      return true;
    }
    node_visible_at(self.db, self.txid, self.read_ts, other)
  }

  /// Visibility of one merged candidate. `in_snapshot` tells whether the
  /// candidate came from the CSR row (delta tombstones only apply there).
  fn candidate_visible(&self, patch: EdgePatch, in_snapshot: bool, in_adds: bool) -> bool {
    // The transaction's own staged patches win over everything.
    if self.pending_dels.binary_search(&patch).is_ok() {
      return false;
    }
    if self.pending_adds.binary_search(&patch).is_ok() {
      return self.other_node_visible(patch.other);
    }

    if let Some(mvcc) = self.db.mvcc.as_ref() {
      let key = self.edge_key(patch);
      self.db.record_read(self.txid, key);
      if let Some(visible) = mvcc.versions.lock().presence_at(key, self.read_ts) {
        return visible && self.other_node_visible(patch.other);
      }
    }

    if in_snapshot && !in_adds && self.dels.binary_search(&patch).is_ok() {
      return false;
    }
    self.other_node_visible(patch.other)
  }
}

impl Iterator for NeighborIter<'_> {
  type Item = (ETypeId, NodeId);

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let snap = self.snapshot_entry();
      let add = self.adds.get(self.add_pos).copied();

      let (patch, in_snapshot, in_adds) = match (snap, add) {
        (None, None) => return None,
        (Some(s), None) => {
          self.snap_pos += 1;
          (s, true, false)
        }
        (None, Some(a)) => {
          self.add_pos += 1;
          (a, false, true)
        }
        (Some(s), Some(a)) => {
          if s < a {
            self.snap_pos += 1;
            (s, true, false)
          } else if a < s {
            self.add_pos += 1;
            (a, false, true)
          } else {
            self.snap_pos += 1;
            self.add_pos += 1;
            (s, true, true)
          }
        }
      };

      if self.candidate_visible(patch, in_snapshot, in_adds) {
        return Some((patch.etype, patch.other));
      }
    }
  }
}

// ============================================================================
// Construction entry points
// ============================================================================

pub(crate) fn neighbors_out<'a>(
  db: &'a GraphDB,
  tx: Option<&TxState>,
  src: NodeId,
  etype: Option<ETypeId>,
) -> NeighborIter<'a> {
  NeighborIter::new(db, tx, src, Direction::Out, etype)
}

pub(crate) fn neighbors_in<'a>(
  db: &'a GraphDB,
  tx: Option<&TxState>,
  dst: NodeId,
  etype: Option<ETypeId>,
) -> NeighborIter<'a> {
  NeighborIter::new(db, tx, dst, Direction::In, etype)
}

/// Outgoing neighbors at the transaction's horizon.
pub fn get_neighbors_out<'a>(
  handle: &'a TxHandle<'_>,
  src: NodeId,
  etype: Option<ETypeId>,
) -> NeighborIter<'a> {
  neighbors_out(handle.db(), Some(&handle.state), src, etype)
}

/// Incoming neighbors at the transaction's horizon.
pub fn get_neighbors_in<'a>(
  handle: &'a TxHandle<'_>,
  dst: NodeId,
  etype: Option<ETypeId>,
) -> NeighborIter<'a> {
  neighbors_in(handle.db(), Some(&handle.state), dst, etype)
}

/// Outgoing neighbors of the newest committed state, collected.
pub fn get_neighbors_out_db(
  db: &GraphDB,
  src: NodeId,
  etype: Option<ETypeId>,
) -> Vec<(ETypeId, NodeId)> {
  neighbors_out(db, None, src, etype).collect()
}

/// Incoming neighbors of the newest committed state, collected.
pub fn get_neighbors_in_db(
  db: &GraphDB,
  dst: NodeId,
  etype: Option<ETypeId>,
) -> Vec<(ETypeId, NodeId)> {
  neighbors_in(db, None, dst, etype).collect()
}

// ============================================================================
// Listings and counts
// ============================================================================

pub(crate) fn list_nodes_at(db: &GraphDB, tx: Option<&TxState>) -> Vec<NodeId> {
  let mut nodes: Vec<NodeId> = Vec::new();

  {
    let snapshot = db.snapshot.read();
    if let Some(snapshot) = snapshot.as_ref() {
      for phys in 0..snapshot.header.num_nodes as u32 {
        if let Some(node_id) = snapshot.node_id(phys) {
          nodes.push(node_id);
        }
      }
    }
  }
  {
    let delta = db.delta.read();
    nodes.extend(delta.created_nodes.keys().copied());
  }
  if let Some(tx) = tx {
    nodes.extend(tx.pending.created_nodes.keys().copied());
  }
  if let Some(mvcc) = db.mvcc.as_ref() {
    nodes.extend(mvcc.versions.lock().node_chain_keys());
  }

  nodes.sort_unstable();
  nodes.dedup();
  nodes.retain(|&node_id| node_exists_at(db, tx, node_id));
  nodes
}

pub(crate) fn list_edges_at(
  db: &GraphDB,
  tx: Option<&TxState>,
  etype: Option<ETypeId>,
) -> Vec<FullEdge> {
  let mut edges = Vec::new();
  for src in list_nodes_at(db, tx) {
    for (edge_etype, dst) in neighbors_out(db, tx, src, etype) {
      edges.push(FullEdge {
        src,
        etype: edge_etype,
        dst,
      });
    }
  }
  edges
}

pub fn list_nodes(handle: &TxHandle<'_>) -> Vec<NodeId> {
  list_nodes_at(handle.db(), Some(&handle.state))
}

pub fn list_nodes_db(db: &GraphDB) -> Vec<NodeId> {
  list_nodes_at(db, None)
}

pub fn list_edges(handle: &TxHandle<'_>, etype: Option<ETypeId>) -> Vec<FullEdge> {
  list_edges_at(handle.db(), Some(&handle.state), etype)
}

pub fn list_edges_db(db: &GraphDB, etype: Option<ETypeId>) -> Vec<FullEdge> {
  list_edges_at(db, None, etype)
}

/// Node count from snapshot metadata plus delta adjustments. With MVCC
/// and a transaction horizon the merged listing is authoritative.
pub(crate) fn count_nodes_at(db: &GraphDB, tx: Option<&TxState>) -> u64 {
  if db.mvcc_enabled() && tx.is_some() {
    return list_nodes_at(db, tx).len() as u64;
  }

  let snapshot_count = db
    .snapshot
    .read()
    .as_ref()
    .map(|s| s.header.num_nodes)
    .unwrap_or(0);

  let (created, deleted) = {
    let delta = db.delta.read();
    (delta.created_nodes.len() as u64, delta.deleted_nodes.len() as u64)
  };

  let mut count = snapshot_count + created - deleted;
  if let Some(tx) = tx {
    count += tx.pending.created_nodes.len() as u64;
    count -= tx.pending.deleted_nodes.len() as u64;
  }
  count
}

/// Edge count from snapshot metadata plus delta adjustments. The delta's
/// counters already net out cancelled add/delete pairs. With MVCC and a
/// transaction horizon the merged listing is authoritative.
pub(crate) fn count_edges_at(db: &GraphDB, tx: Option<&TxState>) -> u64 {
  if db.mvcc_enabled() && tx.is_some() {
    return list_edges_at(db, tx, None).len() as u64;
  }

  let snapshot_count = db
    .snapshot
    .read()
    .as_ref()
    .map(|s| s.header.num_edges)
    .unwrap_or(0);

  let (added, deleted) = {
    let delta = db.delta.read();
    (delta.edges_added() as u64, delta.edges_deleted() as u64)
  };

  let mut count = snapshot_count + added - deleted;
  if let Some(tx) = tx {
    count += tx.pending.edges_added() as u64;
    count -= tx.pending.edges_deleted() as u64;
  }
  count
}

pub fn count_nodes(handle: &TxHandle<'_>) -> u64 {
  count_nodes_at(handle.db(), Some(&handle.state))
}

pub fn count_nodes_db(db: &GraphDB) -> u64 {
  count_nodes_at(db, None)
}

pub fn count_edges(handle: &TxHandle<'_>) -> u64 {
  count_edges_at(handle.db(), Some(&handle.state))
}

pub fn count_edges_db(db: &GraphDB) -> u64 {
  count_edges_at(db, None)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::db::{close_graph_db, open_graph_db, OpenOptions};
  use crate::graph::edges::{add_edge, delete_edge};
  use crate::graph::nodes::{create_node, NodeOpts};
  use crate::graph::tx::{begin_read_tx, begin_tx, commit};
  use tempfile::tempdir;

  #[test]
  fn neighbors_merge_sorted_without_duplicates() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let hub = create_node(&mut tx, NodeOpts::new()).unwrap();
    let mut targets = Vec::new();
    for _ in 0..5 {
      targets.push(create_node(&mut tx, NodeOpts::new()).unwrap());
    }
    // Insert out of order across two edge types.
    add_edge(&mut tx, hub, 2, targets[1]).unwrap();
    add_edge(&mut tx, hub, 1, targets[4]).unwrap();
    add_edge(&mut tx, hub, 1, targets[0]).unwrap();
    add_edge(&mut tx, hub, 2, targets[3]).unwrap();
    commit(&mut tx).unwrap();

    let neighbors = get_neighbors_out_db(&db, hub, None);
    let mut sorted = neighbors.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(neighbors, sorted);
    assert_eq!(neighbors.len(), 4);

    // Filtered scan restricts to one etype and stays sorted.
    let knows = get_neighbors_out_db(&db, hub, Some(1));
    assert_eq!(knows, vec![(1, targets[0]), (1, targets[4])]);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn in_neighbors_mirror_out() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let alice = create_node(&mut tx, NodeOpts::new().with_key("alice")).unwrap();
    let bob = create_node(&mut tx, NodeOpts::new().with_key("bob")).unwrap();
    add_edge(&mut tx, alice, 1, bob).unwrap();
    add_edge(&mut tx, bob, 2, alice).unwrap();
    commit(&mut tx).unwrap();

    assert_eq!(get_neighbors_out_db(&db, alice, None), vec![(1, bob)]);
    assert_eq!(get_neighbors_in_db(&db, bob, None), vec![(1, alice)]);
    assert_eq!(get_neighbors_in_db(&db, alice, None), vec![(2, bob)]);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn deleted_edges_are_skipped_lazily() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let a = create_node(&mut tx, NodeOpts::new()).unwrap();
    let b = create_node(&mut tx, NodeOpts::new()).unwrap();
    let c = create_node(&mut tx, NodeOpts::new()).unwrap();
    add_edge(&mut tx, a, 1, b).unwrap();
    add_edge(&mut tx, a, 1, c).unwrap();
    commit(&mut tx).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    delete_edge(&mut tx, a, 1, b).unwrap();
    // Inside the transaction, the deletion is already in effect.
    let within: Vec<_> = get_neighbors_out(&tx, a, None).collect();
    assert_eq!(within, vec![(1, c)]);
    commit(&mut tx).unwrap();

    assert_eq!(get_neighbors_out_db(&db, a, None), vec![(1, c)]);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn counts_and_listings() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let mut chain = Vec::new();
    for i in 0..10 {
      chain.push(create_node(&mut tx, NodeOpts::new().with_key(format!("n{i}"))).unwrap());
    }
    for pair in chain.windows(2) {
      add_edge(&mut tx, pair[0], 1, pair[1]).unwrap();
    }
    commit(&mut tx).unwrap();

    assert_eq!(count_nodes_db(&db), 10);
    assert_eq!(count_edges_db(&db), 9);
    assert_eq!(list_nodes_db(&db).len(), 10);
    assert_eq!(list_edges_db(&db, None).len(), 9);
    assert_eq!(list_edges_db(&db, Some(2)).len(), 0);

    let tx = begin_read_tx(&db).unwrap();
    assert_eq!(count_nodes(&tx), 10);
    drop(tx);
    close_graph_db(db).unwrap();
  }
}
