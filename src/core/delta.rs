//! In-memory delta overlay.
//!
//! The delta buffers everything applied after the snapshot's generation that
//! has not yet been folded into a new snapshot: created/deleted nodes,
//! per-node edge patches, property values and tombstones, key-index changes
//! and pending schema definitions. Per-node patch vectors are kept sorted by
//! `(etype, other)` so merged reads can walk them in step with a snapshot
//! CSR row.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::types::*;

/// Edge-triple key used by the edge property map.
pub type EdgeKey = (NodeId, ETypeId, NodeId);

#[derive(Debug, Default, Clone)]
pub struct DeltaState {
  // ---- schema additions ----
  pub new_labels: HashMap<LabelId, String>,
  pub new_etypes: HashMap<ETypeId, String>,
  pub new_propkeys: HashMap<PropKeyId, String>,

  // ---- nodes ----
  /// Nodes created after the snapshot, with their optional key.
  pub created_nodes: HashMap<NodeId, Option<String>>,
  /// Snapshot nodes deleted after the snapshot (tombstones).
  pub deleted_nodes: HashSet<NodeId>,
  /// Key overrides for snapshot nodes (`SET_NODE_KEY`); `None` clears.
  pub node_key_overrides: HashMap<NodeId, Option<String>>,

  // ---- edges (sorted patch vectors) ----
  pub out_add: HashMap<NodeId, Vec<EdgePatch>>,
  pub out_del: HashMap<NodeId, Vec<EdgePatch>>,
  pub in_add: HashMap<NodeId, Vec<EdgePatch>>,
  pub in_del: HashMap<NodeId, Vec<EdgePatch>>,

  // ---- labels ----
  pub node_labels_added: HashMap<NodeId, Vec<LabelId>>,
  pub node_labels_removed: HashMap<NodeId, Vec<LabelId>>,

  // ---- properties (None = tombstone hiding a snapshot value) ----
  pub node_props: HashMap<NodeId, BTreeMap<PropKeyId, Option<PropValue>>>,
  pub edge_props: HashMap<EdgeKey, BTreeMap<PropKeyId, Option<PropValue>>>,

  // ---- key index ----
  pub key_index: HashMap<String, NodeId>,
  pub key_index_deleted: HashSet<String>,

  // ---- vectors replayed from WAL, drained into stores at open/commit ----
  pub pending_vectors: HashMap<(NodeId, PropKeyId), Option<Vec<f32>>>,

  // ---- statistics driving compaction ----
  edges_added: usize,
  edges_deleted: usize,
  props_touched: usize,
}

fn patch_insert(vec: &mut Vec<EdgePatch>, patch: EdgePatch) -> bool {
  match vec.binary_search(&patch) {
    Ok(_) => false,
    Err(pos) => {
      vec.insert(pos, patch);
      true
    }
  }
}

fn patch_remove(map: &mut HashMap<NodeId, Vec<EdgePatch>>, node: NodeId, patch: EdgePatch) -> bool {
  let Some(vec) = map.get_mut(&node) else {
    return false;
  };
  match vec.binary_search(&patch) {
    Ok(pos) => {
      vec.remove(pos);
      if vec.is_empty() {
        map.remove(&node);
      }
      true
    }
    Err(_) => false,
  }
}

fn patch_contains(map: &HashMap<NodeId, Vec<EdgePatch>>, node: NodeId, patch: &EdgePatch) -> bool {
  map
    .get(&node)
    .is_some_and(|vec| vec.binary_search(patch).is_ok())
}

impl DeltaState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn clear(&mut self) {
    *self = Self::default();
  }

  pub fn is_empty(&self) -> bool {
    self.created_nodes.is_empty()
      && self.deleted_nodes.is_empty()
      && self.node_key_overrides.is_empty()
      && self.out_add.is_empty()
      && self.out_del.is_empty()
      && self.node_props.is_empty()
      && self.edge_props.is_empty()
      && self.node_labels_added.is_empty()
      && self.node_labels_removed.is_empty()
      && self.new_labels.is_empty()
      && self.new_etypes.is_empty()
      && self.new_propkeys.is_empty()
      && self.pending_vectors.is_empty()
  }

  // ==========================================================================
  // Schema
  // ==========================================================================

  pub fn define_label(&mut self, id: LabelId, name: &str) {
    self.new_labels.insert(id, name.to_string());
  }

  pub fn define_etype(&mut self, id: ETypeId, name: &str) {
    self.new_etypes.insert(id, name.to_string());
  }

  pub fn define_propkey(&mut self, id: PropKeyId, name: &str) {
    self.new_propkeys.insert(id, name.to_string());
  }

  // ==========================================================================
  // Nodes
  // ==========================================================================

  pub fn create_node(&mut self, node_id: NodeId, key: Option<&str>) {
    self.deleted_nodes.remove(&node_id);
    self.created_nodes.insert(node_id, key.map(str::to_string));
    if let Some(key) = key {
      self.key_index.insert(key.to_string(), node_id);
      self.key_index_deleted.remove(key);
    }
  }

  /// Tombstone a node and cancel every delta edge that references it.
  /// Snapshot edges are tombstoned by the caller, which can see the
  /// snapshot rows; merged readers additionally skip edges whose endpoint
  /// is tombstoned, so reads stay correct either way.
  pub fn delete_node(&mut self, node_id: NodeId) {
    // The key entry is dropped only while it still maps to this node; a
    // reassignment merged in the same pass must not be clobbered.
    if let Some(key) = self.created_nodes.remove(&node_id).flatten() {
      if self.key_index.get(&key) == Some(&node_id) {
        self.key_index.remove(&key);
      }
    } else {
      self.deleted_nodes.insert(node_id);
    }
    if let Some(key) = self.node_key_overrides.remove(&node_id).flatten() {
      if self.key_index.get(&key) == Some(&node_id) {
        self.key_index.remove(&key);
      }
    }

    // Cancel delta-added edges touching this node from both directions.
    if let Some(patches) = self.out_add.remove(&node_id) {
      self.edges_added -= patches.len();
      for patch in patches {
        patch_remove(
          &mut self.in_add,
          patch.other,
          EdgePatch {
            etype: patch.etype,
            other: node_id,
          },
        );
        self.edge_props.remove(&(node_id, patch.etype, patch.other));
      }
    }
    if let Some(patches) = self.in_add.remove(&node_id) {
      for patch in patches {
        if patch_remove(
          &mut self.out_add,
          patch.other,
          EdgePatch {
            etype: patch.etype,
            other: node_id,
          },
        ) {
          self.edges_added -= 1;
        }
        self.edge_props.remove(&(patch.other, patch.etype, node_id));
      }
    }

    self.node_props.remove(&node_id);
    self.node_labels_added.remove(&node_id);
    self.node_labels_removed.remove(&node_id);
    self
      .pending_vectors
      .retain(|(vec_node, _), _| *vec_node != node_id);
  }

  pub fn is_node_created(&self, node_id: NodeId) -> bool {
    self.created_nodes.contains_key(&node_id)
  }

  pub fn is_node_deleted(&self, node_id: NodeId) -> bool {
    self.deleted_nodes.contains(&node_id)
  }

  /// Key of a node as far as the delta knows: `Some(None)` means the delta
  /// cleared it, `None` means the delta has no opinion.
  pub fn node_key(&self, node_id: NodeId) -> Option<Option<&str>> {
    if let Some(key) = self.created_nodes.get(&node_id) {
      return Some(key.as_deref());
    }
    self
      .node_key_overrides
      .get(&node_id)
      .map(|key| key.as_deref())
  }

  pub fn set_node_key(&mut self, node_id: NodeId, key: Option<&str>, old_key: Option<&str>) {
    if let Some(old) = old_key {
      if self.key_index.get(old) == Some(&node_id) {
        self.key_index.remove(old);
      }
      if !self.created_nodes.contains_key(&node_id) {
        self.key_index_deleted.insert(old.to_string());
      }
    }
    if let Some(new) = key {
      self.key_index.insert(new.to_string(), node_id);
      self.key_index_deleted.remove(new);
    }
    if let Some(existing) = self.created_nodes.get_mut(&node_id) {
      *existing = key.map(str::to_string);
    } else {
      self
        .node_key_overrides
        .insert(node_id, key.map(str::to_string));
    }
  }

  /// Record that a snapshot node's key disappears with the node.
  pub fn tombstone_key(&mut self, key: &str) {
    self.key_index.remove(key);
    self.key_index_deleted.insert(key.to_string());
  }

  pub fn node_by_key(&self, key: &str) -> Option<NodeId> {
    self.key_index.get(key).copied()
  }

  pub fn is_key_deleted(&self, key: &str) -> bool {
    self.key_index_deleted.contains(key)
  }

  // ==========================================================================
  // Edges
  // ==========================================================================

  /// Apply an edge addition. Returns `false` when the delta already holds
  /// the edge as an add (no-op per the cancellation rules).
  pub fn add_edge(&mut self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    let fwd = EdgePatch { etype, other: dst };
    let rev = EdgePatch { etype, other: src };

    // Re-adding a tombstoned snapshot edge cancels the tombstone.
    if patch_remove(&mut self.out_del, src, fwd) {
      patch_remove(&mut self.in_del, dst, rev);
      self.edges_deleted -= 1;
      return true;
    }

    if !patch_insert(self.out_add.entry(src).or_default(), fwd) {
      return false;
    }
    patch_insert(self.in_add.entry(dst).or_default(), rev);
    self.edges_added += 1;
    true
  }

  /// Apply an edge deletion. Deleting a delta-only add cancels it without
  /// producing a tombstone.
  pub fn delete_edge(&mut self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    let fwd = EdgePatch { etype, other: dst };
    let rev = EdgePatch { etype, other: src };

    if patch_remove(&mut self.out_add, src, fwd) {
      patch_remove(&mut self.in_add, dst, rev);
      self.edge_props.remove(&(src, etype, dst));
      self.edges_added -= 1;
      return true;
    }

    if !patch_insert(self.out_del.entry(src).or_default(), fwd) {
      return false;
    }
    patch_insert(self.in_del.entry(dst).or_default(), rev);
    self.edge_props.remove(&(src, etype, dst));
    self.edges_deleted += 1;
    true
  }

  pub fn is_edge_added(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    patch_contains(&self.out_add, src, &EdgePatch { etype, other: dst })
  }

  pub fn is_edge_deleted(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    patch_contains(&self.out_del, src, &EdgePatch { etype, other: dst })
  }

  pub fn out_adds(&self, src: NodeId) -> &[EdgePatch] {
    self.out_add.get(&src).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn out_dels(&self, src: NodeId) -> &[EdgePatch] {
    self.out_del.get(&src).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn in_adds(&self, dst: NodeId) -> &[EdgePatch] {
    self.in_add.get(&dst).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn in_dels(&self, dst: NodeId) -> &[EdgePatch] {
    self.in_del.get(&dst).map(Vec::as_slice).unwrap_or(&[])
  }

  // ==========================================================================
  // Labels
  // ==========================================================================

  pub fn add_node_label(&mut self, node_id: NodeId, label: LabelId) {
    if let Some(removed) = self.node_labels_removed.get_mut(&node_id) {
      removed.retain(|&l| l != label);
    }
    let added = self.node_labels_added.entry(node_id).or_default();
    if let Err(pos) = added.binary_search(&label) {
      added.insert(pos, label);
    }
  }

  pub fn remove_node_label(&mut self, node_id: NodeId, label: LabelId) {
    if let Some(added) = self.node_labels_added.get_mut(&node_id) {
      added.retain(|&l| l != label);
    }
    let removed = self.node_labels_removed.entry(node_id).or_default();
    if let Err(pos) = removed.binary_search(&label) {
      removed.insert(pos, label);
    }
  }

  // ==========================================================================
  // Properties
  // ==========================================================================

  pub fn set_node_prop(&mut self, node_id: NodeId, propkey: PropKeyId, value: PropValue) {
    self
      .node_props
      .entry(node_id)
      .or_default()
      .insert(propkey, Some(value));
    self.props_touched += 1;
  }

  pub fn delete_node_prop(&mut self, node_id: NodeId, propkey: PropKeyId) {
    self
      .node_props
      .entry(node_id)
      .or_default()
      .insert(propkey, None);
    self.props_touched += 1;
  }

  /// `Some(None)` is a tombstone, `None` means fall through to the snapshot.
  pub fn node_prop(&self, node_id: NodeId, propkey: PropKeyId) -> Option<Option<&PropValue>> {
    self
      .node_props
      .get(&node_id)
      .and_then(|props| props.get(&propkey))
      .map(Option::as_ref)
  }

  pub fn node_props_of(&self, node_id: NodeId) -> Option<&BTreeMap<PropKeyId, Option<PropValue>>> {
    self.node_props.get(&node_id)
  }

  pub fn set_edge_prop(
    &mut self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    propkey: PropKeyId,
    value: PropValue,
  ) {
    self
      .edge_props
      .entry((src, etype, dst))
      .or_default()
      .insert(propkey, Some(value));
    self.props_touched += 1;
  }

  pub fn delete_edge_prop(&mut self, src: NodeId, etype: ETypeId, dst: NodeId, propkey: PropKeyId) {
    self
      .edge_props
      .entry((src, etype, dst))
      .or_default()
      .insert(propkey, None);
    self.props_touched += 1;
  }

  pub fn edge_prop(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    propkey: PropKeyId,
  ) -> Option<Option<&PropValue>> {
    self
      .edge_props
      .get(&(src, etype, dst))
      .and_then(|props| props.get(&propkey))
      .map(Option::as_ref)
  }

  pub fn edge_props_of(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
  ) -> Option<&BTreeMap<PropKeyId, Option<PropValue>>> {
    self.edge_props.get(&(src, etype, dst))
  }

  // ==========================================================================
  // Vectors
  // ==========================================================================

  pub fn set_pending_vector(&mut self, node_id: NodeId, propkey: PropKeyId, vector: Vec<f32>) {
    self.pending_vectors.insert((node_id, propkey), Some(vector));
  }

  pub fn delete_pending_vector(&mut self, node_id: NodeId, propkey: PropKeyId) {
    self.pending_vectors.insert((node_id, propkey), None);
  }

  // ==========================================================================
  // Statistics
  // ==========================================================================

  pub fn edges_added(&self) -> usize {
    self.edges_added
  }

  pub fn edges_deleted(&self) -> usize {
    self.edges_deleted
  }

  /// Total churn used against the compaction threshold.
  pub fn churn(&self) -> usize {
    self.created_nodes.len()
      + self.deleted_nodes.len()
      + self.edges_added
      + self.edges_deleted
      + self.props_touched
  }

  /// Fold another delta (a committed transaction's staging area) into this
  /// one, replaying through the mutation methods so cancellation rules hold.
  pub fn merge_from(&mut self, mut other: DeltaState) {
    self.new_labels.extend(other.new_labels.drain());
    self.new_etypes.extend(other.new_etypes.drain());
    self.new_propkeys.extend(other.new_propkeys.drain());

    for (node_id, key) in std::mem::take(&mut other.created_nodes) {
      self.create_node(node_id, key.as_deref());
    }

    for (src, patches) in std::mem::take(&mut other.out_add) {
      for patch in patches {
        self.add_edge(src, patch.etype, patch.other);
      }
    }
    for (src, patches) in std::mem::take(&mut other.out_del) {
      for patch in patches {
        self.delete_edge(src, patch.etype, patch.other);
      }
    }

    for (node_id, props) in std::mem::take(&mut other.node_props) {
      for (propkey, value) in props {
        match value {
          Some(value) => self.set_node_prop(node_id, propkey, value),
          None => self.delete_node_prop(node_id, propkey),
        }
      }
    }
    for ((src, etype, dst), props) in std::mem::take(&mut other.edge_props) {
      for (propkey, value) in props {
        match value {
          Some(value) => self.set_edge_prop(src, etype, dst, propkey, value),
          None => self.delete_edge_prop(src, etype, dst, propkey),
        }
      }
    }

    for (node_id, labels) in std::mem::take(&mut other.node_labels_added) {
      for label in labels {
        self.add_node_label(node_id, label);
      }
    }
    for (node_id, labels) in std::mem::take(&mut other.node_labels_removed) {
      for label in labels {
        self.remove_node_label(node_id, label);
      }
    }

    for node_id in std::mem::take(&mut other.deleted_nodes) {
      self.delete_node(node_id);
    }
    for key in std::mem::take(&mut other.key_index_deleted) {
      self.tombstone_key(&key);
    }
    for (node_id, key) in std::mem::take(&mut other.node_key_overrides) {
      // A key change for a node this delta created updates that entry;
      // snapshot nodes keep their override.
      if let Some(existing) = self.created_nodes.get_mut(&node_id) {
        *existing = key;
      } else {
        self.node_key_overrides.insert(node_id, key);
      }
    }
    // Key additions were already replayed by create_node/set_node_key; the
    // remainder covers keys set on snapshot nodes.
    for (key, node_id) in std::mem::take(&mut other.key_index) {
      self.key_index.entry(key).or_insert(node_id);
    }

    self
      .pending_vectors
      .extend(std::mem::take(&mut other.pending_vectors));
  }
}
