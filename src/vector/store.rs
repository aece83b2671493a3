//! Vector store mutation and lookup.

use std::collections::HashMap;

use crate::error::{RayError, Result};
use crate::types::NodeId;
use crate::vector::types::{Fragment, FragmentState, VectorStoreConfig};

/// Global vector id. Ids are assigned densely in insertion order, so the
/// owning fragment and local row fall out of plain division:
/// `fragment = id / fragment_target_size`, `row = id % fragment_target_size`.
pub type VectorId = u64;

#[derive(Debug, Clone)]
pub struct VectorStore {
  pub config: VectorStoreConfig,
  pub fragments: Vec<Fragment>,
  pub node_to_vector: HashMap<NodeId, VectorId>,
  pub next_vector_id: VectorId,
  pub live_count: u64,
}

impl VectorStore {
  pub fn new(config: VectorStoreConfig) -> Self {
    Self {
      config,
      fragments: vec![Fragment::new(0)],
      node_to_vector: HashMap::new(),
      next_vector_id: 0,
      live_count: 0,
    }
  }

  pub fn locate(&self, vector_id: VectorId) -> (usize, usize) {
    let target = self.config.fragment_target_size as u64;
    ((vector_id / target) as usize, (vector_id % target) as usize)
  }
}

fn validate_vector(config: &VectorStoreConfig, vector: &[f32]) -> Result<()> {
  if vector.len() != config.dimensions {
    return Err(RayError::InvalidArgument(format!(
      "vector dimension mismatch: expected {}, got {}",
      config.dimensions,
      vector.len()
    )));
  }
  if vector.iter().any(|v| !v.is_finite()) {
    return Err(RayError::InvalidArgument(
      "vector contains NaN or infinite components".to_string(),
    ));
  }
  Ok(())
}

fn normalized(vector: &[f32]) -> Vec<f32> {
  let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
  if norm > 0.0 {
    vector.iter().map(|v| v / norm).collect()
  } else {
    vector.to_vec()
  }
}

/// Insert or replace the vector for `node_id`. Returns the new vector id.
pub fn vector_store_insert(
  store: &mut VectorStore,
  node_id: NodeId,
  vector: &[f32],
) -> Result<VectorId> {
  validate_vector(&store.config, vector)?;

  let row = if store.config.normalize {
    normalized(vector)
  } else {
    vector.to_vec()
  };

  // Replacement: drop the previous row first.
  if store.node_to_vector.contains_key(&node_id) {
    vector_store_delete(store, node_id);
  }

  let vector_id = store.next_vector_id;
  let (frag_idx, _local) = store.locate(vector_id);

  if frag_idx == store.fragments.len() {
    // The previous fragment hit its target size; seal it and open a new one.
    if let Some(last) = store.fragments.last_mut() {
      last.state = FragmentState::Sealed;
    }
    store.fragments.push(Fragment::new(frag_idx as u32));
  }

  let dims = store.config.dimensions;
  let group_capacity = store.config.row_group_size * dims;
  let fragment = &mut store.fragments[frag_idx];

  let needs_group = fragment
    .row_groups
    .last()
    .map(|group| group.len() + dims > group_capacity)
    .unwrap_or(true);
  if needs_group {
    fragment.row_groups.push(Vec::new());
  }
  let Some(group) = fragment.row_groups.last_mut() else {
    return Err(RayError::Internal("vector fragment lost its row group".to_string()));
  };
  group.extend_from_slice(&row);
  fragment.node_ids.push(node_id);
  fragment.num_rows += 1;

  store.node_to_vector.insert(node_id, vector_id);
  store.next_vector_id += 1;
  store.live_count += 1;
  Ok(vector_id)
}

/// Delete the vector for `node_id`. Returns whether a live row was removed.
pub fn vector_store_delete(store: &mut VectorStore, node_id: NodeId) -> bool {
  let Some(vector_id) = store.node_to_vector.remove(&node_id) else {
    return false;
  };
  let (frag_idx, row) = store.locate(vector_id);
  if let Some(fragment) = store.fragments.get_mut(frag_idx) {
    if !fragment.is_deleted(row) {
      fragment.mark_deleted(row);
      store.live_count -= 1;
      return true;
    }
  }
  false
}

/// Fetch the live vector for `node_id`.
pub fn vector_store_get(store: &VectorStore, node_id: NodeId) -> Option<Vec<f32>> {
  let vector_id = *store.node_to_vector.get(&node_id)?;
  let (frag_idx, row) = store.locate(vector_id);
  let fragment = store.fragments.get(frag_idx)?;
  if fragment.is_deleted(row) {
    return None;
  }

  let dims = store.config.dimensions;
  let rows_per_group = store.config.row_group_size;
  let group = fragment.row_groups.get(row / rows_per_group)?;
  let local = (row % rows_per_group) * dims;
  if local + dims > group.len() {
    return None;
  }
  Some(group[local..local + dims].to_vec())
}
