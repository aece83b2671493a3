//! Node operations: create, delete, key lookup, properties, vectors.
//!
//! Reads resolve in layers: the transaction's own staging delta, then MVCC
//! version chains at the read horizon, then the shared delta, then the
//! snapshot. Handle-based variants read at the transaction's horizon;
//! `_db` variants read the newest committed state.

use std::collections::HashMap;

use crate::core::wal::record::*;
use crate::error::{RayError, Result};
use crate::graph::db::GraphDB;
use crate::graph::tx::{TxHandle, TxState};
use crate::mvcc::TxKey;
use crate::types::*;
use crate::vector::store::vector_store_get;

// ============================================================================
// Options
// ============================================================================

/// Options for creating a node.
#[derive(Debug, Default, Clone)]
pub struct NodeOpts {
  pub key: Option<String>,
  pub labels: Vec<LabelId>,
  pub props: Vec<(PropKeyId, PropValue)>,
}

impl NodeOpts {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_key(mut self, key: impl Into<String>) -> Self {
    self.key = Some(key.into());
    self
  }

  pub fn with_label(mut self, label: LabelId) -> Self {
    self.labels.push(label);
    self
  }

  pub fn with_prop(mut self, propkey: PropKeyId, value: PropValue) -> Self {
    self.props.push((propkey, value));
    self
  }
}

// ============================================================================
// Internal merged reads
// ============================================================================

pub(crate) fn node_exists_at(db: &GraphDB, tx: Option<&TxState>, node_id: NodeId) -> bool {
  if let Some(tx) = tx {
    if tx.pending.is_node_deleted(node_id) {
      return false;
    }
    if tx.pending.is_node_created(node_id) {
      return true;
    }
  }

  let (txid, read_ts) = db.read_horizon(tx);
  if let Some(mvcc) = db.mvcc.as_ref() {
    db.record_read(txid, TxKey::node(node_id));
    if let Some(visible) = mvcc.versions.lock().presence_at(TxKey::node(node_id), read_ts) {
      return visible;
    }
  }

  node_exists_base(db, node_id)
}

/// Existence in shared delta + snapshot only (no tx staging, no chains).
pub(crate) fn node_exists_base(db: &GraphDB, node_id: NodeId) -> bool {
  {
    let delta = db.delta.read();
    if delta.is_node_deleted(node_id) {
      return false;
    }
    if delta.is_node_created(node_id) {
      return true;
    }
  }
  db.snapshot
    .read()
    .as_ref()
    .is_some_and(|s| s.has_node(node_id))
}

/// MVCC-aware existence without a transaction's staging area; used by
/// iterators that captured `(txid, read_ts)` at construction.
pub(crate) fn node_visible_at(db: &GraphDB, txid: TxId, read_ts: Timestamp, node_id: NodeId) -> bool {
  if let Some(mvcc) = db.mvcc.as_ref() {
    db.record_read(txid, TxKey::node(node_id));
    if let Some(visible) = mvcc.versions.lock().presence_at(TxKey::node(node_id), read_ts) {
      return visible;
    }
  }
  node_exists_base(db, node_id)
}

pub(crate) fn get_node_by_key_at(db: &GraphDB, tx: Option<&TxState>, key: &str) -> Option<NodeId> {
  if let Some(tx) = tx {
    if let Some(node_id) = tx.pending.node_by_key(key) {
      if !tx.pending.is_node_deleted(node_id) {
        return Some(node_id);
      }
      return None;
    }
    if tx.pending.is_key_deleted(key) {
      return None;
    }
  }

  let cacheable = tx.is_none();
  if cacheable {
    if let Some(cached) = db.cache_lookup(key) {
      return cached.filter(|&node_id| node_exists_at(db, tx, node_id));
    }
  }

  let found = lookup_key_uncached(db, tx, key);
  if cacheable {
    db.cache_store(key, found);
  }
  found
}

fn lookup_key_uncached(db: &GraphDB, tx: Option<&TxState>, key: &str) -> Option<NodeId> {
  {
    let delta = db.delta.read();
    if let Some(node_id) = delta.node_by_key(key) {
      drop(delta);
      return node_exists_at(db, tx, node_id).then_some(node_id);
    }
    if delta.is_key_deleted(key) {
      return None;
    }
  }

  let candidate = {
    let snapshot = db.snapshot.read();
    snapshot.as_ref().and_then(|s| s.lookup_by_key(key))
  }?;
  node_exists_at(db, tx, candidate).then_some(candidate)
}

pub(crate) fn node_prop_at(
  db: &GraphDB,
  tx: Option<&TxState>,
  node_id: NodeId,
  propkey: PropKeyId,
) -> Option<PropValue> {
  if !node_exists_at(db, tx, node_id) {
    return None;
  }

  // Vector-valued properties live in the vector stores.
  if let Some(tx) = tx {
    if let Some(op) = tx.pending.pending_vectors.get(&(node_id, propkey)) {
      return op.clone().map(PropValue::VectorF32);
    }
  }
  {
    let stores = db.vectors.read();
    if let Some(store) = stores.get(&propkey) {
      if let Some(vector) = vector_store_get(store, node_id) {
        return Some(PropValue::VectorF32(vector));
      }
    }
  }

  if let Some(tx) = tx {
    if let Some(value) = tx.pending.node_prop(node_id, propkey) {
      return value.cloned();
    }
  }

  let (txid, read_ts) = db.read_horizon(tx);
  if let Some(mvcc) = db.mvcc.as_ref() {
    let key = TxKey::node_prop(node_id, propkey);
    db.record_read(txid, key);
    if let Some(value) = mvcc.versions.lock().prop_at(key, read_ts) {
      return value.map(|arc| (*arc).clone());
    }
  }

  {
    let delta = db.delta.read();
    if let Some(value) = delta.node_prop(node_id, propkey) {
      return value.cloned();
    }
  }

  let snapshot = db.snapshot.read();
  let snapshot = snapshot.as_ref()?;
  let phys = snapshot.phys_node(node_id)?;
  snapshot.node_prop(phys, propkey)
}

pub(crate) fn node_props_at(
  db: &GraphDB,
  tx: Option<&TxState>,
  node_id: NodeId,
) -> Option<HashMap<PropKeyId, PropValue>> {
  if !node_exists_at(db, tx, node_id) {
    return None;
  }

  // Candidate keys from every layer, then a per-key merged read.
  let mut keys: Vec<PropKeyId> = Vec::new();
  {
    let snapshot = db.snapshot.read();
    if let Some(snapshot) = snapshot.as_ref() {
      if let Some(phys) = snapshot.phys_node(node_id) {
        keys.extend(snapshot.node_props(phys).keys().copied());
      }
    }
  }
  {
    let delta = db.delta.read();
    if let Some(props) = delta.node_props_of(node_id) {
      keys.extend(props.keys().copied());
    }
  }
  if let Some(tx) = tx {
    if let Some(props) = tx.pending.node_props_of(node_id) {
      keys.extend(props.keys().copied());
    }
    keys.extend(
      tx.pending
        .pending_vectors
        .keys()
        .filter(|(n, _)| *n == node_id)
        .map(|(_, pk)| *pk),
    );
  }
  {
    let stores = db.vectors.read();
    keys.extend(
      stores
        .iter()
        .filter(|(_, store)| store.node_to_vector.contains_key(&node_id))
        .map(|(pk, _)| *pk),
    );
  }
  if let Some(mvcc) = db.mvcc.as_ref() {
    // Keys only the chains remember (deleted then compacted away).
    keys.extend(
      mvcc
        .versions
        .lock()
        .node_prop_chain_keys()
        .into_iter()
        .filter(|packed| packed >> 24 == node_id)
        .map(|packed| (packed & 0xffffff) as PropKeyId),
    );
  }
  keys.sort_unstable();
  keys.dedup();

  let mut props = HashMap::with_capacity(keys.len());
  for propkey in keys {
    if let Some(value) = node_prop_at(db, tx, node_id, propkey) {
      props.insert(propkey, value);
    }
  }
  Some(props)
}

/// Labels of a node at the caller's horizon: snapshot set patched by the
/// shared delta, then the transaction's staging.
pub(crate) fn node_labels_at(db: &GraphDB, tx: Option<&TxState>, node_id: NodeId) -> Vec<LabelId> {
  if !node_exists_at(db, tx, node_id) {
    return Vec::new();
  }

  let mut labels: Vec<LabelId> = {
    let snapshot = db.snapshot.read();
    snapshot
      .as_ref()
      .and_then(|s| s.phys_node(node_id).map(|phys| s.node_labels(phys)))
      .unwrap_or_default()
  };

  let apply = |labels: &mut Vec<LabelId>, added: Option<&Vec<LabelId>>, removed: Option<&Vec<LabelId>>| {
    if let Some(removed) = removed {
      labels.retain(|l| !removed.contains(l));
    }
    if let Some(added) = added {
      for &label in added {
        if !labels.contains(&label) {
          labels.push(label);
        }
      }
    }
  };

  {
    let delta = db.delta.read();
    apply(
      &mut labels,
      delta.node_labels_added.get(&node_id),
      delta.node_labels_removed.get(&node_id),
    );
  }
  if let Some(tx) = tx {
    apply(
      &mut labels,
      tx.pending.node_labels_added.get(&node_id),
      tx.pending.node_labels_removed.get(&node_id),
    );
  }

  labels.sort_unstable();
  labels
}

/// The key owned by a node, resolved through staging, delta and snapshot.
pub(crate) fn node_key_at(db: &GraphDB, tx: Option<&TxState>, node_id: NodeId) -> Option<String> {
  if let Some(tx) = tx {
    if let Some(key) = tx.pending.node_key(node_id) {
      return key.map(str::to_string);
    }
  }
  {
    let delta = db.delta.read();
    if let Some(key) = delta.node_key(node_id) {
      return key.map(str::to_string);
    }
  }
  let snapshot = db.snapshot.read();
  let snapshot = snapshot.as_ref()?;
  let phys = snapshot.phys_node(node_id)?;
  snapshot.node_key(phys).map(str::to_string)
}

// ============================================================================
// Transactional operations
// ============================================================================

/// Create a node. Fails with `DuplicateKey` when a live node visible to
/// the transaction already owns the key.
pub fn create_node(handle: &mut TxHandle<'_>, opts: NodeOpts) -> Result<NodeId> {
  handle.require_writable()?;

  if let Some(key) = opts.key.as_deref() {
    if get_node_by_key_at(handle.db, Some(&handle.state), key).is_some() {
      return Err(RayError::DuplicateKey(key.to_string()));
    }
  }

  let node_id = handle.db.alloc_node_id();
  handle.db.record_write(handle.txid(), TxKey::node(node_id));

  handle.push_record(
    WalRecordType::CreateNode,
    build_create_node_payload(node_id, opts.key.as_deref()),
  );
  handle.state.pending.create_node(node_id, opts.key.as_deref());

  for label in opts.labels {
    handle.push_record(
      WalRecordType::AddNodeLabel,
      build_node_label_payload(node_id, label),
    );
    handle.state.pending.add_node_label(node_id, label);
  }

  for (propkey, value) in opts.props {
    set_node_prop(handle, node_id, propkey, value)?;
  }

  Ok(node_id)
}

/// Delete a node and tombstone all of its edges.
pub fn delete_node(handle: &mut TxHandle<'_>, node_id: NodeId) -> Result<()> {
  handle.require_writable()?;

  if !node_exists_at(handle.db, Some(&handle.state), node_id) {
    return Err(RayError::NotFound(format!("node {node_id}")));
  }

  // Project tombstones for every edge the node participates in.
  let out: Vec<(ETypeId, NodeId)> =
    crate::graph::iter::neighbors_out(handle.db, Some(&handle.state), node_id, None).collect();
  for (etype, dst) in out {
    push_edge_delete(handle, node_id, etype, dst);
  }
  let incoming: Vec<(ETypeId, NodeId)> =
    crate::graph::iter::neighbors_in(handle.db, Some(&handle.state), node_id, None).collect();
  for (etype, src) in incoming {
    push_edge_delete(handle, src, etype, node_id);
  }

  // Drop any vectors attached to the node.
  let vector_propkeys: Vec<PropKeyId> = {
    let stores = handle.db.vectors.read();
    stores
      .iter()
      .filter(|(_, store)| store.node_to_vector.contains_key(&node_id))
      .map(|(pk, _)| *pk)
      .collect()
  };
  for propkey in vector_propkeys {
    handle.push_record(
      WalRecordType::DelNodeVector,
      build_del_node_vector_payload(node_id, propkey),
    );
    handle.state.pending.delete_pending_vector(node_id, propkey);
  }

  // The node's key stops resolving with the node.
  if let Some(key) = node_key_at(handle.db, Some(&handle.state), node_id) {
    if !handle.state.pending.is_node_created(node_id) {
      handle.state.pending.tombstone_key(&key);
    }
  }

  handle.db.record_write(handle.txid(), TxKey::node(node_id));
  handle.push_record(WalRecordType::DeleteNode, build_node_id_payload(node_id));
  handle.state.pending.delete_node(node_id);
  Ok(())
}

fn push_edge_delete(handle: &mut TxHandle<'_>, src: NodeId, etype: ETypeId, dst: NodeId) {
  handle
    .db
    .record_write(handle.txid(), TxKey::edge(src, etype, dst));
  handle.push_record(WalRecordType::DelEdge, build_edge_payload(src, etype, dst));
  handle.state.pending.delete_edge(src, etype, dst);
}

/// Assign, replace or clear a node's key.
pub fn set_node_key(handle: &mut TxHandle<'_>, node_id: NodeId, key: Option<&str>) -> Result<()> {
  handle.require_writable()?;

  if !node_exists_at(handle.db, Some(&handle.state), node_id) {
    return Err(RayError::NotFound(format!("node {node_id}")));
  }
  if let Some(key) = key {
    match get_node_by_key_at(handle.db, Some(&handle.state), key) {
      Some(owner) if owner != node_id => {
        return Err(RayError::DuplicateKey(key.to_string()));
      }
      _ => {}
    }
  }

  let old_key = node_key_at(handle.db, Some(&handle.state), node_id);
  handle.db.record_write(handle.txid(), TxKey::node(node_id));
  handle.push_record(
    WalRecordType::SetNodeKey,
    build_set_node_key_payload(node_id, key),
  );
  handle
    .state
    .pending
    .set_node_key(node_id, key, old_key.as_deref());
  Ok(())
}

/// Set a scalar property. Vector values route to the vector store.
pub fn set_node_prop(
  handle: &mut TxHandle<'_>,
  node_id: NodeId,
  propkey: PropKeyId,
  value: PropValue,
) -> Result<()> {
  handle.require_writable()?;

  if let PropValue::VectorF32(vector) = value {
    return set_node_vector(handle, node_id, propkey, &vector);
  }

  if !node_exists_at(handle.db, Some(&handle.state), node_id) {
    return Err(RayError::NotFound(format!("node {node_id}")));
  }

  handle
    .db
    .record_write(handle.txid(), TxKey::node_prop(node_id, propkey));
  handle.push_record(
    WalRecordType::SetNodeProp,
    build_set_node_prop_payload(node_id, propkey, &value),
  );
  handle.state.pending.set_node_prop(node_id, propkey, value);
  Ok(())
}

/// Delete a property. The key enters both the read-set and the write-set,
/// so delete-vs-write races conflict symmetrically.
pub fn del_node_prop(handle: &mut TxHandle<'_>, node_id: NodeId, propkey: PropKeyId) -> Result<()> {
  handle.require_writable()?;

  if !node_exists_at(handle.db, Some(&handle.state), node_id) {
    return Err(RayError::NotFound(format!("node {node_id}")));
  }

  let key = TxKey::node_prop(node_id, propkey);
  handle.db.record_read(handle.txid(), key);
  handle.db.record_write(handle.txid(), key);
  handle.push_record(
    WalRecordType::DelNodeProp,
    build_del_node_prop_payload(node_id, propkey),
  );
  handle.state.pending.delete_node_prop(node_id, propkey);
  Ok(())
}

/// Attach a Float32 vector to a node under a property key.
pub fn set_node_vector(
  handle: &mut TxHandle<'_>,
  node_id: NodeId,
  propkey: PropKeyId,
  vector: &[f32],
) -> Result<()> {
  handle.require_writable()?;

  if !node_exists_at(handle.db, Some(&handle.state), node_id) {
    return Err(RayError::NotFound(format!("node {node_id}")));
  }
  if vector.is_empty() {
    return Err(RayError::InvalidArgument("empty vector".to_string()));
  }
  if vector.iter().any(|v| !v.is_finite()) {
    return Err(RayError::InvalidArgument(
      "vector contains NaN or infinite components".to_string(),
    ));
  }
  {
    let stores = handle.db.vectors.read();
    if let Some(store) = stores.get(&propkey) {
      if store.config.dimensions != vector.len() {
        return Err(RayError::InvalidArgument(format!(
          "vector dimension mismatch: expected {}, got {}",
          store.config.dimensions,
          vector.len()
        )));
      }
    }
  }

  handle
    .db
    .record_write(handle.txid(), TxKey::node_prop(node_id, propkey));
  handle.push_record(
    WalRecordType::SetNodeVector,
    build_set_node_vector_payload(node_id, propkey, vector),
  );
  handle
    .state
    .pending
    .set_pending_vector(node_id, propkey, vector.to_vec());
  Ok(())
}

pub fn del_node_vector(
  handle: &mut TxHandle<'_>,
  node_id: NodeId,
  propkey: PropKeyId,
) -> Result<()> {
  handle.require_writable()?;

  if !node_exists_at(handle.db, Some(&handle.state), node_id) {
    return Err(RayError::NotFound(format!("node {node_id}")));
  }

  let key = TxKey::node_prop(node_id, propkey);
  handle.db.record_read(handle.txid(), key);
  handle.db.record_write(handle.txid(), key);
  handle.push_record(
    WalRecordType::DelNodeVector,
    build_del_node_vector_payload(node_id, propkey),
  );
  handle.state.pending.delete_pending_vector(node_id, propkey);
  Ok(())
}

/// Add a label to a node.
pub fn add_node_label(handle: &mut TxHandle<'_>, node_id: NodeId, label: LabelId) -> Result<()> {
  handle.require_writable()?;
  if !node_exists_at(handle.db, Some(&handle.state), node_id) {
    return Err(RayError::NotFound(format!("node {node_id}")));
  }
  handle.db.record_write(handle.txid(), TxKey::node(node_id));
  handle.push_record(
    WalRecordType::AddNodeLabel,
    build_node_label_payload(node_id, label),
  );
  handle.state.pending.add_node_label(node_id, label);
  Ok(())
}

/// Remove a label from a node.
pub fn remove_node_label(handle: &mut TxHandle<'_>, node_id: NodeId, label: LabelId) -> Result<()> {
  handle.require_writable()?;
  if !node_exists_at(handle.db, Some(&handle.state), node_id) {
    return Err(RayError::NotFound(format!("node {node_id}")));
  }
  handle.db.record_write(handle.txid(), TxKey::node(node_id));
  handle.push_record(
    WalRecordType::DelNodeLabel,
    build_node_label_payload(node_id, label),
  );
  handle.state.pending.remove_node_label(node_id, label);
  Ok(())
}

// ============================================================================
// Handle reads
// ============================================================================

pub fn node_exists(handle: &TxHandle<'_>, node_id: NodeId) -> bool {
  node_exists_at(handle.db, Some(&handle.state), node_id)
}

pub fn get_node_by_key(handle: &TxHandle<'_>, key: &str) -> Option<NodeId> {
  get_node_by_key_at(handle.db, Some(&handle.state), key)
}

pub fn get_node_prop(handle: &TxHandle<'_>, node_id: NodeId, propkey: PropKeyId) -> Option<PropValue> {
  node_prop_at(handle.db, Some(&handle.state), node_id, propkey)
}

pub fn get_node_props(
  handle: &TxHandle<'_>,
  node_id: NodeId,
) -> Option<HashMap<PropKeyId, PropValue>> {
  node_props_at(handle.db, Some(&handle.state), node_id)
}

pub fn get_node_labels(handle: &TxHandle<'_>, node_id: NodeId) -> Vec<LabelId> {
  node_labels_at(handle.db, Some(&handle.state), node_id)
}

pub fn get_node_key(handle: &TxHandle<'_>, node_id: NodeId) -> Option<String> {
  node_key_at(handle.db, Some(&handle.state), node_id)
}

// ============================================================================
// Direct reads (no transaction)
// ============================================================================

pub fn node_exists_db(db: &GraphDB, node_id: NodeId) -> bool {
  node_exists_at(db, None, node_id)
}

pub fn get_node_by_key_db(db: &GraphDB, key: &str) -> Option<NodeId> {
  get_node_by_key_at(db, None, key)
}

pub fn get_node_prop_db(db: &GraphDB, node_id: NodeId, propkey: PropKeyId) -> Option<PropValue> {
  node_prop_at(db, None, node_id, propkey)
}

pub fn get_node_props_db(db: &GraphDB, node_id: NodeId) -> Option<HashMap<PropKeyId, PropValue>> {
  node_props_at(db, None, node_id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::db::{close_graph_db, open_graph_db, OpenOptions};
  use crate::graph::tx::{begin_read_tx, begin_tx, commit, rollback};
  use tempfile::tempdir;

  #[test]
  fn create_and_lookup() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let alice = create_node(&mut tx, NodeOpts::new().with_key("user:alice")).unwrap();
    // Visible inside the transaction before commit.
    assert_eq!(get_node_by_key(&tx, "user:alice"), Some(alice));
    commit(&mut tx).unwrap();

    assert_eq!(get_node_by_key_db(&db, "user:alice"), Some(alice));
    assert!(node_exists_db(&db, alice));
    close_graph_db(db).unwrap();
  }

  #[test]
  fn duplicate_key_rejected() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    create_node(&mut tx, NodeOpts::new().with_key("k")).unwrap();
    commit(&mut tx).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let err = create_node(&mut tx, NodeOpts::new().with_key("k")).unwrap_err();
    assert!(matches!(err, RayError::DuplicateKey(_)));
    rollback(&mut tx).unwrap();
    drop(tx);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn delete_frees_key_for_reuse() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let first = create_node(&mut tx, NodeOpts::new().with_key("k")).unwrap();
    commit(&mut tx).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    delete_node(&mut tx, first).unwrap();
    // Key is free again within the same transaction.
    let second = create_node(&mut tx, NodeOpts::new().with_key("k")).unwrap();
    commit(&mut tx).unwrap();

    assert_ne!(first, second);
    assert!(!node_exists_db(&db, first));
    assert_eq!(get_node_by_key_db(&db, "k"), Some(second));
    close_graph_db(db).unwrap();
  }

  #[test]
  fn delete_missing_node_is_not_found() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    assert!(matches!(
      delete_node(&mut tx, 999),
      Err(RayError::NotFound(_))
    ));
    rollback(&mut tx).unwrap();
    drop(tx);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn props_set_get_delete() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let node = create_node(&mut tx, NodeOpts::new()).unwrap();
    set_node_prop(&mut tx, node, 1, PropValue::I64(30)).unwrap();
    set_node_prop(&mut tx, node, 2, PropValue::String("alice".to_string())).unwrap();
    commit(&mut tx).unwrap();

    assert_eq!(get_node_prop_db(&db, node, 1), Some(PropValue::I64(30)));
    let props = get_node_props_db(&db, node).unwrap();
    assert_eq!(props.len(), 2);

    let mut tx = begin_tx(&db).unwrap();
    del_node_prop(&mut tx, node, 1).unwrap();
    commit(&mut tx).unwrap();

    assert_eq!(get_node_prop_db(&db, node, 1), None);
    assert_eq!(
      get_node_prop_db(&db, node, 2),
      Some(PropValue::String("alice".to_string()))
    );
    close_graph_db(db).unwrap();
  }

  #[test]
  fn vector_round_trip_through_prop_api() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let node = create_node(&mut tx, NodeOpts::new()).unwrap();
    set_node_prop(&mut tx, node, 9, PropValue::VectorF32(vec![1.0, 0.5])).unwrap();
    commit(&mut tx).unwrap();

    assert_eq!(
      get_node_prop_db(&db, node, 9),
      Some(PropValue::VectorF32(vec![1.0, 0.5]))
    );

    // Dimension mismatch surfaces as InvalidArgument.
    let mut tx = begin_tx(&db).unwrap();
    let node2 = create_node(&mut tx, NodeOpts::new()).unwrap();
    let err = set_node_vector(&mut tx, node2, 9, &[1.0, 2.0, 3.0]).unwrap_err();
    assert!(matches!(err, RayError::InvalidArgument(_)));
    rollback(&mut tx).unwrap();
    drop(tx);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn labels_patch_and_merge() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let node = create_node(&mut tx, NodeOpts::new().with_label(2).with_label(1)).unwrap();
    commit(&mut tx).unwrap();

    let tx = begin_read_tx(&db).unwrap();
    assert_eq!(get_node_labels(&tx, node), vec![1, 2]);
    drop(tx);

    let mut tx = begin_tx(&db).unwrap();
    remove_node_label(&mut tx, node, 1).unwrap();
    add_node_label(&mut tx, node, 3).unwrap();
    commit(&mut tx).unwrap();

    let tx = begin_read_tx(&db).unwrap();
    assert_eq!(get_node_labels(&tx, node), vec![2, 3]);
    drop(tx);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn rollback_discards_everything() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let node = create_node(&mut tx, NodeOpts::new().with_key("ghost")).unwrap();
    rollback(&mut tx).unwrap();
    drop(tx);

    assert!(!node_exists_db(&db, node));
    assert_eq!(get_node_by_key_db(&db, "ghost"), None);
    close_graph_db(db).unwrap();
  }
}
