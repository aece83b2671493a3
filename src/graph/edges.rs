//! Edge operations: add, delete, existence, properties.

use std::collections::HashMap;

use crate::core::wal::record::*;
use crate::error::{RayError, Result};
use crate::graph::db::GraphDB;
use crate::graph::nodes::node_exists_at;
use crate::graph::tx::{TxHandle, TxState};
use crate::mvcc::TxKey;
use crate::types::*;

// ============================================================================
// Internal merged reads
// ============================================================================

pub(crate) fn edge_exists_at(
  db: &GraphDB,
  tx: Option<&TxState>,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
) -> bool {
  if let Some(tx) = tx {
    if tx.pending.is_node_deleted(src) || tx.pending.is_node_deleted(dst) {
      return false;
    }
    if tx.pending.is_edge_deleted(src, etype, dst) {
      return false;
    }
    if tx.pending.is_edge_added(src, etype, dst) {
      return true;
    }
  }

  let (txid, read_ts) = db.read_horizon(tx);
  if let Some(mvcc) = db.mvcc.as_ref() {
    let key = TxKey::edge(src, etype, dst);
    db.record_read(txid, key);
    if let Some(visible) = mvcc.versions.lock().presence_at(key, read_ts) {
      // Edges to deleted endpoints are invisible even without their own
      // tombstone.
      return visible && node_exists_at(db, tx, src) && node_exists_at(db, tx, dst);
    }
  }

  {
    let delta = db.delta.read();
    if delta.is_node_deleted(src) || delta.is_node_deleted(dst) {
      return false;
    }
    if delta.is_edge_deleted(src, etype, dst) {
      return false;
    }
    if delta.is_edge_added(src, etype, dst) {
      return true;
    }
  }

  let snapshot = db.snapshot.read();
  let Some(snapshot) = snapshot.as_ref() else {
    return false;
  };
  match (snapshot.phys_node(src), snapshot.phys_node(dst)) {
    (Some(src_phys), Some(dst_phys)) => snapshot.has_edge(src_phys, etype, dst_phys),
    _ => false,
  }
}

pub(crate) fn edge_prop_at(
  db: &GraphDB,
  tx: Option<&TxState>,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
  propkey: PropKeyId,
) -> Option<PropValue> {
  if !edge_exists_at(db, tx, src, etype, dst) {
    return None;
  }

  if let Some(tx) = tx {
    if let Some(value) = tx.pending.edge_prop(src, etype, dst, propkey) {
      return value.cloned();
    }
  }

  let (txid, read_ts) = db.read_horizon(tx);
  if let Some(mvcc) = db.mvcc.as_ref() {
    let key = TxKey::edge_prop(src, etype, dst, propkey);
    db.record_read(txid, key);
    if let Some(value) = mvcc.versions.lock().prop_at(key, read_ts) {
      return value.map(|arc| (*arc).clone());
    }
  }

  {
    let delta = db.delta.read();
    if let Some(value) = delta.edge_prop(src, etype, dst, propkey) {
      return value.cloned();
    }
  }

  let snapshot = db.snapshot.read();
  let snapshot = snapshot.as_ref()?;
  let (src_phys, dst_phys) = (snapshot.phys_node(src)?, snapshot.phys_node(dst)?);
  snapshot.edge_prop(src_phys, etype, dst_phys, propkey)
}

pub(crate) fn edge_props_at(
  db: &GraphDB,
  tx: Option<&TxState>,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
) -> Option<HashMap<PropKeyId, PropValue>> {
  if !edge_exists_at(db, tx, src, etype, dst) {
    return None;
  }

  let mut keys: Vec<PropKeyId> = Vec::new();
  {
    let snapshot = db.snapshot.read();
    if let Some(snapshot) = snapshot.as_ref() {
      if let (Some(src_phys), Some(dst_phys)) =
        (snapshot.phys_node(src), snapshot.phys_node(dst))
      {
        keys.extend(snapshot.edge_props(src_phys, etype, dst_phys).keys().copied());
      }
    }
  }
  {
    let delta = db.delta.read();
    if let Some(props) = delta.edge_props_of(src, etype, dst) {
      keys.extend(props.keys().copied());
    }
  }
  if let Some(tx) = tx {
    if let Some(props) = tx.pending.edge_props_of(src, etype, dst) {
      keys.extend(props.keys().copied());
    }
  }
  if let Some(mvcc) = db.mvcc.as_ref() {
    let triple = (src << 44) | ((etype as u64) << 32) | (dst << 12);
    keys.extend(
      mvcc
        .versions
        .lock()
        .edge_prop_chain_keys()
        .into_iter()
        .filter(|packed| packed & !0xfff == triple)
        .map(|packed| (packed & 0xfff) as PropKeyId),
    );
  }
  keys.sort_unstable();
  keys.dedup();

  let mut props = HashMap::with_capacity(keys.len());
  for propkey in keys {
    if let Some(value) = edge_prop_at(db, tx, src, etype, dst, propkey) {
      props.insert(propkey, value);
    }
  }
  Some(props)
}

// ============================================================================
// Transactional operations
// ============================================================================

/// Add a directed typed edge. Idempotent: adding an edge already visible
/// to the transaction is a no-op. Fails with `NotFound` when either
/// endpoint is invisible.
pub fn add_edge(handle: &mut TxHandle<'_>, src: NodeId, etype: ETypeId, dst: NodeId) -> Result<()> {
  handle.require_writable()?;

  if !node_exists_at(handle.db, Some(&handle.state), src) {
    return Err(RayError::NotFound(format!("node {src}")));
  }
  if !node_exists_at(handle.db, Some(&handle.state), dst) {
    return Err(RayError::NotFound(format!("node {dst}")));
  }
  if edge_exists_at(handle.db, Some(&handle.state), src, etype, dst) {
    return Ok(());
  }

  handle.db.record_read(handle.txid(), TxKey::node(src));
  handle.db.record_read(handle.txid(), TxKey::node(dst));
  handle
    .db
    .record_write(handle.txid(), TxKey::edge(src, etype, dst));
  handle.push_record(WalRecordType::AddEdge, build_edge_payload(src, etype, dst));
  handle.state.pending.add_edge(src, etype, dst);
  Ok(())
}

/// Delete an edge. Fails with `NotFound` when the edge is invisible.
pub fn delete_edge(
  handle: &mut TxHandle<'_>,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
) -> Result<()> {
  handle.require_writable()?;

  if !edge_exists_at(handle.db, Some(&handle.state), src, etype, dst) {
    return Err(RayError::NotFound(format!("edge {src}-[{etype}]->{dst}")));
  }

  handle
    .db
    .record_write(handle.txid(), TxKey::edge(src, etype, dst));
  handle.push_record(WalRecordType::DelEdge, build_edge_payload(src, etype, dst));
  handle.state.pending.delete_edge(src, etype, dst);
  Ok(())
}

/// Set a scalar property on an edge. Vectors are node-only.
pub fn set_edge_prop(
  handle: &mut TxHandle<'_>,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
  propkey: PropKeyId,
  value: PropValue,
) -> Result<()> {
  handle.require_writable()?;

  if matches!(value, PropValue::VectorF32(_)) {
    return Err(RayError::InvalidArgument(
      "vector properties are not supported on edges".to_string(),
    ));
  }
  if !edge_exists_at(handle.db, Some(&handle.state), src, etype, dst) {
    return Err(RayError::NotFound(format!("edge {src}-[{etype}]->{dst}")));
  }

  handle
    .db
    .record_write(handle.txid(), TxKey::edge_prop(src, etype, dst, propkey));
  handle.push_record(
    WalRecordType::SetEdgeProp,
    build_set_edge_prop_payload(src, etype, dst, propkey, &value),
  );
  handle
    .state
    .pending
    .set_edge_prop(src, etype, dst, propkey, value);
  Ok(())
}

/// Delete an edge property; the key joins both conflict sets.
pub fn del_edge_prop(
  handle: &mut TxHandle<'_>,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
  propkey: PropKeyId,
) -> Result<()> {
  handle.require_writable()?;

  if !edge_exists_at(handle.db, Some(&handle.state), src, etype, dst) {
    return Err(RayError::NotFound(format!("edge {src}-[{etype}]->{dst}")));
  }

  let key = TxKey::edge_prop(src, etype, dst, propkey);
  handle.db.record_read(handle.txid(), key);
  handle.db.record_write(handle.txid(), key);
  handle.push_record(
    WalRecordType::DelEdgeProp,
    build_del_edge_prop_payload(src, etype, dst, propkey),
  );
  handle.state.pending.delete_edge_prop(src, etype, dst, propkey);
  Ok(())
}

// ============================================================================
// Handle reads
// ============================================================================

pub fn edge_exists(handle: &TxHandle<'_>, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
  edge_exists_at(handle.db, Some(&handle.state), src, etype, dst)
}

pub fn get_edge_prop(
  handle: &TxHandle<'_>,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
  propkey: PropKeyId,
) -> Option<PropValue> {
  edge_prop_at(handle.db, Some(&handle.state), src, etype, dst, propkey)
}

pub fn get_edge_props(
  handle: &TxHandle<'_>,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
) -> Option<HashMap<PropKeyId, PropValue>> {
  edge_props_at(handle.db, Some(&handle.state), src, etype, dst)
}

// ============================================================================
// Direct reads (no transaction)
// ============================================================================

pub fn edge_exists_db(db: &GraphDB, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
  edge_exists_at(db, None, src, etype, dst)
}

pub fn get_edge_prop_db(
  db: &GraphDB,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
  propkey: PropKeyId,
) -> Option<PropValue> {
  edge_prop_at(db, None, src, etype, dst, propkey)
}

pub fn get_edge_props_db(
  db: &GraphDB,
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
) -> Option<HashMap<PropKeyId, PropValue>> {
  edge_props_at(db, None, src, etype, dst)
}
