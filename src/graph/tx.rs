//! Transactions: begin, commit, rollback.
//!
//! Writes are staged in a per-transaction delta plus a WAL record list;
//! nothing is visible to other readers until the `COMMIT` record is durable
//! on disk, after which the staging delta folds into the shared delta and
//! version records are installed for concurrent readers.

use std::sync::Arc;

use crate::core::delta::DeltaState;
use crate::core::wal::record::{WalRecord, WalRecordType};
use crate::error::{RayError, Result};
use crate::graph::db::GraphDB;
use crate::mvcc::{conflict, TxKey};
use crate::types::*;

// ============================================================================
// Transaction state and handle
// ============================================================================

#[derive(Debug)]
pub struct TxState {
  pub txid: TxId,
  pub read_only: bool,
  /// MVCC read horizon; 0 when MVCC is disabled.
  pub start_ts: Timestamp,
  /// Mutations staged by this transaction.
  pub pending: DeltaState,
  /// WAL records in operation order, flushed as one batch at commit.
  pub wal_records: Vec<WalRecord>,
}

impl TxState {
  fn new(txid: TxId, read_only: bool, start_ts: Timestamp) -> Self {
    Self {
      txid,
      read_only,
      start_ts,
      pending: DeltaState::new(),
      wal_records: Vec::new(),
    }
  }
}

/// Handle for an active transaction. Dropping an unfinished handle rolls
/// the transaction back.
pub struct TxHandle<'a> {
  pub(crate) db: &'a GraphDB,
  pub(crate) state: TxState,
  finished: bool,
}

impl<'a> TxHandle<'a> {
  pub fn txid(&self) -> TxId {
    self.state.txid
  }

  pub fn is_read_only(&self) -> bool {
    self.state.read_only
  }

  pub fn is_active(&self) -> bool {
    !self.finished
  }

  pub fn db(&self) -> &'a GraphDB {
    self.db
  }

  pub(crate) fn require_writable(&self) -> Result<()> {
    if self.finished {
      return Err(RayError::NoTransaction);
    }
    if self.state.read_only {
      return Err(RayError::ReadOnly);
    }
    Ok(())
  }

  pub(crate) fn push_record(&mut self, record_type: WalRecordType, payload: Vec<u8>) {
    self
      .state
      .wal_records
      .push(WalRecord::new(record_type, self.state.txid, payload));
  }
}

impl Drop for TxHandle<'_> {
  fn drop(&mut self) {
    if !self.finished {
      finish(self, true);
    }
  }
}

// ============================================================================
// Begin
// ============================================================================

/// Begin a write transaction. One per thread at a time.
pub fn begin_tx(db: &GraphDB) -> Result<TxHandle<'_>> {
  if db.is_read_only() {
    return Err(RayError::ReadOnly);
  }

  let tid = std::thread::current().id();
  {
    let mut threads = db.write_tx_threads.lock();
    if !threads.insert(tid) {
      return Err(RayError::TransactionInProgress);
    }
  }

  let (txid, start_ts) = match db.mvcc.as_ref() {
    Some(mvcc) => {
      let (txid, start_ts) = mvcc.tx_manager.lock().begin_tx();
      db.sync_next_tx_id(txid + 1);
      (txid, start_ts)
    }
    None => (db.alloc_tx_id(), 0),
  };

  Ok(TxHandle {
    db,
    state: TxState::new(txid, false, start_ts),
    finished: false,
  })
}

/// Begin a read-only transaction. Any number may be open concurrently.
pub fn begin_read_tx(db: &GraphDB) -> Result<TxHandle<'_>> {
  let (txid, start_ts) = match db.mvcc.as_ref() {
    Some(mvcc) => mvcc.tx_manager.lock().begin_tx(),
    None => (db.alloc_tx_id(), 0),
  };

  Ok(TxHandle {
    db,
    state: TxState::new(txid, true, start_ts),
    finished: false,
  })
}

// ============================================================================
// Commit
// ============================================================================

/// Commit a transaction: validate conflicts, make the WAL batch durable,
/// publish the staging delta and install version records.
pub fn commit(handle: &mut TxHandle<'_>) -> Result<()> {
  if !handle.is_active() {
    return Err(RayError::NoTransaction);
  }

  if handle.state.read_only {
    finish(handle, true);
    return Ok(());
  }

  let db = handle.db;

  // Empty transactions need no durability.
  if handle.state.wal_records.is_empty() {
    finish(handle, true);
    return Ok(());
  }

  // Assemble the batch up front so WAL capacity can be checked before a
  // commit timestamp is issued.
  let mut batch = Vec::with_capacity(handle.state.wal_records.len() + 2);
  batch.push(WalRecord::new(
    WalRecordType::Begin,
    handle.state.txid,
    Vec::new(),
  ));
  batch.append(&mut handle.state.wal_records);
  batch.push(WalRecord::new(
    WalRecordType::Commit,
    handle.state.txid,
    Vec::new(),
  ));
  let batch_bytes: usize = batch.iter().map(WalRecord::encoded_len).sum();

  // The configured auto-checkpoint rotates the log before the buffer cap
  // turns into a hard error.
  if db.backend.lock().would_overflow(batch_bytes) {
    if db.options.auto_checkpoint {
      crate::core::compactor::compact(db)?;
    }
    if db.backend.lock().would_overflow(batch_bytes) {
      finish(handle, true);
      return Err(RayError::WalBufferFull);
    }
  }

  // Conflict validation and commit-timestamp issuance are atomic with
  // respect to other committers.
  let mut commit_ts = None;
  if let Some(mvcc) = db.mvcc.as_ref() {
    let mut tx_manager = mvcc.tx_manager.lock();
    if let Err(err) = conflict::validate_commit(&tx_manager, handle.state.txid) {
      tx_manager.abort_tx(handle.state.txid);
      drop(tx_manager);
      finish(handle, false);
      return Err(err);
    }
    commit_ts = Some(tx_manager.commit_tx(handle.state.txid)?);
  }

  // Serialize publication: WAL append + fsync, then in-memory installs.
  {
    let _commit_guard = db.commit_lock.lock();
    db.backend.lock().append_commit(&batch)?;

    let mut pending = std::mem::take(&mut handle.state.pending);

    if let Some(ts) = commit_ts {
      install_versions(db, handle.state.txid, ts, &pending);
    }

    publish_schema(db, &pending);
    apply_pending_vectors(db, &pending);
    invalidate_cached_keys(db, &pending);
    // Vector operations are applied to the stores above; carrying them
    // into the shared delta would replay them again at the next open.
    pending.pending_vectors.clear();
    db.delta.write().merge_from(pending);
  }

  finish(handle, false);
  db.maybe_auto_checkpoint();
  Ok(())
}

/// Rollback: discard staged mutations. Nothing reached the WAL or the
/// shared delta, so this is purely in-memory.
pub fn rollback(handle: &mut TxHandle<'_>) -> Result<()> {
  if !handle.is_active() {
    return Err(RayError::NoTransaction);
  }
  finish(handle, true);
  Ok(())
}

/// Tear down transaction bookkeeping. `abort_in_mvcc` is false when the
/// MVCC side was already finalized (committed or explicitly aborted).
fn finish(handle: &mut TxHandle<'_>, abort_in_mvcc: bool) {
  if handle.finished {
    return;
  }
  handle.finished = true;

  let db = handle.db;
  if abort_in_mvcc {
    if let Some(mvcc) = db.mvcc.as_ref() {
      let mut tx_manager = mvcc.tx_manager.lock();
      if tx_manager
        .tx(handle.state.txid)
        .is_some_and(|tx| tx.status == crate::mvcc::TxStatus::Active)
      {
        tx_manager.abort_tx(handle.state.txid);
      }
    }
  }

  if !handle.state.read_only {
    db.write_tx_threads
      .lock()
      .remove(&std::thread::current().id());
  }
}

// ============================================================================
// Publication helpers
// ============================================================================

fn publish_schema(db: &GraphDB, pending: &DeltaState) {
  if pending.new_labels.is_empty()
    && pending.new_etypes.is_empty()
    && pending.new_propkeys.is_empty()
  {
    return;
  }
  let mut schema = db.schema.write();
  for (&id, name) in &pending.new_labels {
    schema.label_names.insert(name.clone(), id);
    schema.label_ids.insert(id, name.clone());
  }
  for (&id, name) in &pending.new_etypes {
    schema.etype_names.insert(name.clone(), id);
    schema.etype_ids.insert(id, name.clone());
  }
  for (&id, name) in &pending.new_propkeys {
    schema.propkey_names.insert(name.clone(), id);
    schema.propkey_ids.insert(id, name.clone());
  }
}

fn apply_pending_vectors(db: &GraphDB, pending: &DeltaState) {
  if pending.pending_vectors.is_empty() {
    return;
  }
  let mut stores = db.vectors.write();
  for ((node_id, propkey), operation) in &pending.pending_vectors {
    match operation {
      Some(vector) => {
        let store = stores.entry(*propkey).or_insert_with(|| {
          crate::vector::store::VectorStore::new(
            crate::vector::types::VectorStoreConfig::new(vector.len()),
          )
        });
        if let Err(e) = crate::vector::store::vector_store_insert(store, *node_id, vector) {
          // Validation already ran at operation time; this is defensive
          // only against dimension drift across a concurrent checkpoint.
          log::warn!("vector for node {node_id} dropped at commit: {e}");
        }
      }
      None => {
        if let Some(store) = stores.get_mut(propkey) {
          crate::vector::store::vector_store_delete(store, *node_id);
        }
      }
    }
  }
}

fn invalidate_cached_keys(db: &GraphDB, pending: &DeltaState) {
  if db.key_cache.is_none() {
    return;
  }
  for key in pending.key_index.keys() {
    db.cache_invalidate(key);
  }
  for key in &pending.key_index_deleted {
    db.cache_invalidate(key);
  }
}

/// Install version records for a committed transaction. A chain that is
/// empty first receives a synthetic base version describing the
/// pre-commit state at timestamp 0, so readers older than this commit
/// keep resolving through the chains after the shared delta moves on.
fn install_versions(db: &GraphDB, txid: TxId, commit_ts: Timestamp, pending: &DeltaState) {
  let Some(mvcc) = db.mvcc.as_ref() else {
    return;
  };
  // With no other transaction active, no reader can ever need the old
  // state: every future start_ts is >= this commit_ts.
  if mvcc.tx_manager.lock().active_count() == 0 {
    return;
  }

  let delta = db.delta.read();
  let snapshot = db.snapshot.read();
  let snapshot = snapshot.as_ref();
  let mut versions = mvcc.versions.lock();

  let node_in_base = |node_id: NodeId| -> bool {
    if delta.is_node_deleted(node_id) {
      return false;
    }
    if delta.is_node_created(node_id) {
      return true;
    }
    snapshot.is_some_and(|s| s.has_node(node_id))
  };

  let edge_in_base = |src: NodeId, etype: ETypeId, dst: NodeId| -> bool {
    if delta.is_edge_deleted(src, etype, dst) {
      return false;
    }
    if delta.is_edge_added(src, etype, dst) {
      return true;
    }
    snapshot.is_some_and(|s| {
      match (s.phys_node(src), s.phys_node(dst)) {
        (Some(sp), Some(dp)) => s.has_edge(sp, etype, dp),
        _ => false,
      }
    })
  };

  let mut presence = |key: TxKey, exists: bool, was: bool| {
    if versions.newest_commit(key).is_none() && was != exists {
      versions.append_presence(key, was, 0, 0);
    }
    versions.append_presence(key, exists, txid, commit_ts);
  };

  for &node_id in pending.created_nodes.keys() {
    presence(TxKey::node(node_id), true, false);
  }
  for &node_id in &pending.deleted_nodes {
    let key = TxKey::node(node_id);
    presence(key, false, node_in_base(node_id));
  }

  for (&src, patches) in &pending.out_add {
    for patch in patches {
      let key = TxKey::edge(src, patch.etype, patch.other);
      presence(key, true, edge_in_base(src, patch.etype, patch.other));
    }
  }
  for (&src, patches) in &pending.out_del {
    for patch in patches {
      let key = TxKey::edge(src, patch.etype, patch.other);
      presence(key, false, edge_in_base(src, patch.etype, patch.other));
    }
  }

  let old_node_prop = |node_id: NodeId, propkey: PropKeyId| -> Option<PropValue> {
    if delta.is_node_deleted(node_id) {
      return None;
    }
    if let Some(value) = delta.node_prop(node_id, propkey) {
      return value.cloned();
    }
    snapshot
      .and_then(|s| s.phys_node(node_id).and_then(|phys| s.node_prop(phys, propkey)))
  };

  for (&node_id, props) in &pending.node_props {
    for (&propkey, value) in props {
      let key = TxKey::node_prop(node_id, propkey);
      if versions.newest_commit(key).is_none() {
        let before = old_node_prop(node_id, propkey).map(Arc::new);
        versions.append_prop(key, before, 0, 0);
      }
      versions.append_prop(key, value.clone().map(Arc::new), txid, commit_ts);
    }
  }

  let old_edge_prop =
    |src: NodeId, etype: ETypeId, dst: NodeId, propkey: PropKeyId| -> Option<PropValue> {
      if delta.is_edge_deleted(src, etype, dst) {
        return None;
      }
      if let Some(value) = delta.edge_prop(src, etype, dst, propkey) {
        return value.cloned();
      }
      snapshot.and_then(|s| {
        let (sp, dp) = (s.phys_node(src)?, s.phys_node(dst)?);
        s.edge_prop(sp, etype, dp, propkey)
      })
    };

  for (&(src, etype, dst), props) in &pending.edge_props {
    for (&propkey, value) in props {
      let key = TxKey::edge_prop(src, etype, dst, propkey);
      if versions.newest_commit(key).is_none() {
        let before = old_edge_prop(src, etype, dst, propkey).map(Arc::new);
        versions.append_prop(key, before, 0, 0);
      }
      versions.append_prop(key, value.clone().map(Arc::new), txid, commit_ts);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::db::{close_graph_db, open_graph_db, OpenOptions};
  use tempfile::tempdir;

  #[test]
  fn begin_commit_empty() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    assert!(tx.is_active());
    commit(&mut tx).unwrap();
    assert!(!tx.is_active());
    drop(tx);

    close_graph_db(db).unwrap();
  }

  #[test]
  fn nested_write_tx_rejected_on_same_thread() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let tx = begin_tx(&db).unwrap();
    assert!(matches!(
      begin_tx(&db),
      Err(RayError::TransactionInProgress)
    ));
    drop(tx);

    // Dropping the handle rolled it back; a new one may start.
    let tx2 = begin_tx(&db).unwrap();
    drop(tx2);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn read_transactions_are_concurrent() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    let a = begin_read_tx(&db).unwrap();
    let b = begin_read_tx(&db).unwrap();
    assert!(a.is_read_only() && b.is_read_only());
    drop((a, b));
    close_graph_db(db).unwrap();
  }

  #[test]
  fn rollback_then_new_tx() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    rollback(&mut tx).unwrap();
    assert!(!tx.is_active());
    assert!(matches!(rollback(&mut tx), Err(RayError::NoTransaction)));
    drop(tx);

    let tx2 = begin_tx(&db).unwrap();
    drop(tx2);
    close_graph_db(db).unwrap();
  }
}
