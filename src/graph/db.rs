//! Database handle and lifecycle.
//!
//! `GraphDB` owns the mmapped snapshot, the shared delta, the WAL backend
//! (segment files in a directory, or the single-file container), the MVCC
//! manager and the schema tables. Opening replays committed WAL records
//! into the delta; closing syncs the WAL and releases the lock file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};

use crate::cache::KeyCache;
use crate::constants::*;
use crate::core::container::{is_container_path, Container};
use crate::core::delta::DeltaState;
use crate::core::manifest::{read_manifest, write_manifest, Manifest, ManifestOptions};
use crate::core::snapshot::reader::{ParseSnapshotOptions, SnapshotData};
use crate::core::wal::reader::{extract_committed, list_segments, max_tx_id, scan_segment};
use crate::core::wal::record::{self, WalRecord, WalRecordType};
use crate::core::wal::writer::WalWriter;
use crate::error::{RayError, Result};
use crate::mvcc::{GcConfig, GcHandle, MvccManager, TxKey};
use crate::types::*;
use crate::util::lock::{FileLock, LockType};
use crate::vector::store::{vector_store_delete, vector_store_insert, VectorStore};
use crate::vector::types::VectorStoreConfig;

// ============================================================================
// Open options
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenOptions {
  pub read_only: bool,
  pub create_if_missing: bool,
  /// Soft cap on WAL bytes before commits demand a checkpoint.
  pub wal_size: usize,
  pub auto_checkpoint: bool,
  /// Delta/snapshot churn ratio that triggers auto-checkpoint, in (0, 1].
  pub checkpoint_threshold: f64,
  pub lock_file: bool,
  /// Fail the open when the lock cannot be taken (as opposed to warning).
  pub require_locking: bool,
  pub mvcc: bool,
  pub gc: GcConfig,
  pub cache: bool,
}

impl Default for OpenOptions {
  fn default() -> Self {
    Self {
      read_only: false,
      create_if_missing: true,
      wal_size: WAL_DEFAULT_SIZE,
      auto_checkpoint: false,
      checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
      lock_file: true,
      require_locking: true,
      mvcc: false,
      gc: GcConfig::default(),
      cache: false,
    }
  }
}

impl OpenOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn read_only(mut self, value: bool) -> Self {
    self.read_only = value;
    self
  }

  pub fn create_if_missing(mut self, value: bool) -> Self {
    self.create_if_missing = value;
    self
  }

  pub fn wal_size(mut self, value: usize) -> Self {
    self.wal_size = value;
    self
  }

  pub fn auto_checkpoint(mut self, value: bool) -> Self {
    self.auto_checkpoint = value;
    self
  }

  pub fn checkpoint_threshold(mut self, value: f64) -> Self {
    self.checkpoint_threshold = value.clamp(f64::MIN_POSITIVE, 1.0);
    self
  }

  pub fn lock_file(mut self, value: bool) -> Self {
    self.lock_file = value;
    self
  }

  pub fn mvcc(mut self, value: bool) -> Self {
    self.mvcc = value;
    self
  }

  pub fn gc(mut self, config: GcConfig) -> Self {
    self.gc = config;
    self
  }

  pub fn cache(mut self, value: bool) -> Self {
    self.cache = value;
    self
  }
}

// ============================================================================
// Backend (directory layout vs single-file container)
// ============================================================================

pub(crate) enum Backend {
  Dir {
    root: PathBuf,
    manifest: Manifest,
    wal: WalWriter,
  },
  Single(Container),
}

impl Backend {
  pub(crate) fn append_commit(&mut self, records: &[WalRecord]) -> Result<()> {
    match self {
      Backend::Dir { wal, .. } => wal.append_commit(records),
      Backend::Single(container) => container.wal_append_commit(records),
    }
  }

  pub(crate) fn would_overflow(&self, additional: usize) -> bool {
    match self {
      Backend::Dir { wal, .. } => wal.would_overflow(additional),
      Backend::Single(container) => container.wal_would_overflow(additional),
    }
  }

  pub(crate) fn wal_bytes(&self) -> u64 {
    match self {
      Backend::Dir { wal, .. } => wal.len(),
      Backend::Single(container) => container.wal_bytes(),
    }
  }

  pub(crate) fn snapshot_gen(&self) -> u64 {
    match self {
      Backend::Dir { manifest, .. } => manifest.snapshot_gen,
      Backend::Single(container) => container.snapshot_generation(),
    }
  }

  pub(crate) fn wal_seq(&self) -> u64 {
    match self {
      Backend::Dir { wal, .. } => wal.seq(),
      Backend::Single(_) => 0,
    }
  }

  fn sync(&mut self) -> Result<()> {
    match self {
      Backend::Dir { wal, .. } => wal.sync(),
      Backend::Single(container) => container.sync(),
    }
  }
}

// ============================================================================
// Schema tables
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct SchemaMaps {
  pub label_names: HashMap<String, LabelId>,
  pub label_ids: HashMap<LabelId, String>,
  pub etype_names: HashMap<String, ETypeId>,
  pub etype_ids: HashMap<ETypeId, String>,
  pub propkey_names: HashMap<String, PropKeyId>,
  pub propkey_ids: HashMap<PropKeyId, String>,
}

// ============================================================================
// GraphDB
// ============================================================================

pub struct GraphDB {
  pub(crate) path: PathBuf,
  pub(crate) read_only: bool,
  pub(crate) options: OpenOptions,

  pub(crate) backend: Mutex<Backend>,
  pub(crate) snapshot: RwLock<Option<Arc<SnapshotData>>>,
  pub(crate) delta: RwLock<DeltaState>,
  pub(crate) vectors: RwLock<HashMap<PropKeyId, VectorStore>>,
  pub(crate) schema: RwLock<SchemaMaps>,

  pub(crate) mvcc: Option<Arc<MvccManager>>,
  gc_handle: Option<GcHandle>,
  pub(crate) key_cache: Option<Mutex<KeyCache>>,

  next_node_id: AtomicU64,
  next_label_id: AtomicU32,
  next_etype_id: AtomicU32,
  next_propkey_id: AtomicU32,
  next_tx_id: AtomicU64,

  /// Threads with an open write transaction (one each).
  pub(crate) write_tx_threads: Mutex<std::collections::HashSet<ThreadId>>,
  /// Serializes WAL publication and compaction.
  pub(crate) commit_lock: Mutex<()>,
  pub(crate) compacting: AtomicBool,

  _lock: Option<FileLock>,
}

impl std::fmt::Debug for GraphDB {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GraphDB")
      .field("path", &self.path)
      .field("read_only", &self.read_only)
      .finish_non_exhaustive()
  }
}

impl GraphDB {
  // ==========================================================================
  // ID allocation
  // ==========================================================================

  pub fn alloc_node_id(&self) -> NodeId {
    self.next_node_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn alloc_label_id(&self) -> LabelId {
    self.next_label_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn alloc_etype_id(&self) -> ETypeId {
    self.next_etype_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn alloc_propkey_id(&self) -> PropKeyId {
    self.next_propkey_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn alloc_tx_id(&self) -> TxId {
    self.next_tx_id.fetch_add(1, Ordering::SeqCst)
  }

  pub(crate) fn sync_next_tx_id(&self, at_least: TxId) {
    self.next_tx_id.fetch_max(at_least, Ordering::SeqCst);
  }

  pub fn peek_next_node_id(&self) -> NodeId {
    self.next_node_id.load(Ordering::SeqCst)
  }

  pub(crate) fn peek_next_tx_id(&self) -> TxId {
    self.next_tx_id.load(Ordering::SeqCst)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn is_read_only(&self) -> bool {
    self.read_only
  }

  pub fn mvcc_enabled(&self) -> bool {
    self.mvcc.is_some()
  }

  // ==========================================================================
  // Schema lookups
  // ==========================================================================

  pub fn label_id(&self, name: &str) -> Option<LabelId> {
    self.schema.read().label_names.get(name).copied()
  }

  pub fn label_name(&self, id: LabelId) -> Option<String> {
    self.schema.read().label_ids.get(&id).cloned()
  }

  pub fn etype_id(&self, name: &str) -> Option<ETypeId> {
    self.schema.read().etype_names.get(name).copied()
  }

  pub fn etype_name(&self, id: ETypeId) -> Option<String> {
    self.schema.read().etype_ids.get(&id).cloned()
  }

  pub fn propkey_id(&self, name: &str) -> Option<PropKeyId> {
    self.schema.read().propkey_names.get(name).copied()
  }

  pub fn propkey_name(&self, id: PropKeyId) -> Option<String> {
    self.schema.read().propkey_ids.get(&id).cloned()
  }

  // ==========================================================================
  // MVCC helpers
  // ==========================================================================

  /// `(txid, read horizon)` for a read: a transaction reads at its own
  /// start timestamp, everything else at the newest committed state.
  pub(crate) fn read_horizon(&self, tx: Option<&crate::graph::tx::TxState>) -> (TxId, Timestamp) {
    match (self.mvcc.as_ref(), tx) {
      (Some(_), Some(tx)) => (tx.txid, tx.start_ts),
      (Some(mvcc), None) => (0, mvcc.tx_manager.lock().read_ts()),
      _ => (0, 0),
    }
  }

  pub(crate) fn record_read(&self, txid: TxId, key: TxKey) {
    if txid == 0 {
      return;
    }
    if let Some(mvcc) = self.mvcc.as_ref() {
      mvcc.tx_manager.lock().record_read(txid, key);
    }
  }

  pub(crate) fn record_write(&self, txid: TxId, key: TxKey) {
    if txid == 0 {
      return;
    }
    if let Some(mvcc) = self.mvcc.as_ref() {
      mvcc.tx_manager.lock().record_write(txid, key);
    }
  }

  // ==========================================================================
  // Cache helpers
  // ==========================================================================

  pub(crate) fn cache_lookup(&self, key: &str) -> Option<Option<NodeId>> {
    self.key_cache.as_ref()?.lock().get(key)
  }

  pub(crate) fn cache_store(&self, key: &str, value: Option<NodeId>) {
    if let Some(cache) = self.key_cache.as_ref() {
      cache.lock().insert(key, value);
    }
  }

  pub(crate) fn cache_invalidate(&self, key: &str) {
    if let Some(cache) = self.key_cache.as_ref() {
      cache.lock().invalidate(key);
    }
  }

  pub(crate) fn cache_clear(&self) {
    if let Some(cache) = self.key_cache.as_ref() {
      cache.lock().clear();
    }
  }

  // ==========================================================================
  // Compaction surface
  // ==========================================================================

  /// Whether the delta has outgrown the snapshot per the configured ratio.
  pub fn should_checkpoint(&self) -> bool {
    let churn = self.delta.read().churn();
    if churn == 0 {
      return false;
    }
    let base = {
      let snapshot = self.snapshot.read();
      snapshot
        .as_ref()
        .map(|s| (s.header.num_nodes + s.header.num_edges) as usize)
        .unwrap_or(0)
        .max(COMPACT_MIN_BASE)
    };
    churn as f64 >= self.options.checkpoint_threshold * base as f64
  }

  /// Fold the delta into a new snapshot generation and truncate the WAL.
  pub fn optimize(&self) -> Result<()> {
    crate::core::compactor::compact(self)?;
    Ok(())
  }

  pub(crate) fn maybe_auto_checkpoint(&self) {
    if !self.options.auto_checkpoint || !self.should_checkpoint() {
      return;
    }
    if let Err(e) = crate::core::compactor::compact(self) {
      log::warn!("auto-checkpoint failed: {e}");
    }
  }

  // ==========================================================================
  // Stats
  // ==========================================================================

  pub fn stats(&self) -> DbStats {
    let (snapshot_gen, wal_seq, wal_bytes) = {
      let backend = self.backend.lock();
      (backend.snapshot_gen(), backend.wal_seq(), backend.wal_bytes())
    };

    let (snapshot_nodes, snapshot_edges, snapshot_max_node_id) = {
      let snapshot = self.snapshot.read();
      snapshot
        .as_ref()
        .map(|s| (s.header.num_nodes, s.header.num_edges, s.header.max_node_id))
        .unwrap_or((0, 0, 0))
    };

    let (created, deleted, added, removed) = {
      let delta = self.delta.read();
      (
        delta.created_nodes.len(),
        delta.deleted_nodes.len(),
        delta.edges_added(),
        delta.edges_deleted(),
      )
    };

    DbStats {
      snapshot_gen,
      snapshot_nodes,
      snapshot_edges,
      snapshot_max_node_id,
      delta_nodes_created: created,
      delta_nodes_deleted: deleted,
      delta_edges_added: added,
      delta_edges_deleted: removed,
      wal_seq,
      wal_bytes,
      recommend_compact: self.should_checkpoint(),
      mvcc: self.mvcc.as_ref().map(|mvcc| {
        let tx_manager = mvcc.tx_manager.lock();
        mvcc.gc.lock().stats(&tx_manager)
      }),
    }
  }
}

// ============================================================================
// Open / close
// ============================================================================

/// Open a database. A path ending in `.raydb` selects the single-file
/// container; anything else is a directory layout.
pub fn open_graph_db<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<GraphDB> {
  let path = path.as_ref();

  if is_container_path(path) {
    open_single(path, options)
  } else {
    open_dir(path, options)
  }
}

fn acquire_lock(lock_path: &Path, options: &OpenOptions) -> Result<Option<FileLock>> {
  if !options.lock_file {
    return Ok(None);
  }
  let lock_type = if options.read_only {
    LockType::Shared
  } else {
    LockType::Exclusive
  };
  match FileLock::acquire_path(lock_path, lock_type) {
    Ok(lock) => Ok(Some(lock)),
    Err(e) if options.require_locking => Err(e),
    Err(e) => {
      log::warn!("continuing without database lock: {e}");
      Ok(None)
    }
  }
}

fn open_dir(path: &Path, options: OpenOptions) -> Result<GraphDB> {
  if !path.exists() {
    if !options.create_if_missing || options.read_only {
      return Err(RayError::InvalidPath(format!(
        "database does not exist at {}",
        path.display()
      )));
    }
    std::fs::create_dir_all(path)?;
  }
  if !options.read_only {
    std::fs::create_dir_all(path.join(SNAPSHOTS_DIR))?;
    std::fs::create_dir_all(path.join(WAL_DIR))?;
  }

  let lock = acquire_lock(&path.join(LOCK_FILE), &options)?;

  let manifest = match read_manifest(path)? {
    Some(manifest) => {
      check_durable_options(&manifest, &options)?;
      manifest
    }
    None => {
      if options.read_only {
        return Err(RayError::InvalidPath(format!(
          "no manifest at {}",
          path.display()
        )));
      }
      let manifest = Manifest::empty(ManifestOptions {
        mvcc: options.mvcc,
      });
      write_manifest(path, &manifest)?;
      manifest
    }
  };

  // Leftover temp snapshots from an interrupted compaction are garbage.
  if !options.read_only {
    clean_temp_snapshots(path);
  }

  let snapshot = if manifest.snapshot_gen > 0 {
    let snapshot_path = path
      .join(SNAPSHOTS_DIR)
      .join(snapshot_filename(manifest.snapshot_gen));
    match SnapshotData::load(&snapshot_path) {
      Ok(snapshot) => Some(Arc::new(snapshot)),
      Err(e) => {
        log::warn!(
          "failed to load snapshot {}: {e}; continuing from WAL only",
          snapshot_path.display()
        );
        None
      }
    }
  } else {
    None
  };

  // Collect committed WAL records across live segments, oldest first.
  let mut replay: Vec<(TxId, Vec<WalRecord>)> = Vec::new();
  let mut highest_tx = 0;
  for (seq, segment_path) in list_segments(path)? {
    if seq < manifest.wal_floor {
      continue;
    }
    let scan = scan_segment(&segment_path)?;
    highest_tx = highest_tx.max(max_tx_id(&scan.records));
    replay.extend(extract_committed(&scan.records));
  }

  let wal = if options.read_only {
    // Read-only opens never append and must not truncate garbage tails.
    WalWriter::open_readonly(path, manifest.wal_seq)?
  } else {
    WalWriter::open(path, manifest.wal_seq, options.wal_size as u64)?
  };

  let backend = Backend::Dir {
    root: path.to_path_buf(),
    manifest,
    wal,
  };

  finish_open(path.to_path_buf(), options, backend, snapshot, replay, highest_tx, lock)
}

fn open_single(path: &Path, options: OpenOptions) -> Result<GraphDB> {
  let lock_path = PathBuf::from(format!("{}.lock", path.display()));

  if path.exists() {
    let lock = acquire_lock(&lock_path, &options)?;
    let (mut container, scan) = Container::open(path)?;
    check_durable_options(container.manifest(), &options)?;
    container.set_wal_soft_cap(options.wal_size as u64);
    finish_single(path, options, container, scan.records, lock)
  } else {
    if !options.create_if_missing || options.read_only {
      return Err(RayError::InvalidPath(format!(
        "database does not exist at {}",
        path.display()
      )));
    }
    let lock = acquire_lock(&lock_path, &options)?;
    let manifest = Manifest::empty(ManifestOptions {
      mvcc: options.mvcc,
    });
    let mut container = Container::create(path, CONTAINER_WAL_DEFAULT_SIZE, manifest)?;
    container.set_wal_soft_cap(options.wal_size as u64);
    finish_single(path, options, container, Vec::new(), lock)
  }
}

fn finish_single(
  path: &Path,
  options: OpenOptions,
  container: Container,
  records: Vec<WalRecord>,
  lock: Option<FileLock>,
) -> Result<GraphDB> {
  let snapshot = match container.map_snapshot()? {
    Some((mmap, offset)) => {
      match SnapshotData::parse(mmap, offset, &ParseSnapshotOptions::default()) {
        Ok(snapshot) => Some(Arc::new(snapshot)),
        Err(e) => {
          log::warn!("failed to parse embedded snapshot: {e}; continuing from WAL only");
          None
        }
      }
    }
    None => None,
  };

  let highest_tx = max_tx_id(&records);
  let replay = extract_committed(&records);
  let backend = Backend::Single(container);
  finish_open(path.to_path_buf(), options, backend, snapshot, replay, highest_tx, lock)
}

/// Durable options recorded in the manifest must match the reopen request:
/// flipping MVCC on a database whose WAL and version history were produced
/// under the other mode is not supported.
fn check_durable_options(manifest: &Manifest, options: &OpenOptions) -> Result<()> {
  if manifest.options.mvcc != options.mvcc {
    return Err(RayError::InvalidArgument(format!(
      "database was created with mvcc={}, reopen requested mvcc={}",
      manifest.options.mvcc, options.mvcc
    )));
  }
  Ok(())
}

fn clean_temp_snapshots(path: &Path) {
  let dir = path.join(SNAPSHOTS_DIR);
  let Ok(entries) = std::fs::read_dir(&dir) else {
    return;
  };
  for entry in entries.flatten() {
    let p = entry.path();
    if p.extension().is_some_and(|ext| ext == "tmp") {
      let _ = std::fs::remove_file(&p);
    }
  }
}

fn finish_open(
  path: PathBuf,
  options: OpenOptions,
  backend: Backend,
  snapshot: Option<Arc<SnapshotData>>,
  replay: Vec<(TxId, Vec<WalRecord>)>,
  highest_tx: TxId,
  lock: Option<FileLock>,
) -> Result<GraphDB> {
  let mut schema = SchemaMaps::default();
  let mut next_node_id = INITIAL_NODE_ID;
  let mut next_label_id = INITIAL_LABEL_ID;
  let mut next_etype_id = INITIAL_ETYPE_ID;
  let mut next_propkey_id = INITIAL_PROPKEY_ID;

  // Schema and vector stores carried by the snapshot.
  let mut vectors: HashMap<PropKeyId, VectorStore> = HashMap::new();
  if let Some(snapshot) = snapshot.as_ref() {
    // Allocators resume past the highest id ever assigned; seeding from a
    // count would re-issue ids left unused by aborted definitions.
    next_node_id = snapshot.header.max_node_id + 1;
    next_label_id = snapshot.header.max_label_id + 1;
    next_etype_id = snapshot.header.max_etype_id + 1;
    next_propkey_id = snapshot.header.max_propkey_id + 1;

    for id in 1..=snapshot.header.max_label_id {
      if let Some(name) = snapshot.label_name(id) {
        schema.label_names.insert(name.to_string(), id);
        schema.label_ids.insert(id, name.to_string());
      }
    }
    for id in 1..=snapshot.header.max_etype_id {
      if let Some(name) = snapshot.etype_name(id) {
        schema.etype_names.insert(name.to_string(), id);
        schema.etype_ids.insert(id, name.to_string());
      }
    }
    for id in 1..=snapshot.header.max_propkey_id {
      if let Some(name) = snapshot.propkey_name(id) {
        schema.propkey_names.insert(name.to_string(), id);
        schema.propkey_ids.insert(id, name.to_string());
      }
    }

    for (propkey, blob) in snapshot.vector_store_blobs() {
      match crate::vector::serialize::deserialize_store(blob) {
        Ok(store) => {
          vectors.insert(propkey, store);
        }
        Err(e) => {
          log::warn!("failed to load vector store for propkey {propkey}: {e}");
        }
      }
    }
  }

  // Replay committed transactions into the delta, in commit order.
  let mut delta = DeltaState::new();
  for (_txid, records) in replay {
    for record in records {
      replay_record(
        &record,
        &mut delta,
        &mut schema,
        &mut next_node_id,
        &mut next_label_id,
        &mut next_etype_id,
        &mut next_propkey_id,
      );
    }
  }

  // Vector operations recovered from the WAL land in the stores now.
  for ((node_id, propkey), operation) in std::mem::take(&mut delta.pending_vectors) {
    match operation {
      Some(vector) => {
        let store = vectors
          .entry(propkey)
          .or_insert_with(|| VectorStore::new(VectorStoreConfig::new(vector.len())));
        if let Err(e) = vector_store_insert(store, node_id, &vector) {
          log::warn!("dropping recovered vector for node {node_id}: {e}");
        }
      }
      None => {
        if let Some(store) = vectors.get_mut(&propkey) {
          vector_store_delete(store, node_id);
        }
      }
    }
  }

  let mvcc = if options.mvcc {
    let manager = Arc::new(MvccManager::new(options.gc.clone()));
    manager.tx_manager.lock().seed_tx_id(highest_tx + 1);
    Some(manager)
  } else {
    None
  };

  let gc_handle = match (&mvcc, options.read_only) {
    (Some(manager), false) if options.gc.interval_ms > 0 => {
      Some(GcHandle::spawn(Arc::clone(manager), options.gc.interval_ms)?)
    }
    _ => None,
  };

  let key_cache = options.cache.then(|| Mutex::new(KeyCache::new()));

  Ok(GraphDB {
    path,
    read_only: options.read_only,
    backend: Mutex::new(backend),
    snapshot: RwLock::new(snapshot),
    delta: RwLock::new(delta),
    vectors: RwLock::new(vectors),
    schema: RwLock::new(schema),
    mvcc,
    gc_handle,
    key_cache,
    next_node_id: AtomicU64::new(next_node_id),
    next_label_id: AtomicU32::new(next_label_id),
    next_etype_id: AtomicU32::new(next_etype_id),
    next_propkey_id: AtomicU32::new(next_propkey_id),
    next_tx_id: AtomicU64::new(highest_tx + 1),
    write_tx_threads: Mutex::new(std::collections::HashSet::new()),
    commit_lock: Mutex::new(()),
    compacting: AtomicBool::new(false),
    _lock: lock,
    options,
  })
}

/// Apply one committed WAL record to the recovery delta and schema tables.
fn replay_record(
  rec: &WalRecord,
  delta: &mut DeltaState,
  schema: &mut SchemaMaps,
  next_node_id: &mut NodeId,
  next_label_id: &mut LabelId,
  next_etype_id: &mut ETypeId,
  next_propkey_id: &mut PropKeyId,
) {
  let dropped = match rec.record_type {
    WalRecordType::CreateNode => match record::parse_create_node_payload(&rec.payload) {
      Some(data) => {
        delta.create_node(data.node_id, data.key.as_deref());
        *next_node_id = (*next_node_id).max(data.node_id + 1);
        false
      }
      None => true,
    },
    WalRecordType::DeleteNode => match record::parse_node_id_payload(&rec.payload) {
      Some(node_id) => {
        delta.delete_node(node_id);
        false
      }
      None => true,
    },
    WalRecordType::SetNodeKey => match record::parse_set_node_key_payload(&rec.payload) {
      Some(data) => {
        let old_key = delta.node_key(data.node_id).flatten().map(str::to_string);
        delta.set_node_key(data.node_id, data.key.as_deref(), old_key.as_deref());
        false
      }
      None => true,
    },
    WalRecordType::AddEdge => match record::parse_edge_payload(&rec.payload) {
      Some(edge) => {
        delta.add_edge(edge.src, edge.etype, edge.dst);
        false
      }
      None => true,
    },
    WalRecordType::DelEdge => match record::parse_edge_payload(&rec.payload) {
      Some(edge) => {
        delta.delete_edge(edge.src, edge.etype, edge.dst);
        false
      }
      None => true,
    },
    WalRecordType::SetNodeProp => match record::parse_node_prop_payload(&rec.payload, true) {
      Some(data) => match data.value {
        Some(value) => {
          delta.set_node_prop(data.node_id, data.propkey, value);
          false
        }
        None => true,
      },
      None => true,
    },
    WalRecordType::DelNodeProp => match record::parse_node_prop_payload(&rec.payload, false) {
      Some(data) => {
        delta.delete_node_prop(data.node_id, data.propkey);
        false
      }
      None => true,
    },
    WalRecordType::SetEdgeProp => match record::parse_edge_prop_payload(&rec.payload, true) {
      Some(data) => match data.value {
        Some(value) => {
          delta.set_edge_prop(data.src, data.etype, data.dst, data.propkey, value);
          false
        }
        None => true,
      },
      None => true,
    },
    WalRecordType::DelEdgeProp => match record::parse_edge_prop_payload(&rec.payload, false) {
      Some(data) => {
        delta.delete_edge_prop(data.src, data.etype, data.dst, data.propkey);
        false
      }
      None => true,
    },
    WalRecordType::AddNodeLabel => match record::parse_node_label_payload(&rec.payload) {
      Some((node_id, label)) => {
        delta.add_node_label(node_id, label);
        false
      }
      None => true,
    },
    WalRecordType::DelNodeLabel => match record::parse_node_label_payload(&rec.payload) {
      Some((node_id, label)) => {
        delta.remove_node_label(node_id, label);
        false
      }
      None => true,
    },
    WalRecordType::DefineLabel => match record::parse_define_payload(&rec.payload) {
      Some(def) => {
        delta.define_label(def.id, &def.name);
        schema.label_names.insert(def.name.clone(), def.id);
        schema.label_ids.insert(def.id, def.name);
        *next_label_id = (*next_label_id).max(def.id + 1);
        false
      }
      None => true,
    },
    WalRecordType::DefineEtype => match record::parse_define_payload(&rec.payload) {
      Some(def) => {
        delta.define_etype(def.id, &def.name);
        schema.etype_names.insert(def.name.clone(), def.id);
        schema.etype_ids.insert(def.id, def.name);
        *next_etype_id = (*next_etype_id).max(def.id + 1);
        false
      }
      None => true,
    },
    WalRecordType::DefinePropkey => match record::parse_define_payload(&rec.payload) {
      Some(def) => {
        delta.define_propkey(def.id, &def.name);
        schema.propkey_names.insert(def.name.clone(), def.id);
        schema.propkey_ids.insert(def.id, def.name);
        *next_propkey_id = (*next_propkey_id).max(def.id + 1);
        false
      }
      None => true,
    },
    WalRecordType::SetNodeVector => match record::parse_node_vector_payload(&rec.payload, true) {
      Some(data) => match data.vector {
        Some(vector) => {
          delta.set_pending_vector(data.node_id, data.propkey, vector);
          false
        }
        None => true,
      },
      None => true,
    },
    WalRecordType::DelNodeVector => match record::parse_node_vector_payload(&rec.payload, false) {
      Some(data) => {
        delta.delete_pending_vector(data.node_id, data.propkey);
        false
      }
      None => true,
    },
    WalRecordType::Begin | WalRecordType::Commit | WalRecordType::Abort | WalRecordType::Checkpoint => {
      false
    }
  };

  if dropped {
    log::warn!(
      "dropping malformed WAL record of type {:?} for tx {}",
      rec.record_type,
      rec.tx_id
    );
  }
}

/// Close a database: syncs the WAL and releases the lock.
pub fn close_graph_db(mut db: GraphDB) -> Result<()> {
  db.gc_handle.take();
  db.backend.lock().sync()?;
  Ok(())
}

/// Publish a rewritten manifest for the directory layout.
pub(crate) fn publish_dir_manifest(root: &Path, manifest: &Manifest) -> Result<()> {
  write_manifest(root, manifest)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn open_new_directory_database() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    assert!(!db.is_read_only());
    assert_eq!(db.stats().snapshot_gen, 0);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn open_missing_without_create_fails() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("absent");
    let err = open_graph_db(&missing, OpenOptions::new().create_if_missing(false)).unwrap_err();
    assert!(matches!(err, RayError::InvalidPath(_)));
  }

  #[test]
  fn second_writer_rejected() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    let err = open_graph_db(dir.path(), OpenOptions::new()).unwrap_err();
    assert!(matches!(err, RayError::AlreadyOpen));
    close_graph_db(db).unwrap();
  }

  #[test]
  fn id_allocation_is_monotonic() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    let a = db.alloc_node_id();
    let b = db.alloc_node_id();
    assert_eq!(b, a + 1);
    close_graph_db(db).unwrap();
  }

  #[test]
  fn open_single_file_database() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.raydb");
    let db = open_graph_db(&path, OpenOptions::new()).unwrap();
    assert!(path.exists());
    close_graph_db(db).unwrap();

    let db = open_graph_db(&path, OpenOptions::new()).unwrap();
    close_graph_db(db).unwrap();
  }

  #[test]
  fn mvcc_mode_cannot_flip_on_reopen() {
    let dir = tempdir().unwrap();
    {
      let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
      close_graph_db(db).unwrap();
    }

    let err = open_graph_db(dir.path(), OpenOptions::new().mvcc(true)).unwrap_err();
    assert!(matches!(err, RayError::InvalidArgument(_)));

    // The recorded mode still opens.
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    close_graph_db(db).unwrap();
  }

  #[test]
  fn mvcc_mode_cannot_flip_on_single_file_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.raydb");
    {
      let db = open_graph_db(&path, OpenOptions::new().mvcc(true)).unwrap();
      close_graph_db(db).unwrap();
    }

    let err = open_graph_db(&path, OpenOptions::new()).unwrap_err();
    assert!(matches!(err, RayError::InvalidArgument(_)));

    let db = open_graph_db(&path, OpenOptions::new().mvcc(true)).unwrap();
    close_graph_db(db).unwrap();
  }
}
