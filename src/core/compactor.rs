//! Compaction: fold the committed delta into a new snapshot generation.
//!
//! The pass freezes writers by holding the commit lock, merges the
//! snapshot with the delta into flat node/edge listings, builds a new
//! snapshot image, publishes it atomically (temp file + rename + directory
//! fsync for the directory layout; the two-hop directory flip for the
//! container), truncates the WAL and clears the delta. A failure before
//! the publish point leaves the previous generation active; leftover temp
//! files are removed at the next open.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::constants::*;
use crate::core::delta::DeltaState;
use crate::core::manifest::{sync_dir, Manifest};
use crate::core::snapshot::reader::{ParseSnapshotOptions, SnapshotData};
use crate::core::snapshot::writer::{build_snapshot, EdgeInput, NodeInput, SnapshotInput};
use crate::core::wal::writer::WalWriter;
use crate::error::{RayError, Result};
use crate::graph::db::{Backend, GraphDB};
use crate::types::*;
use crate::vector::serialize::serialize_store;

#[derive(Debug, Clone, Default)]
pub struct CompactStats {
  pub generation: u64,
  pub num_nodes: u64,
  pub num_edges: u64,
}

struct CompactingGuard<'a>(&'a GraphDB);

impl Drop for CompactingGuard<'_> {
  fn drop(&mut self) {
    self.0.compacting.store(false, Ordering::SeqCst);
  }
}

/// Run one compaction pass. Not re-entrant; concurrent calls fail fast.
pub fn compact(db: &GraphDB) -> Result<CompactStats> {
  if db.is_read_only() {
    return Err(RayError::ReadOnly);
  }
  if db.compacting.swap(true, Ordering::SeqCst) {
    return Err(RayError::Internal("compaction already running".to_string()));
  }
  let _guard = CompactingGuard(db);

  // No further writers are admitted into this pass: committers serialize
  // on the same lock, so the delta below is a frozen view.
  let _commit_guard = db.commit_lock.lock();

  let delta = db.delta.read().clone();
  let snapshot = db.snapshot.read().clone();

  let generation = db.backend.lock().snapshot_gen() + 1;
  let input = collect(db, &delta, snapshot.as_deref(), generation);
  let num_nodes = input.nodes.len() as u64;
  let num_edges = input.edges.len() as u64;
  let image = build_snapshot(input)?;

  // Publish through the backend, swap the mmapped snapshot, drop the
  // folded delta.
  let new_snapshot = {
    let mut backend = db.backend.lock();
    match &mut *backend {
      Backend::Dir {
        root,
        manifest,
        wal,
      } => {
        let snapshots_dir = root.join(SNAPSHOTS_DIR);
        let final_path = snapshots_dir.join(snapshot_filename(generation));
        let tmp_path = snapshots_dir.join(format!("{}.tmp", snapshot_filename(generation)));

        {
          let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
          file.write_all(&image)?;
          file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &final_path)?;
        sync_dir(&snapshots_dir)?;

        // Rotate to a fresh segment; its sequence number is the next tx
        // id, so recovery ordering stays monotonic.
        let new_seq = wal.seq().max(db.peek_next_tx_id());
        let new_manifest = Manifest {
          snapshot_gen: generation,
          wal_seq: new_seq,
          wal_floor: new_seq,
          options: manifest.options.clone(),
        };
        crate::graph::db::publish_dir_manifest(root, &new_manifest)?;

        *wal = WalWriter::create(root, new_seq, db.options.wal_size as u64)?;
        *manifest = new_manifest;

        // Segments below the floor are folded into the snapshot now.
        for (seq, path) in crate::core::wal::reader::list_segments(root)? {
          if seq < new_seq {
            if let Err(e) = std::fs::remove_file(&path) {
              log::warn!("failed to remove old WAL segment {}: {e}", path.display());
            }
          }
        }

        Arc::new(SnapshotData::load(&final_path)?)
      }
      Backend::Single(container) => {
        let mut new_manifest = container.manifest().clone();
        new_manifest.snapshot_gen = generation;
        container.publish_checkpoint(&image, new_manifest)?;

        let (mmap, offset) = container.map_snapshot()?.ok_or_else(|| {
          RayError::Internal("checkpoint published no snapshot".to_string())
        })?;
        Arc::new(SnapshotData::parse(
          mmap,
          offset,
          &ParseSnapshotOptions::default(),
        )?)
      }
    }
  };

  *db.snapshot.write() = Some(new_snapshot);
  db.delta.write().clear();
  db.cache_clear();

  Ok(CompactStats {
    generation,
    num_nodes,
    num_edges,
  })
}

/// Merge the snapshot and the frozen delta into flat build input.
fn collect(
  db: &GraphDB,
  delta: &DeltaState,
  snapshot: Option<&SnapshotData>,
  generation: u64,
) -> SnapshotInput {
  let schema = db.schema.read();
  let labels: HashMap<LabelId, String> = schema
    .label_ids
    .iter()
    .map(|(&id, name)| (id, name.clone()))
    .collect();
  let etypes: HashMap<ETypeId, String> = schema
    .etype_ids
    .iter()
    .map(|(&id, name)| (id, name.clone()))
    .collect();
  let propkeys: HashMap<PropKeyId, String> = schema
    .propkey_ids
    .iter()
    .map(|(&id, name)| (id, name.clone()))
    .collect();
  drop(schema);

  // ---- live node set ----
  let mut node_ids: Vec<NodeId> = Vec::new();
  if let Some(snapshot) = snapshot {
    for phys in 0..snapshot.header.num_nodes as u32 {
      if let Some(node_id) = snapshot.node_id(phys) {
        if !delta.is_node_deleted(node_id) {
          node_ids.push(node_id);
        }
      }
    }
  }
  node_ids.extend(delta.created_nodes.keys().copied());
  node_ids.sort_unstable();
  node_ids.dedup();

  let live: std::collections::HashSet<NodeId> = node_ids.iter().copied().collect();

  // ---- nodes ----
  let mut nodes = Vec::with_capacity(node_ids.len());
  for &node_id in &node_ids {
    let phys = snapshot.and_then(|s| s.phys_node(node_id));

    let key = match delta.node_key(node_id) {
      Some(opinion) => opinion.map(str::to_string),
      None => phys
        .and_then(|p| snapshot.and_then(|s| s.node_key(p)))
        .map(str::to_string),
    };

    let mut labels_set: Vec<LabelId> = phys
      .map(|p| snapshot.map(|s| s.node_labels(p)).unwrap_or_default())
      .unwrap_or_default();
    if let Some(removed) = delta.node_labels_removed.get(&node_id) {
      labels_set.retain(|l| !removed.contains(l));
    }
    if let Some(added) = delta.node_labels_added.get(&node_id) {
      for &label in added {
        if !labels_set.contains(&label) {
          labels_set.push(label);
        }
      }
    }

    let mut props: HashMap<PropKeyId, PropValue> = phys
      .map(|p| snapshot.map(|s| s.node_props(p)).unwrap_or_default())
      .unwrap_or_default();
    if let Some(patch) = delta.node_props_of(node_id) {
      for (&propkey, value) in patch {
        match value {
          Some(value) => {
            props.insert(propkey, value.clone());
          }
          None => {
            props.remove(&propkey);
          }
        }
      }
    }

    nodes.push(NodeInput {
      node_id,
      key,
      labels: labels_set,
      props,
    });
  }

  // ---- edges ----
  let mut edges = Vec::new();
  for &src in &node_ids {
    let merged = merge_out_edges(delta, snapshot, src);
    for (etype, dst) in merged {
      if !live.contains(&dst) {
        continue;
      }

      let mut props: HashMap<PropKeyId, PropValue> = snapshot
        .and_then(|s| {
          let (sp, dp) = (s.phys_node(src)?, s.phys_node(dst)?);
          s.find_out_edge(sp, etype, dp)?;
          Some(s.edge_props(sp, etype, dp))
        })
        .unwrap_or_default();
      if let Some(patch) = delta.edge_props_of(src, etype, dst) {
        for (&propkey, value) in patch {
          match value {
            Some(value) => {
              props.insert(propkey, value.clone());
            }
            None => {
              props.remove(&propkey);
            }
          }
        }
      }

      edges.push(EdgeInput {
        src,
        etype,
        dst,
        props,
      });
    }
  }

  // ---- vector stores ----
  let vector_stores: Vec<(PropKeyId, Vec<u8>)> = db
    .vectors
    .read()
    .iter()
    .map(|(&propkey, store)| (propkey, serialize_store(store)))
    .collect();

  SnapshotInput {
    generation,
    nodes,
    edges,
    labels,
    etypes,
    propkeys,
    vector_stores,
  }
}

/// Snapshot row minus tombstones, plus delta additions, sorted.
fn merge_out_edges(
  delta: &DeltaState,
  snapshot: Option<&SnapshotData>,
  src: NodeId,
) -> Vec<(ETypeId, NodeId)> {
  let mut merged: Vec<(ETypeId, NodeId)> = Vec::new();

  if let Some(snapshot) = snapshot {
    if let Some(phys) = snapshot.phys_node(src) {
      for (etype, dst_phys) in snapshot.iter_out_edges(phys) {
        if let Some(dst) = snapshot.node_id(dst_phys) {
          if !delta.is_edge_deleted(src, etype, dst) {
            merged.push((etype, dst));
          }
        }
      }
    }
  }

  for patch in delta.out_adds(src) {
    merged.push((patch.etype, patch.other));
  }

  merged.sort_unstable();
  merged.dedup();
  merged
}
