//! Durability and recovery behavior: reopen equivalence, WAL tail
//! handling, truncation prefixes and snapshot corruption fallback.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use raydb::core::wal::reader::{extract_committed, scan_segment_bytes};
use raydb::graph::db::{close_graph_db, open_graph_db, OpenOptions};
use raydb::graph::edges::{add_edge, delete_edge, edge_exists_db};
use raydb::graph::iter::{count_edges_db, count_nodes_db, get_neighbors_out_db, list_edges_db};
use raydb::graph::nodes::{
  create_node, delete_node, get_node_by_key_db, get_node_prop_db, set_node_prop, NodeOpts,
};
use raydb::graph::schema::define_propkey;
use raydb::graph::tx::{begin_tx, commit};
use raydb::types::{NodeId, PropValue};

fn wal_segment_path(root: &Path) -> std::path::PathBuf {
  let dir = root.join("wal");
  let mut segments: Vec<_> = std::fs::read_dir(&dir)
    .unwrap()
    .flatten()
    .map(|e| e.path())
    .filter(|p| p.extension().is_some_and(|ext| ext == "wal"))
    .collect();
  segments.sort();
  segments.pop().unwrap()
}

fn copy_db_dir(src: &Path, dst: &Path) {
  std::fs::create_dir_all(dst).unwrap();
  for entry in std::fs::read_dir(src).unwrap().flatten() {
    let from = entry.path();
    let to = dst.join(entry.file_name());
    if from.is_dir() {
      copy_db_dir(&from, &to);
    } else {
      std::fs::copy(&from, &to).unwrap();
    }
  }
}

#[test]
fn scalar_prop_survives_reopen() {
  let dir = tempdir().unwrap();
  let (node, age);
  {
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    let mut tx = begin_tx(&db).unwrap();
    age = define_propkey(&mut tx, "age").unwrap();
    node = create_node(&mut tx, NodeOpts::new().with_key("n")).unwrap();
    set_node_prop(&mut tx, node, age, PropValue::I64(30)).unwrap();
    commit(&mut tx).unwrap();
    drop(tx);
    close_graph_db(db).unwrap();
  }

  let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
  assert_eq!(get_node_prop_db(&db, node, age), Some(PropValue::I64(30)));
  assert_eq!(get_node_by_key_db(&db, "n"), Some(node));
  close_graph_db(db).unwrap();
}

#[test]
fn random_commit_sequence_reopens_identically() {
  let dir = tempdir().unwrap();
  let mut rng = StdRng::seed_from_u64(0x5eed);

  let mut live_nodes: Vec<NodeId> = Vec::new();
  {
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    for round in 0..40i64 {
      let mut tx = begin_tx(&db).unwrap();
      match rng.gen_range(0..5) {
        0 | 1 => {
          let node = create_node(
            &mut tx,
            NodeOpts::new().with_key(format!("key-{round}")),
          )
          .unwrap();
          live_nodes.push(node);
        }
        2 if live_nodes.len() >= 2 => {
          let a = live_nodes[rng.gen_range(0..live_nodes.len())];
          let b = live_nodes[rng.gen_range(0..live_nodes.len())];
          if a != b {
            add_edge(&mut tx, a, 1, b).unwrap();
          }
        }
        3 if !live_nodes.is_empty() => {
          let n = live_nodes[rng.gen_range(0..live_nodes.len())];
          set_node_prop(&mut tx, n, 1, PropValue::I64(round)).unwrap();
        }
        4 if live_nodes.len() > 3 => {
          let idx = rng.gen_range(0..live_nodes.len());
          let n = live_nodes.remove(idx);
          delete_node(&mut tx, n).unwrap();
        }
        _ => {}
      }
      commit(&mut tx).unwrap();
    }

    // Capture the merged view before close.
    let before = observe(&db, &live_nodes);
    close_graph_db(db).unwrap();

    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    let after = observe(&db, &live_nodes);
    assert_eq!(before, after);
    close_graph_db(db).unwrap();
  }
}

fn observe(
  db: &raydb::GraphDB,
  nodes: &[NodeId],
) -> (
  u64,
  u64,
  Vec<(NodeId, bool, Option<PropValue>, Vec<(u32, NodeId)>)>,
  usize,
) {
  let per_node: Vec<_> = nodes
    .iter()
    .map(|&n| {
      (
        n,
        raydb::graph::nodes::node_exists_db(db, n),
        get_node_prop_db(db, n, 1),
        get_neighbors_out_db(db, n, None),
      )
    })
    .collect();
  (
    count_nodes_db(db),
    count_edges_db(db),
    per_node,
    list_edges_db(db, None).len(),
  )
}

#[test]
fn garbage_tail_is_discarded_silently() {
  let dir = tempdir().unwrap();
  let node;
  {
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    let mut tx = begin_tx(&db).unwrap();
    node = create_node(&mut tx, NodeOpts::new().with_key("kept")).unwrap();
    commit(&mut tx).unwrap();
    drop(tx);
    close_graph_db(db).unwrap();
  }

  // Append 100 bytes of garbage to the active segment.
  let segment = wal_segment_path(dir.path());
  let mut bytes = std::fs::read(&segment).unwrap();
  let mut rng = StdRng::seed_from_u64(7);
  bytes.extend((0..100).map(|_| rng.gen::<u8>()));
  std::fs::write(&segment, &bytes).unwrap();

  let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
  assert_eq!(get_node_by_key_db(&db, "kept"), Some(node));
  assert_eq!(count_nodes_db(&db), 1);
  close_graph_db(db).unwrap();
}

#[test]
fn truncation_at_any_offset_yields_a_committed_prefix() {
  let source = tempdir().unwrap();
  {
    let db = open_graph_db(source.path(), OpenOptions::new()).unwrap();
    for i in 0..4 {
      let mut tx = begin_tx(&db).unwrap();
      create_node(&mut tx, NodeOpts::new().with_key(format!("n{i}"))).unwrap();
      commit(&mut tx).unwrap();
    }
    close_graph_db(db).unwrap();
  }

  let segment = wal_segment_path(source.path());
  let full = std::fs::read(&segment).unwrap();

  let scratch = tempdir().unwrap();
  for cut in (0..=full.len()).step_by(13) {
    let copy = scratch.path().join(format!("cut-{cut}"));
    copy_db_dir(source.path(), &copy);
    // The lock file travels with the copy; remove it so the copy opens.
    let _ = std::fs::remove_file(copy.join("lock"));
    let copied_segment = wal_segment_path(&copy);
    std::fs::write(&copied_segment, &full[..cut]).unwrap();

    // Expected state is exactly the committed prefix of the truncated log.
    let expected: Vec<u64> = extract_committed(&scan_segment_bytes(&full[..cut]).records)
      .iter()
      .map(|(txid, _)| *txid)
      .collect();

    let db = open_graph_db(&copy, OpenOptions::new()).unwrap();
    assert_eq!(count_nodes_db(&db) as usize, expected.len());
    for (i, _) in expected.iter().enumerate() {
      assert!(
        get_node_by_key_db(&db, &format!("n{i}")).is_some(),
        "cut {cut}: missing node n{i}"
      );
    }
    close_graph_db(db).unwrap();
  }
}

#[test]
fn corrupt_snapshot_falls_back_to_wal_state() {
  let dir = tempdir().unwrap();
  {
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
    let mut tx = begin_tx(&db).unwrap();
    create_node(&mut tx, NodeOpts::new().with_key("in-snapshot")).unwrap();
    commit(&mut tx).unwrap();
    drop(tx);
    db.optimize().unwrap();

    // One more committed transaction stays in the WAL.
    let mut tx = begin_tx(&db).unwrap();
    create_node(&mut tx, NodeOpts::new().with_key("in-wal")).unwrap();
    commit(&mut tx).unwrap();
    drop(tx);
    close_graph_db(db).unwrap();
  }

  // Flip a byte in the middle of the snapshot file.
  let snapshots = dir.path().join("snapshots");
  let snapshot_path = std::fs::read_dir(&snapshots)
    .unwrap()
    .flatten()
    .map(|e| e.path())
    .find(|p| p.extension().is_some_and(|ext| ext == "gds"))
    .unwrap();
  let mut bytes = std::fs::read(&snapshot_path).unwrap();
  let mid = bytes.len() / 2;
  bytes[mid] ^= 0xff;
  std::fs::write(&snapshot_path, &bytes).unwrap();

  // The database opens without the snapshot: empty base plus WAL records.
  let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();
  assert_eq!(get_node_by_key_db(&db, "in-snapshot"), None);
  assert!(get_node_by_key_db(&db, "in-wal").is_some());
  close_graph_db(db).unwrap();
}

#[test]
fn add_delete_idempotence() {
  let dir = tempdir().unwrap();
  let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

  let mut tx = begin_tx(&db).unwrap();
  let a = create_node(&mut tx, NodeOpts::new()).unwrap();
  let b = create_node(&mut tx, NodeOpts::new()).unwrap();
  commit(&mut tx).unwrap();
  drop(tx);

  // Twice in separate transactions; second add is a no-op.
  for _ in 0..2 {
    let mut tx = begin_tx(&db).unwrap();
    add_edge(&mut tx, a, 1, b).unwrap();
    commit(&mut tx).unwrap();
  }
  assert_eq!(count_edges_db(&db), 1);
  assert!(edge_exists_db(&db, a, 1, b));

  let mut tx = begin_tx(&db).unwrap();
  delete_edge(&mut tx, a, 1, b).unwrap();
  commit(&mut tx).unwrap();
  drop(tx);
  assert_eq!(count_edges_db(&db), 0);

  close_graph_db(db).unwrap();
}

#[test]
fn single_file_reopen_round_trip() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("db.raydb");
  let (a, b);
  {
    let db = open_graph_db(&path, OpenOptions::new()).unwrap();
    let mut tx = begin_tx(&db).unwrap();
    a = create_node(&mut tx, NodeOpts::new().with_key("a")).unwrap();
    b = create_node(&mut tx, NodeOpts::new().with_key("b")).unwrap();
    add_edge(&mut tx, a, 1, b).unwrap();
    commit(&mut tx).unwrap();
    drop(tx);
    close_graph_db(db).unwrap();
  }

  let db = open_graph_db(&path, OpenOptions::new()).unwrap();
  assert!(edge_exists_db(&db, a, 1, b));
  assert_eq!(get_node_by_key_db(&db, "a"), Some(a));

  // A checkpoint, more writes, another reopen.
  db.optimize().unwrap();
  let mut tx = begin_tx(&db).unwrap();
  let c = create_node(&mut tx, NodeOpts::new().with_key("c")).unwrap();
  add_edge(&mut tx, b, 2, c).unwrap();
  commit(&mut tx).unwrap();
  drop(tx);
  close_graph_db(db).unwrap();

  let db = open_graph_db(&path, OpenOptions::new()).unwrap();
  assert_eq!(count_nodes_db(&db), 3);
  assert!(edge_exists_db(&db, b, 2, c));
  assert!(edge_exists_db(&db, a, 1, b));
  close_graph_db(db).unwrap();
}

#[test]
fn full_merge_view_preserved_across_compaction() {
  let dir = tempdir().unwrap();
  let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

  let mut tx = begin_tx(&db).unwrap();
  let alice = create_node(&mut tx, NodeOpts::new().with_key("user:alice")).unwrap();
  let bob = create_node(&mut tx, NodeOpts::new().with_key("user:bob")).unwrap();
  add_edge(&mut tx, alice, 1, bob).unwrap();
  add_edge(&mut tx, bob, 2, alice).unwrap();
  commit(&mut tx).unwrap();
  drop(tx);

  let check = |db: &raydb::GraphDB| {
    assert!(edge_exists_db(db, alice, 1, bob));
    assert!(!edge_exists_db(db, alice, 2, bob));
    assert_eq!(get_neighbors_out_db(db, alice, None), vec![(1, bob)]);
    assert_eq!(
      raydb::graph::iter::get_neighbors_in_db(db, bob, None),
      vec![(1, alice)]
    );
  };

  check(&db);
  db.optimize().unwrap();
  check(&db);

  // Post-compaction mutations overlay the new snapshot.
  let mut tx = begin_tx(&db).unwrap();
  delete_edge(&mut tx, alice, 1, bob).unwrap();
  commit(&mut tx).unwrap();
  assert!(!edge_exists_db(&db, alice, 1, bob));
  assert!(edge_exists_db(&db, bob, 2, alice));

  // Compact again; the deletion is folded in.
  db.optimize().unwrap();
  assert!(!edge_exists_db(&db, alice, 1, bob));
  assert_eq!(count_edges_db(&db), 1);
  drop(tx);
  close_graph_db(db).unwrap();
}
