//! Micro-benchmarks for the hot read and write paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::tempdir;

use raydb::graph::db::{open_graph_db, OpenOptions};
use raydb::graph::edges::{add_edge, edge_exists_db};
use raydb::graph::iter::get_neighbors_out_db;
use raydb::graph::nodes::{create_node, get_node_by_key_db, NodeOpts};
use raydb::graph::tx::{begin_tx, commit};
use raydb::types::NodeId;

const NODES: usize = 10_000;
const FANOUT: usize = 8;

fn build_db(dir: &std::path::Path, compact: bool) -> (raydb::GraphDB, Vec<NodeId>) {
  let db = open_graph_db(dir, OpenOptions::new()).unwrap();
  let mut ids = Vec::with_capacity(NODES);

  let mut tx = begin_tx(&db).unwrap();
  for i in 0..NODES {
    ids.push(create_node(&mut tx, NodeOpts::new().with_key(format!("node:{i}"))).unwrap());
  }
  for i in 0..NODES {
    for j in 1..=FANOUT {
      let dst = ids[(i * 31 + j * 7) % NODES];
      if dst != ids[i] {
        add_edge(&mut tx, ids[i], (j % 3) as u32 + 1, dst).unwrap();
      }
    }
  }
  commit(&mut tx).unwrap();

  if compact {
    db.optimize().unwrap();
  }
  (db, ids)
}

fn bench_key_lookup(c: &mut Criterion) {
  let dir = tempdir().unwrap();
  let (db, _ids) = build_db(dir.path(), true);

  let mut i = 0usize;
  c.bench_function("key_lookup_snapshot", |b| {
    b.iter(|| {
      i = (i + 1) % NODES;
      black_box(get_node_by_key_db(&db, &format!("node:{i}")))
    })
  });
}

fn bench_neighbors(c: &mut Criterion) {
  let dir = tempdir().unwrap();
  let (db, ids) = build_db(dir.path(), true);

  let mut i = 0usize;
  c.bench_function("neighbors_out_snapshot", |b| {
    b.iter(|| {
      i = (i + 1) % NODES;
      black_box(get_neighbors_out_db(&db, ids[i], None).len())
    })
  });
}

fn bench_neighbors_delta(c: &mut Criterion) {
  let dir = tempdir().unwrap();
  let (db, ids) = build_db(dir.path(), false);

  let mut i = 0usize;
  c.bench_function("neighbors_out_delta", |b| {
    b.iter(|| {
      i = (i + 1) % NODES;
      black_box(get_neighbors_out_db(&db, ids[i], None).len())
    })
  });
}

fn bench_edge_exists(c: &mut Criterion) {
  let dir = tempdir().unwrap();
  let (db, ids) = build_db(dir.path(), true);

  let mut i = 0usize;
  c.bench_function("edge_exists_snapshot", |b| {
    b.iter(|| {
      i = (i + 1) % NODES;
      let dst = ids[(i * 31 + 7) % NODES];
      black_box(edge_exists_db(&db, ids[i], 2, dst))
    })
  });
}

fn bench_commit(c: &mut Criterion) {
  let dir = tempdir().unwrap();
  let (db, ids) = build_db(dir.path(), true);

  let mut round = 0u64;
  c.bench_function("single_edge_commit", |b| {
    b.iter(|| {
      round += 1;
      let mut tx = begin_tx(&db).unwrap();
      let src = ids[(round as usize * 13) % NODES];
      let dst = ids[(round as usize * 17 + 1) % NODES];
      if src != dst {
        let _ = add_edge(&mut tx, src, 99, dst);
      }
      commit(&mut tx).unwrap();
    })
  });
}

criterion_group!(
  benches,
  bench_key_lookup,
  bench_neighbors,
  bench_neighbors_delta,
  bench_edge_exists,
  bench_commit
);
criterion_main!(benches);
