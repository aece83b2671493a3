//! Arena-backed version chains.
//!
//! Chains are newest-first linked lists of pool slots; `prev = -1`
//! terminates a chain. Node and edge presence versions share one
//! struct-of-arrays pool; property versions, the most numerous kind, live
//! in their own pool carrying shared values. Bulk pruning is a linear sweep
//! that rebuilds the pools and remaps heads.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::mvcc::{KeyKind, TxKey};
use crate::types::{PropValue, Timestamp, TxId};

const NIL: i32 = -1;

// ============================================================================
// Pools
// ============================================================================

#[derive(Debug, Default)]
struct PresencePool {
  txid: Vec<TxId>,
  commit_ts: Vec<Timestamp>,
  deleted: Vec<bool>,
  prev: Vec<i32>,
}

impl PresencePool {
  fn push(&mut self, txid: TxId, commit_ts: Timestamp, deleted: bool, prev: i32) -> i32 {
    let idx = self.txid.len() as i32;
    self.txid.push(txid);
    self.commit_ts.push(commit_ts);
    self.deleted.push(deleted);
    self.prev.push(prev);
    idx
  }
}

#[derive(Debug, Default)]
struct PropPool {
  txid: Vec<TxId>,
  commit_ts: Vec<Timestamp>,
  /// `None` is a delete version.
  value: Vec<Option<Arc<PropValue>>>,
  prev: Vec<i32>,
}

impl PropPool {
  fn push(
    &mut self,
    txid: TxId,
    commit_ts: Timestamp,
    value: Option<Arc<PropValue>>,
    prev: i32,
  ) -> i32 {
    let idx = self.txid.len() as i32;
    self.txid.push(txid);
    self.commit_ts.push(commit_ts);
    self.value.push(value);
    self.prev.push(prev);
    idx
  }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Default)]
pub struct VersionStore {
  node_heads: HashMap<u64, i32>,
  edge_heads: HashMap<u64, i32>,
  presence: PresencePool,
  node_prop_heads: HashMap<u64, i32>,
  edge_prop_heads: HashMap<u64, i32>,
  props: PropPool,
}

impl VersionStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn presence_heads(&self, kind: KeyKind) -> &HashMap<u64, i32> {
    match kind {
      KeyKind::Node => &self.node_heads,
      KeyKind::Edge => &self.edge_heads,
      _ => unreachable!("presence chains hold node/edge keys only"),
    }
  }

  fn prop_heads(&self, kind: KeyKind) -> &HashMap<u64, i32> {
    match kind {
      KeyKind::NodeProp => &self.node_prop_heads,
      KeyKind::EdgeProp => &self.edge_prop_heads,
      _ => unreachable!("prop chains hold property keys only"),
    }
  }

  /// Prepend a node/edge existence version.
  pub fn append_presence(&mut self, key: TxKey, exists: bool, txid: TxId, commit_ts: Timestamp) {
    let heads = match key.kind {
      KeyKind::Node => &mut self.node_heads,
      KeyKind::Edge => &mut self.edge_heads,
      _ => unreachable!("presence chains hold node/edge keys only"),
    };
    let prev = heads.get(&key.packed).copied().unwrap_or(NIL);
    let idx = self.presence.push(txid, commit_ts, !exists, prev);
    heads.insert(key.packed, idx);
  }

  /// Prepend a property version; `None` records a delete.
  pub fn append_prop(
    &mut self,
    key: TxKey,
    value: Option<Arc<PropValue>>,
    txid: TxId,
    commit_ts: Timestamp,
  ) {
    let heads = match key.kind {
      KeyKind::NodeProp => &mut self.node_prop_heads,
      KeyKind::EdgeProp => &mut self.edge_prop_heads,
      _ => unreachable!("prop chains hold property keys only"),
    };
    let prev = heads.get(&key.packed).copied().unwrap_or(NIL);
    let idx = self.props.push(txid, commit_ts, value, prev);
    heads.insert(key.packed, idx);
  }

  /// Walk a presence chain at `read_ts`. `None` means the chain has no
  /// opinion (fall through to delta + snapshot).
  pub fn presence_at(&self, key: TxKey, read_ts: Timestamp) -> Option<bool> {
    let mut cursor = *self.presence_heads(key.kind).get(&key.packed)?;
    while cursor != NIL {
      let i = cursor as usize;
      if self.presence.commit_ts[i] <= read_ts {
        return Some(!self.presence.deleted[i]);
      }
      cursor = self.presence.prev[i];
    }
    None
  }

  /// Walk a property chain at `read_ts`. Outer `None` = no opinion; inner
  /// `None` = deleted at that horizon.
  pub fn prop_at(&self, key: TxKey, read_ts: Timestamp) -> Option<Option<Arc<PropValue>>> {
    let mut cursor = *self.prop_heads(key.kind).get(&key.packed)?;
    while cursor != NIL {
      let i = cursor as usize;
      if self.props.commit_ts[i] <= read_ts {
        return Some(self.props.value[i].clone());
      }
      cursor = self.props.prev[i];
    }
    None
  }

  /// Newest version of a key: `(commit_ts, producing txid)`. Conflict
  /// detection only needs the head, chains being newest-first.
  pub fn newest_commit(&self, key: TxKey) -> Option<(Timestamp, TxId)> {
    match key.kind {
      KeyKind::Node | KeyKind::Edge => {
        let idx = *self.presence_heads(key.kind).get(&key.packed)? as usize;
        Some((self.presence.commit_ts[idx], self.presence.txid[idx]))
      }
      KeyKind::NodeProp | KeyKind::EdgeProp => {
        let idx = *self.prop_heads(key.kind).get(&key.packed)? as usize;
        Some((self.props.commit_ts[idx], self.props.txid[idx]))
      }
    }
  }

  pub fn chain_len(&self, key: TxKey) -> usize {
    let mut len = 0;
    match key.kind {
      KeyKind::Node | KeyKind::Edge => {
        let mut cursor = self
          .presence_heads(key.kind)
          .get(&key.packed)
          .copied()
          .unwrap_or(NIL);
        while cursor != NIL {
          len += 1;
          cursor = self.presence.prev[cursor as usize];
        }
      }
      KeyKind::NodeProp | KeyKind::EdgeProp => {
        let mut cursor = self
          .prop_heads(key.kind)
          .get(&key.packed)
          .copied()
          .unwrap_or(NIL);
        while cursor != NIL {
          len += 1;
          cursor = self.props.prev[cursor as usize];
        }
      }
    }
    len
  }

  pub fn version_count(&self) -> usize {
    self.presence.txid.len() + self.props.txid.len()
  }

  // ==========================================================================
  // Chain enumeration
  //
  // Merged readers at an old horizon may need entities that no longer
  // appear in the delta or snapshot (cancelled in place, or folded out by
  // a compaction); the chains are then the only source of candidates.
  // ==========================================================================

  pub fn node_chain_keys(&self) -> Vec<u64> {
    self.node_heads.keys().copied().collect()
  }

  pub fn edge_chain_keys(&self) -> Vec<u64> {
    self.edge_heads.keys().copied().collect()
  }

  pub fn node_prop_chain_keys(&self) -> Vec<u64> {
    self.node_prop_heads.keys().copied().collect()
  }

  pub fn edge_prop_chain_keys(&self) -> Vec<u64> {
    self.edge_prop_heads.keys().copied().collect()
  }

  // ==========================================================================
  // GC sweeps
  // ==========================================================================

  /// Prune versions older than `horizon`, keeping for each chain every
  /// version with `commit_ts >= horizon` plus the newest one below it (the
  /// head-of-horizon a reader at exactly `horizon` still needs). Returns
  /// the number of versions dropped.
  pub fn prune_below(&mut self, horizon: Timestamp) -> usize {
    let before = self.version_count();

    let mut presence = PresencePool::default();
    for heads in [&mut self.node_heads, &mut self.edge_heads] {
      for head in heads.values_mut() {
        let mut kept_tail = NIL;
        let mut new_head = NIL;
        let mut cursor = *head;
        let mut crossed = false;
        while cursor != NIL {
          let i = cursor as usize;
          let below = self.presence.commit_ts[i] < horizon;
          if below && crossed {
            break;
          }
          crossed |= below;
          let idx = presence.push(
            self.presence.txid[i],
            self.presence.commit_ts[i],
            self.presence.deleted[i],
            NIL,
          );
          if kept_tail != NIL {
            presence.prev[kept_tail as usize] = idx;
          } else {
            new_head = idx;
          }
          kept_tail = idx;
          cursor = self.presence.prev[i];
        }
        *head = new_head;
      }
    }
    self.presence = presence;

    let mut props = PropPool::default();
    for heads in [&mut self.node_prop_heads, &mut self.edge_prop_heads] {
      for head in heads.values_mut() {
        let mut kept_tail = NIL;
        let mut new_head = NIL;
        let mut cursor = *head;
        let mut crossed = false;
        while cursor != NIL {
          let i = cursor as usize;
          let below = self.props.commit_ts[i] < horizon;
          if below && crossed {
            break;
          }
          crossed |= below;
          let idx = props.push(
            self.props.txid[i],
            self.props.commit_ts[i],
            self.props.value[i].clone(),
            NIL,
          );
          if kept_tail != NIL {
            props.prev[kept_tail as usize] = idx;
          } else {
            new_head = idx;
          }
          kept_tail = idx;
          cursor = self.props.prev[i];
        }
        *head = new_head;
      }
    }
    self.props = props;

    self.node_heads.retain(|_, head| *head != NIL);
    self.edge_heads.retain(|_, head| *head != NIL);
    self.node_prop_heads.retain(|_, head| *head != NIL);
    self.edge_prop_heads.retain(|_, head| *head != NIL);

    before - self.version_count()
  }

  /// Cut chains deeper than `max_depth` at the first safe point: no
  /// version below the cut may still be the visible version for a reader
  /// at `min_active_ts` or newer. Returns the number of chains cut.
  /// Orphaned slots are reclaimed by the next `prune_below` sweep.
  pub fn truncate_deep(&mut self, max_depth: usize, min_active_ts: Timestamp) -> usize {
    let mut truncated = 0;

    let presence_commit_ts = &self.presence.commit_ts;
    let presence_prev = &mut self.presence.prev;
    for heads in [&self.node_heads, &self.edge_heads] {
      for &head in heads.values() {
        truncated +=
          usize::from(cut_chain(head, presence_commit_ts, presence_prev, max_depth, min_active_ts));
      }
    }

    let prop_commit_ts = &self.props.commit_ts;
    let prop_prev = &mut self.props.prev;
    for heads in [&self.node_prop_heads, &self.edge_prop_heads] {
      for &head in heads.values() {
        truncated +=
          usize::from(cut_chain(head, prop_commit_ts, prop_prev, max_depth, min_active_ts));
      }
    }

    truncated
  }
}

/// Walk one chain; once both (a) `max_depth` entries were kept and (b) an
/// entry visible at `min_active_ts` was kept, sever the link. Returns
/// whether a cut happened.
fn cut_chain(
  head: i32,
  commit_ts: &[Timestamp],
  prev: &mut [i32],
  max_depth: usize,
  min_active_ts: Timestamp,
) -> bool {
  let mut cursor = head;
  let mut depth = 0;
  let mut covered = false;
  while cursor != NIL {
    let i = cursor as usize;
    depth += 1;
    covered |= commit_ts[i] <= min_active_ts;
    if depth >= max_depth && covered && prev[i] != NIL {
      prev[i] = NIL;
      return true;
    }
    cursor = prev[i];
  }
  false
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn presence_visibility_walks_backwards() {
    let mut store = VersionStore::new();
    let key = TxKey::node(1);
    store.append_presence(key, true, 1, 10);
    store.append_presence(key, false, 2, 20);

    assert_eq!(store.presence_at(key, 5), None);
    assert_eq!(store.presence_at(key, 10), Some(true));
    assert_eq!(store.presence_at(key, 19), Some(true));
    assert_eq!(store.presence_at(key, 20), Some(false));
    assert_eq!(store.presence_at(key, 99), Some(false));
  }

  #[test]
  fn prop_visibility_and_tombstones() {
    let mut store = VersionStore::new();
    let key = TxKey::node_prop(1, 7);
    store.append_prop(key, Some(Arc::new(PropValue::I64(1))), 1, 10);
    store.append_prop(key, None, 2, 20);
    store.append_prop(key, Some(Arc::new(PropValue::I64(3))), 3, 30);

    assert_eq!(store.prop_at(key, 9), None);
    assert_eq!(
      store.prop_at(key, 15).unwrap().as_deref(),
      Some(&PropValue::I64(1))
    );
    assert_eq!(store.prop_at(key, 25).unwrap(), None);
    assert_eq!(
      store.prop_at(key, 35).unwrap().as_deref(),
      Some(&PropValue::I64(3))
    );
  }

  #[test]
  fn newest_commit_reads_head() {
    let mut store = VersionStore::new();
    let key = TxKey::edge(1, 1, 2);
    assert_eq!(store.newest_commit(key), None);
    store.append_presence(key, true, 4, 40);
    store.append_presence(key, false, 6, 60);
    assert_eq!(store.newest_commit(key), Some((60, 6)));
  }

  #[test]
  fn prune_keeps_head_of_horizon() {
    let mut store = VersionStore::new();
    let key = TxKey::node(1);
    for ts in 1..=5 {
      store.append_presence(key, ts % 2 == 1, ts, ts * 10);
    }
    assert_eq!(store.chain_len(key), 5);

    // Horizon 35: versions at 40, 50 stay, plus the newest below (30).
    let pruned = store.prune_below(35);
    assert_eq!(pruned, 2);
    assert_eq!(store.chain_len(key), 3);

    // Visibility at and above the horizon is unchanged.
    assert_eq!(store.presence_at(key, 35), Some(true));
    assert_eq!(store.presence_at(key, 45), Some(false));
    assert_eq!(store.presence_at(key, 55), Some(true));
  }

  #[test]
  fn prune_drops_fully_dead_chains() {
    let mut store = VersionStore::new();
    store.append_prop(TxKey::node_prop(1, 1), None, 1, 10);
    // A tombstone below the horizon survives as head-of-horizon.
    assert_eq!(store.prune_below(100), 0);
    assert_eq!(store.chain_len(TxKey::node_prop(1, 1)), 1);
  }

  #[test]
  fn truncate_respects_active_readers() {
    let mut store = VersionStore::new();
    let key = TxKey::node(1);
    for ts in 1..=10 {
      store.append_presence(key, true, ts, ts * 10);
    }

    // Readers at ts >= 50 must keep finding a version; the cut has to keep
    // walking past max_depth until the kept prefix reaches commit 50.
    let cut = store.truncate_deep(3, 50);
    assert_eq!(cut, 1);
    let len = store.chain_len(key);
    assert_eq!(len, 6, "kept prefix must cover the oldest active reader");
    assert_eq!(store.presence_at(key, 50), Some(true));
    assert_eq!(store.presence_at(key, 100), Some(true));
  }

  #[test]
  fn truncate_refuses_unsafe_cut() {
    let mut store = VersionStore::new();
    let key = TxKey::node(1);
    for ts in 1..=10 {
      store.append_presence(key, true, ts, ts * 10);
    }

    // Every version is newer than the oldest reader; no cut is safe,
    // since a reader between two removed versions would fall through to
    // the shared state and see the future.
    assert_eq!(store.truncate_deep(3, 5), 0);
    assert_eq!(store.chain_len(key), 10);
  }
}
