//! Transaction table: ids, timestamps, read/write sets and the
//! wall-clock -> commit-ts sample log used by GC retention.

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};

use crate::constants::INITIAL_TX_ID;
use crate::error::{RayError, Result};
use crate::mvcc::TxKey;
use crate::types::{Timestamp, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
  Active,
  Committed,
  Aborted,
}

#[derive(Debug)]
pub struct TxRecord {
  pub start_ts: Timestamp,
  pub status: TxStatus,
  pub commit_ts: Option<Timestamp>,
  pub read_set: HashSet<TxKey>,
  pub write_set: HashSet<TxKey>,
}

#[derive(Debug)]
pub struct TxManager {
  next_tx_id: TxId,
  /// Logical clock; a transaction starts at the current value and a commit
  /// advances it, so every commit_ts is strictly greater than the start_ts
  /// of the committing transaction.
  clock: Timestamp,
  txs: HashMap<TxId, TxRecord>,
  /// `(wall_ms, commit_ts)` samples, oldest first. Bounded by GC pruning.
  commit_log: VecDeque<(u64, Timestamp)>,
}

impl TxManager {
  pub fn new() -> Self {
    Self {
      next_tx_id: INITIAL_TX_ID,
      clock: 0,
      txs: HashMap::new(),
      commit_log: VecDeque::new(),
    }
  }

  pub fn seed_tx_id(&mut self, next: TxId) {
    self.next_tx_id = self.next_tx_id.max(next);
  }

  /// Begin a transaction; returns `(tx_id, start_ts)`.
  pub fn begin_tx(&mut self) -> (TxId, Timestamp) {
    let tx_id = self.next_tx_id;
    self.next_tx_id += 1;
    let start_ts = self.clock;
    self.txs.insert(
      tx_id,
      TxRecord {
        start_ts,
        status: TxStatus::Active,
        commit_ts: None,
        read_set: HashSet::new(),
        write_set: HashSet::new(),
      },
    );
    (tx_id, start_ts)
  }

  /// Current read horizon for snapshot-less readers.
  pub fn read_ts(&self) -> Timestamp {
    self.clock
  }

  pub fn record_read(&mut self, tx_id: TxId, key: TxKey) {
    if let Some(tx) = self.txs.get_mut(&tx_id) {
      tx.read_set.insert(key);
    }
  }

  pub fn record_write(&mut self, tx_id: TxId, key: TxKey) {
    if let Some(tx) = self.txs.get_mut(&tx_id) {
      tx.write_set.insert(key);
    }
  }

  pub fn tx(&self, tx_id: TxId) -> Option<&TxRecord> {
    self.txs.get(&tx_id)
  }

  /// All retained transactions (active, and committed above the GC
  /// horizon). Conflict validation scans the committed ones.
  pub fn iter_txs(&self) -> impl Iterator<Item = (&TxId, &TxRecord)> {
    self.txs.iter()
  }

  /// Atomically issue a commit timestamp and mark the transaction
  /// committed. Conflict validation must already have passed.
  pub fn commit_tx(&mut self, tx_id: TxId) -> Result<Timestamp> {
    self.clock += 1;
    let commit_ts = self.clock;
    let tx = self
      .txs
      .get_mut(&tx_id)
      .ok_or(RayError::NoTransaction)?;
    tx.status = TxStatus::Committed;
    tx.commit_ts = Some(commit_ts);

    let wall_ms = wall_clock_ms();
    self.commit_log.push_back((wall_ms, commit_ts));
    Ok(commit_ts)
  }

  pub fn abort_tx(&mut self, tx_id: TxId) {
    if let Some(tx) = self.txs.get_mut(&tx_id) {
      tx.status = TxStatus::Aborted;
    }
    // Aborted transactions hold nothing the engine needs later.
    self.txs.remove(&tx_id);
  }

  pub fn active_count(&self) -> usize {
    self
      .txs
      .values()
      .filter(|tx| tx.status == TxStatus::Active)
      .count()
  }

  /// Oldest start timestamp across active transactions, or the current
  /// clock when none are active (nothing older can still be read).
  pub fn min_active_start_ts(&self) -> Timestamp {
    self
      .txs
      .values()
      .filter(|tx| tx.status == TxStatus::Active)
      .map(|tx| tx.start_ts)
      .min()
      .unwrap_or(self.clock)
  }

  /// Newest sampled commit-ts whose wall clock is older than the retention
  /// window; 0 when no sample qualifies yet. This is the wall-clock ->
  /// ts-space conversion the GC horizon uses.
  pub fn retention_cutoff_ts(&self, now_ms: u64, retention_ms: u64) -> Timestamp {
    let cutoff_wall = now_ms.saturating_sub(retention_ms);
    self
      .commit_log
      .iter()
      .take_while(|(wall, _)| *wall <= cutoff_wall)
      .last()
      .map(|(_, ts)| *ts)
      .unwrap_or(0)
  }

  /// Drop committed transactions and commit-log samples below the horizon.
  /// Returns the number of transactions removed.
  pub fn cleanup_below(&mut self, horizon: Timestamp) -> usize {
    let before = self.txs.len();
    self.txs.retain(|_, tx| match tx.status {
      TxStatus::Active => true,
      TxStatus::Committed => tx.commit_ts.map_or(true, |ts| ts >= horizon),
      TxStatus::Aborted => false,
    });
    while self
      .commit_log
      .front()
      .is_some_and(|(_, ts)| *ts < horizon)
    {
      self.commit_log.pop_front();
    }
    before - self.txs.len()
  }

  pub fn commit_log_len(&self) -> usize {
    self.commit_log.len()
  }
}

impl Default for TxManager {
  fn default() -> Self {
    Self::new()
  }
}

fn wall_clock_ms() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}
