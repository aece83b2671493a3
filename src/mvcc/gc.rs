//! MVCC garbage collection.
//!
//! A GC cycle computes the horizon `min(oldest_active_start_ts,
//! retention_cutoff)`, prunes version chains below it, truncates
//! over-deep chains at a safe cut, and drops committed-transaction
//! bookkeeping that nothing can read anymore. The collector can run
//! manually or on a background thread with an interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::mvcc::tx_manager::TxManager;
use crate::mvcc::version_store::VersionStore;
use crate::mvcc::MvccManager;
use crate::types::MvccStats;

pub const DEFAULT_GC_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_RETENTION_MS: u64 = 60_000;
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 10;

#[derive(Debug, Clone)]
pub struct GcConfig {
  pub interval_ms: u64,
  pub retention_ms: u64,
  pub max_chain_depth: usize,
}

impl Default for GcConfig {
  fn default() -> Self {
    Self {
      interval_ms: DEFAULT_GC_INTERVAL_MS,
      retention_ms: DEFAULT_RETENTION_MS,
      max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct GcRunResult {
  pub versions_pruned: usize,
  pub chains_truncated: usize,
  pub txs_cleaned: usize,
}

#[derive(Debug)]
pub struct GarbageCollector {
  config: GcConfig,
  versions_pruned: u64,
  chains_truncated: u64,
  gc_runs: u64,
  last_run: Option<Instant>,
}

impl GarbageCollector {
  pub fn with_config(config: GcConfig) -> Self {
    Self {
      config,
      versions_pruned: 0,
      chains_truncated: 0,
      gc_runs: 0,
      last_run: None,
    }
  }

  pub fn config(&self) -> &GcConfig {
    &self.config
  }

  pub fn should_run(&self) -> bool {
    match self.last_run {
      None => true,
      Some(last) => last.elapsed() >= Duration::from_millis(self.config.interval_ms),
    }
  }

  /// Run one GC cycle.
  pub fn run(&mut self, tx_manager: &mut TxManager, versions: &mut VersionStore) -> GcRunResult {
    let now_ms = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .map(|d| d.as_millis() as u64)
      .unwrap_or(0);

    let min_active = tx_manager.min_active_start_ts();
    let retention_cutoff = tx_manager.retention_cutoff_ts(now_ms, self.config.retention_ms);
    let horizon = min_active.min(retention_cutoff);

    let versions_pruned = versions.prune_below(horizon);
    let chains_truncated = versions.truncate_deep(self.config.max_chain_depth, min_active);
    let txs_cleaned = tx_manager.cleanup_below(horizon);

    self.versions_pruned += versions_pruned as u64;
    self.chains_truncated += chains_truncated as u64;
    self.gc_runs += 1;
    self.last_run = Some(Instant::now());

    GcRunResult {
      versions_pruned,
      chains_truncated,
      txs_cleaned,
    }
  }

  pub fn stats(&self, tx_manager: &TxManager) -> MvccStats {
    MvccStats {
      active_transactions: tx_manager.active_count(),
      min_active_ts: tx_manager.min_active_start_ts(),
      versions_pruned: self.versions_pruned,
      chains_truncated: self.chains_truncated,
      gc_runs: self.gc_runs,
    }
  }
}

// ============================================================================
// Background task
// ============================================================================

/// Handle for the background GC thread. Dropping it stops the thread.
pub struct GcHandle {
  stop: Arc<AtomicBool>,
  join: Option<std::thread::JoinHandle<()>>,
}

impl GcHandle {
  /// Spawn a thread running GC every `interval_ms`. It stops promptly when
  /// signaled at drop, before the database tears down.
  pub fn spawn(mvcc: Arc<MvccManager>, interval_ms: u64) -> crate::error::Result<Self> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    let join = std::thread::Builder::new()
      .name("raydb-gc".to_string())
      .spawn(move || {
        let tick = Duration::from_millis(interval_ms.clamp(10, 60_000));
        let slice = Duration::from_millis(10);
        while !stop_flag.load(Ordering::SeqCst) {
          // Sleep in short slices so a stop signal is honored promptly
          // even with long GC intervals.
          let started = Instant::now();
          while started.elapsed() < tick {
            if stop_flag.load(Ordering::SeqCst) {
              return;
            }
            std::thread::sleep(slice);
          }
          let mut tx_manager = mvcc.tx_manager.lock();
          let mut versions = mvcc.versions.lock();
          let mut gc = mvcc.gc.lock();
          if gc.should_run() {
            gc.run(&mut tx_manager, &mut versions);
          }
        }
      })?;

    Ok(Self {
      stop,
      join: Some(join),
    })
  }

  pub fn stop(&self) {
    self.stop.store(true, Ordering::SeqCst);
  }
}

impl Drop for GcHandle {
  fn drop(&mut self) {
    self.stop();
    if let Some(join) = self.join.take() {
      let _ = join.join();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mvcc::TxKey;
  use crate::types::PropValue;
  use std::sync::Arc as StdArc;

  fn setup() -> (TxManager, VersionStore, GarbageCollector) {
    (
      TxManager::new(),
      VersionStore::new(),
      GarbageCollector::with_config(GcConfig {
        interval_ms: 0,
        retention_ms: 0,
        max_chain_depth: 3,
      }),
    )
  }

  #[test]
  fn empty_run() {
    let (mut txs, mut versions, mut gc) = setup();
    let result = gc.run(&mut txs, &mut versions);
    assert_eq!(result.versions_pruned, 0);
    assert_eq!(result.chains_truncated, 0);
    assert_eq!(gc.stats(&txs).gc_runs, 1);
  }

  #[test]
  fn prunes_once_retention_expires() {
    let (mut txs, mut versions, mut gc) = setup();

    // Five committed rewrites of the same property.
    for i in 0..5i64 {
      let (tx, _) = txs.begin_tx();
      let ts = txs.commit_tx(tx).unwrap();
      versions.append_prop(
        TxKey::node_prop(1, 1),
        Some(StdArc::new(PropValue::I64(i))),
        tx,
        ts,
      );
    }
    assert_eq!(versions.chain_len(TxKey::node_prop(1, 1)), 5);

    // retention_ms == 0 and no active readers: everything but the head
    // collapses.
    let result = gc.run(&mut txs, &mut versions);
    assert!(result.versions_pruned >= 3);
    assert_eq!(versions.chain_len(TxKey::node_prop(1, 1)), 1);
    assert!(result.txs_cleaned >= 4);
  }

  #[test]
  fn active_reader_pins_versions() {
    let (mut txs, mut versions, mut gc) = setup();

    let (writer, _) = txs.begin_tx();
    let ts = txs.commit_tx(writer).unwrap();
    versions.append_presence(TxKey::node(1), true, writer, ts);

    // A reader began before the delete below.
    let (_reader, reader_start) = txs.begin_tx();
    let (deleter, _) = txs.begin_tx();
    let del_ts = txs.commit_tx(deleter).unwrap();
    versions.append_presence(TxKey::node(1), false, deleter, del_ts);

    gc.run(&mut txs, &mut versions);

    // The version the reader depends on must survive.
    assert_eq!(versions.presence_at(TxKey::node(1), reader_start), Some(true));
  }

  #[test]
  fn background_handle_stops_cleanly() {
    let mvcc = Arc::new(MvccManager::new(GcConfig {
      interval_ms: 10,
      retention_ms: 0,
      max_chain_depth: 4,
    }));
    let handle = GcHandle::spawn(Arc::clone(&mvcc), 10).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    drop(handle);
    assert!(mvcc.gc.lock().stats(&mvcc.tx_manager.lock()).gc_runs >= 1);
  }
}
