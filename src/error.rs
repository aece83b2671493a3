//! Crate-wide error type.

use crate::types::TxId;

/// Errors surfaced by the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum RayError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("corrupt snapshot: {0}")]
  CorruptSnapshot(String),

  #[error("corrupt manifest: {0}")]
  CorruptManifest(String),

  #[error("invalid magic: expected {expected:#010x}, got {got:#010x}")]
  InvalidMagic { expected: u32, got: u32 },

  #[error("format version {found} requires a newer reader (supported up to {supported})")]
  VersionMismatch { supported: u32, found: u32 },

  #[error("CRC mismatch: stored {stored:#010x}, computed {computed:#010x}")]
  CrcMismatch { stored: u32, computed: u32 },

  #[error("not found: {0}")]
  NotFound(String),

  #[error("duplicate key: {0}")]
  DuplicateKey(String),

  #[error("transaction {txid} conflicts on keys: {keys:?}")]
  Conflict { txid: TxId, keys: Vec<String> },

  #[error("WAL buffer full; checkpoint required before further commits")]
  WalBufferFull,

  #[error("database is already open by another writer")]
  AlreadyOpen,

  #[error("database is read-only")]
  ReadOnly,

  #[error("no active transaction")]
  NoTransaction,

  #[error("a transaction is already in progress on this thread")]
  TransactionInProgress,

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("invalid path: {0}")]
  InvalidPath(String),

  #[error("internal error: {0}")]
  Internal(String),
}

pub type Result<T> = std::result::Result<T, RayError>;
