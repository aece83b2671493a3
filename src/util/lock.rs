//! Advisory file locking for single-writer enforcement.

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::constants::LOCK_FILE;
use crate::error::{RayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
  /// Read-only opens share the lock.
  Shared,
  /// Writable opens require exclusivity; a second writer fails fast.
  Exclusive,
}

/// Held advisory lock on the database lock file. Released on drop.
#[derive(Debug)]
pub struct FileLock {
  file: File,
  lock_type: LockType,
}

impl FileLock {
  /// Acquire a lock on `<dir>/lock`, creating the file if needed.
  pub fn acquire(dir: &Path, lock_type: LockType) -> Result<Self> {
    Self::acquire_path(&dir.join(LOCK_FILE), lock_type)
  }

  /// Acquire a lock on an explicit lock-file path (single-file layout uses
  /// `<name>.raydb.lock` next to the database file).
  pub fn acquire_path(path: &Path, lock_type: LockType) -> Result<Self> {
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(path)?;

    let locked: std::io::Result<()> = match lock_type {
      LockType::Shared => fs2::FileExt::try_lock_shared(&file),
      LockType::Exclusive => fs2::FileExt::try_lock_exclusive(&file),
    };

    match locked {
      Ok(()) => Ok(Self { file, lock_type }),
      Err(_) => Err(RayError::AlreadyOpen),
    }
  }

  pub fn lock_type(&self) -> LockType {
    self.lock_type
  }
}

impl Drop for FileLock {
  fn drop(&mut self) {
    let _ = fs2::FileExt::unlock(&self.file);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn second_writer_fails_fast() {
    let dir = tempdir().unwrap();
    let _first = FileLock::acquire(dir.path(), LockType::Exclusive).unwrap();
    let second = FileLock::acquire(dir.path(), LockType::Exclusive);
    assert!(matches!(second, Err(RayError::AlreadyOpen)));
  }

  #[test]
  fn readers_share() {
    let dir = tempdir().unwrap();
    let _a = FileLock::acquire(dir.path(), LockType::Shared).unwrap();
    let _b = FileLock::acquire(dir.path(), LockType::Shared).unwrap();
  }

  #[test]
  fn writer_excluded_by_reader() {
    let dir = tempdir().unwrap();
    let _reader = FileLock::acquire(dir.path(), LockType::Shared).unwrap();
    assert!(FileLock::acquire(dir.path(), LockType::Exclusive).is_err());
  }

  #[test]
  fn released_on_drop() {
    let dir = tempdir().unwrap();
    {
      let _lock = FileLock::acquire(dir.path(), LockType::Exclusive).unwrap();
    }
    let _again = FileLock::acquire(dir.path(), LockType::Exclusive).unwrap();
  }
}
