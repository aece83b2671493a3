//! Read-only memory mapping helpers.

use std::fs::File;

use crate::error::Result;

pub use memmap2::Mmap;

/// Map a file read-only.
///
/// Safety: the engine never maps files it is concurrently rewriting in
/// place. Snapshot files are immutable once published, and the single-file
/// container remaps after every checkpoint.
pub fn map_file(file: &File) -> Result<Mmap> {
  let mmap = unsafe { Mmap::map(file)? };
  Ok(mmap)
}
