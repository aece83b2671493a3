//! Key hashing for the node key index.

use xxhash_rust::xxh64::xxh64;

/// 64-bit hash of a key string, with a fixed seed so hashes are stable
/// across processes and snapshot generations.
#[inline]
pub fn xxhash64_string(key: &str) -> u64 {
  xxh64(key.as_bytes(), 0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stable_and_distinct() {
    let a = xxhash64_string("user:alice");
    let b = xxhash64_string("user:bob");
    assert_eq!(a, xxhash64_string("user:alice"));
    assert_ne!(a, b);
  }
}
