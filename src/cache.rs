//! Optional read cache for key lookups.
//!
//! Bounded, write-invalidated. Only non-transactional reads consult it; a
//! transaction always reads through its own horizon.

use hashbrown::HashMap;

use crate::types::NodeId;

const DEFAULT_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub invalidations: u64,
}

#[derive(Debug)]
pub struct KeyCache {
  entries: HashMap<String, Option<NodeId>>,
  capacity: usize,
  stats: CacheStats,
}

impl KeyCache {
  pub fn new() -> Self {
    Self::with_capacity(DEFAULT_CAPACITY)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      entries: HashMap::new(),
      capacity: capacity.max(1),
      stats: CacheStats::default(),
    }
  }

  pub fn get(&mut self, key: &str) -> Option<Option<NodeId>> {
    match self.entries.get(key) {
      Some(cached) => {
        self.stats.hits += 1;
        Some(*cached)
      }
      None => {
        self.stats.misses += 1;
        None
      }
    }
  }

  pub fn insert(&mut self, key: &str, value: Option<NodeId>) {
    if self.entries.len() >= self.capacity && !self.entries.contains_key(key) {
      // Cheap pressure valve; the cache refills from the read path.
      self.entries.clear();
    }
    self.entries.insert(key.to_string(), value);
  }

  pub fn invalidate(&mut self, key: &str) {
    if self.entries.remove(key).is_some() {
      self.stats.invalidations += 1;
    }
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  pub fn stats(&self) -> CacheStats {
    self.stats.clone()
  }
}

impl Default for KeyCache {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hit_miss_invalidate() {
    let mut cache = KeyCache::with_capacity(4);
    assert_eq!(cache.get("a"), None);
    cache.insert("a", Some(1));
    assert_eq!(cache.get("a"), Some(Some(1)));
    cache.insert("b", None);
    assert_eq!(cache.get("b"), Some(None));

    cache.invalidate("a");
    assert_eq!(cache.get("a"), None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.invalidations, 1);
  }

  #[test]
  fn capacity_pressure_clears() {
    let mut cache = KeyCache::with_capacity(2);
    cache.insert("a", Some(1));
    cache.insert("b", Some(2));
    cache.insert("c", Some(3));
    assert_eq!(cache.get("c"), Some(Some(3)));
  }
}
