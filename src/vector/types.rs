//! Vector store data types.

use crate::types::NodeId;

/// Distance metric recorded in the store config. Search lives outside the
/// core; the metric only drives normalization on insert here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DistanceMetric {
  Cosine = 0,
  L2 = 1,
  Dot = 2,
}

impl DistanceMetric {
  pub fn from_u8(value: u8) -> Option<Self> {
    match value {
      0 => Some(Self::Cosine),
      1 => Some(Self::L2),
      2 => Some(Self::Dot),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorStoreConfig {
  pub dimensions: usize,
  pub metric: DistanceMetric,
  /// Rows per row group inside a fragment.
  pub row_group_size: usize,
  /// Rows per fragment; a fragment is sealed when it reaches this size.
  pub fragment_target_size: usize,
  /// Normalize vectors to unit length on insert.
  pub normalize: bool,
}

impl VectorStoreConfig {
  pub fn new(dimensions: usize) -> Self {
    Self {
      dimensions,
      metric: DistanceMetric::Cosine,
      row_group_size: 1024,
      fragment_target_size: 64 * 1024,
      normalize: false,
    }
  }

  pub fn normalize(mut self, value: bool) -> Self {
    self.normalize = value;
    self
  }

  pub fn metric(mut self, metric: DistanceMetric) -> Self {
    self.metric = metric;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FragmentState {
  Active = 0,
  Sealed = 1,
}

/// A block of row groups. Sealed fragments are immutable.
#[derive(Debug, Clone)]
pub struct Fragment {
  pub id: u32,
  pub state: FragmentState,
  /// Dense row data, `row_group_size * dimensions` floats per full group.
  pub row_groups: Vec<Vec<f32>>,
  /// Row index -> owning node, parallel to insertion order.
  pub node_ids: Vec<NodeId>,
  /// One bit per row; set means deleted.
  pub deletion_bitmap: Vec<u64>,
  pub num_rows: usize,
}

impl Fragment {
  pub fn new(id: u32) -> Self {
    Self {
      id,
      state: FragmentState::Active,
      row_groups: Vec::new(),
      node_ids: Vec::new(),
      deletion_bitmap: Vec::new(),
      num_rows: 0,
    }
  }

  pub fn is_deleted(&self, row: usize) -> bool {
    self
      .deletion_bitmap
      .get(row / 64)
      .is_some_and(|word| word & (1u64 << (row % 64)) != 0)
  }

  pub fn mark_deleted(&mut self, row: usize) {
    let word = row / 64;
    if word >= self.deletion_bitmap.len() {
      self.deletion_bitmap.resize(word + 1, 0);
    }
    self.deletion_bitmap[word] |= 1u64 << (row % 64);
  }
}
