//! `VEC1` vector store serialization.
//!
//! Layout, little-endian:
//! `magic u32 | version u32 | dims u32 | metric u8 | normalize u8 | pad u16 |
//!  row_group_size u32 | fragment_target u32 | next_vector_id u64 |
//!  live_count u64 | num_fragments u32` followed by per-fragment blocks:
//! `id u32 | state u8 | pad[3] | num_rows u32 | bitmap_words u32 |
//!  bitmap u64[] | node_ids u64[num_rows] | rows f32[num_rows * dims]`,
//! and a trailing CRC32C over everything before it. Every read is
//! bounds-checked; a malformed blob never panics.

use crate::constants::{MAGIC_VECTOR, VERSION_VECTOR};
use crate::error::{RayError, Result};
use crate::types::NodeId;
use crate::util::binary::{read_u32, read_u64, write_u32, write_u64};
use crate::util::crc::crc32c;
use crate::vector::store::VectorStore;
use crate::vector::types::{DistanceMetric, Fragment, FragmentState, VectorStoreConfig};

const FIXED_HEADER: usize = 40;

/// Serialize a vector store into a self-contained `VEC1` blob.
pub fn serialize_store(store: &VectorStore) -> Vec<u8> {
  let mut buf = vec![0u8; FIXED_HEADER];
  write_u32(&mut buf, 0, MAGIC_VECTOR);
  write_u32(&mut buf, 4, VERSION_VECTOR);
  write_u32(&mut buf, 8, store.config.dimensions as u32);
  buf[12] = store.config.metric as u8;
  buf[13] = u8::from(store.config.normalize);
  write_u32(&mut buf, 16, store.config.row_group_size as u32);
  write_u32(&mut buf, 20, store.config.fragment_target_size as u32);
  write_u64(&mut buf, 24, store.next_vector_id);
  write_u64(&mut buf, 32, store.live_count);

  buf.extend_from_slice(&(store.fragments.len() as u32).to_le_bytes());

  for fragment in &store.fragments {
    buf.extend_from_slice(&fragment.id.to_le_bytes());
    buf.push(fragment.state as u8);
    buf.extend_from_slice(&[0u8; 3]);
    buf.extend_from_slice(&(fragment.num_rows as u32).to_le_bytes());
    buf.extend_from_slice(&(fragment.deletion_bitmap.len() as u32).to_le_bytes());
    for word in &fragment.deletion_bitmap {
      buf.extend_from_slice(&word.to_le_bytes());
    }
    for node_id in &fragment.node_ids {
      buf.extend_from_slice(&node_id.to_le_bytes());
    }
    for group in &fragment.row_groups {
      for value in group {
        buf.extend_from_slice(&value.to_le_bytes());
      }
    }
  }

  let crc = crc32c(&buf);
  buf.extend_from_slice(&crc.to_le_bytes());
  buf
}

struct Cursor<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> Cursor<'a> {
  fn take(&mut self, len: usize) -> Result<&'a [u8]> {
    if self.pos + len > self.buf.len() {
      return Err(RayError::CorruptSnapshot(
        "vector store blob truncated".to_string(),
      ));
    }
    let slice = &self.buf[self.pos..self.pos + len];
    self.pos += len;
    Ok(slice)
  }

  fn u32(&mut self) -> Result<u32> {
    Ok(read_u32(self.take(4)?, 0))
  }

  fn u64(&mut self) -> Result<u64> {
    Ok(read_u64(self.take(8)?, 0))
  }
}

/// Deserialize a `VEC1` blob.
pub fn deserialize_store(bytes: &[u8]) -> Result<VectorStore> {
  if bytes.len() < FIXED_HEADER + 8 {
    return Err(RayError::CorruptSnapshot(
      "vector store blob too small".to_string(),
    ));
  }

  let body_end = bytes.len() - 4;
  let stored_crc = read_u32(bytes, body_end);
  let computed = crc32c(&bytes[..body_end]);
  if stored_crc != computed {
    return Err(RayError::CrcMismatch {
      stored: stored_crc,
      computed,
    });
  }

  let magic = read_u32(bytes, 0);
  if magic != MAGIC_VECTOR {
    return Err(RayError::InvalidMagic {
      expected: MAGIC_VECTOR,
      got: magic,
    });
  }
  let version = read_u32(bytes, 4);
  if version > VERSION_VECTOR {
    return Err(RayError::VersionMismatch {
      supported: VERSION_VECTOR,
      found: version,
    });
  }

  let dimensions = read_u32(bytes, 8) as usize;
  let metric = DistanceMetric::from_u8(bytes[12]).ok_or_else(|| {
    RayError::CorruptSnapshot(format!("unknown distance metric {}", bytes[12]))
  })?;
  let normalize = bytes[13] != 0;
  let row_group_size = read_u32(bytes, 16) as usize;
  let fragment_target_size = read_u32(bytes, 20) as usize;
  if dimensions == 0 || row_group_size == 0 || fragment_target_size == 0 {
    return Err(RayError::CorruptSnapshot(
      "vector store config has zero-sized fields".to_string(),
    ));
  }
  let next_vector_id = read_u64(bytes, 24);
  let live_count = read_u64(bytes, 32);

  let config = VectorStoreConfig {
    dimensions,
    metric,
    row_group_size,
    fragment_target_size,
    normalize,
  };

  let mut cursor = Cursor {
    buf: &bytes[..body_end],
    pos: FIXED_HEADER,
  };
  let num_fragments = cursor.u32()? as usize;

  let mut fragments = Vec::with_capacity(num_fragments.min(1024));
  let mut node_to_vector = std::collections::HashMap::new();

  for frag_idx in 0..num_fragments {
    let id = cursor.u32()?;
    let state_byte = cursor.take(1)?[0];
    cursor.take(3)?;
    let num_rows = cursor.u32()? as usize;
    if num_rows > fragment_target_size {
      return Err(RayError::CorruptSnapshot(format!(
        "fragment {id} claims {num_rows} rows over target {fragment_target_size}"
      )));
    }
    let bitmap_words = cursor.u32()? as usize;

    let mut deletion_bitmap = Vec::with_capacity(bitmap_words);
    for _ in 0..bitmap_words {
      deletion_bitmap.push(cursor.u64()?);
    }

    let mut node_ids: Vec<NodeId> = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
      node_ids.push(cursor.u64()?);
    }

    let row_bytes = cursor.take(num_rows * dimensions * 4)?;
    let floats_per_group = row_group_size * dimensions;
    let mut row_groups: Vec<Vec<f32>> = Vec::new();
    for (i, chunk) in row_bytes.chunks_exact(4).enumerate() {
      if i % floats_per_group == 0 {
        row_groups.push(Vec::new());
      }
      if let Some(group) = row_groups.last_mut() {
        group.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
      }
    }

    let fragment = Fragment {
      id,
      state: if state_byte == FragmentState::Sealed as u8 {
        FragmentState::Sealed
      } else {
        FragmentState::Active
      },
      row_groups,
      node_ids,
      deletion_bitmap,
      num_rows,
    };

    for (row, &node_id) in fragment.node_ids.iter().enumerate() {
      if !fragment.is_deleted(row) {
        let vector_id = frag_idx as u64 * fragment_target_size as u64 + row as u64;
        node_to_vector.insert(node_id, vector_id);
      }
    }

    fragments.push(fragment);
  }

  if fragments.is_empty() {
    fragments.push(Fragment::new(0));
  }

  Ok(VectorStore {
    config,
    fragments,
    node_to_vector,
    next_vector_id,
    live_count,
  })
}
