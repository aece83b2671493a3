//! Snapshot section identifiers and the packed section table.
//!
//! Section-table entries are `(section_id u16, offset u64, length u64,
//! crc32c u32)`, packed back to back after the fixed header. Offsets are
//! relative to the start of the snapshot image so the same bytes can live in
//! a standalone `.gds` file or embedded in a container.

use crate::constants::{SECTION_ENTRY_SIZE, SNAPSHOT_HEADER_SIZE};
use crate::error::{RayError, Result};
use crate::util::binary::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use crate::util::crc::crc32c;

// ============================================================================
// Section ids
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SectionId {
  StringOffsets = 0,
  StringBytes = 1,
  PhysToNodeId = 2,
  NodeIdToPhys = 3,
  OutOffsets = 4,
  OutEtype = 5,
  OutDst = 6,
  InOffsets = 7,
  InEtype = 8,
  InSrc = 9,
  InOutIndex = 10,
  KeyEntries = 11,
  KeyBuckets = 12,
  NodeKeyStrings = 13,
  LabelNames = 14,
  EtypeNames = 15,
  PropkeyNames = 16,
  NodeLabelOffsets = 17,
  NodeLabelIds = 18,
  NodeProps = 19,
  EdgeProps = 20,
  VectorStoreIndex = 21,
  VectorStoreBlob = 22,
}

impl SectionId {
  pub const COUNT: usize = 23;

  pub fn from_u16(id: u16) -> Option<Self> {
    if (id as usize) < Self::COUNT {
      // Safety not needed: exhaustive match keeps this table honest.
      Some(match id {
        0 => Self::StringOffsets,
        1 => Self::StringBytes,
        2 => Self::PhysToNodeId,
        3 => Self::NodeIdToPhys,
        4 => Self::OutOffsets,
        5 => Self::OutEtype,
        6 => Self::OutDst,
        7 => Self::InOffsets,
        8 => Self::InEtype,
        9 => Self::InSrc,
        10 => Self::InOutIndex,
        11 => Self::KeyEntries,
        12 => Self::KeyBuckets,
        13 => Self::NodeKeyStrings,
        14 => Self::LabelNames,
        15 => Self::EtypeNames,
        16 => Self::PropkeyNames,
        17 => Self::NodeLabelOffsets,
        18 => Self::NodeLabelIds,
        19 => Self::NodeProps,
        20 => Self::EdgeProps,
        21 => Self::VectorStoreIndex,
        22 => Self::VectorStoreBlob,
        _ => unreachable!(),
      })
    } else {
      None
    }
  }
}

// ============================================================================
// Section table
// ============================================================================

/// One parsed section-table entry. `offset` is relative to the snapshot
/// image start; a zero-length section is absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionEntry {
  pub offset: u64,
  pub length: u64,
  pub crc: u32,
}

#[derive(Debug)]
pub struct ParsedSectionTable {
  /// Indexed by `SectionId as usize`.
  pub sections: Vec<SectionEntry>,
  /// End of the furthest section, relative to the image start.
  pub max_section_end: usize,
}

/// Parse the section table from a snapshot image.
///
/// `image` must start at the snapshot header. Entries for unknown section
/// ids are rejected; the format version gates additions.
pub fn parse_section_table(image: &[u8], section_count: usize) -> Result<ParsedSectionTable> {
  let table_end = SNAPSHOT_HEADER_SIZE + section_count * SECTION_ENTRY_SIZE;
  if image.len() < table_end {
    return Err(RayError::CorruptSnapshot(format!(
      "section table truncated: need {table_end} bytes, have {}",
      image.len()
    )));
  }

  let mut sections = vec![SectionEntry::default(); SectionId::COUNT];
  let mut max_section_end = table_end;

  for i in 0..section_count {
    let base = SNAPSHOT_HEADER_SIZE + i * SECTION_ENTRY_SIZE;
    let raw_id = read_u16(image, base);
    let offset = read_u64(image, base + 2);
    let length = read_u64(image, base + 10);
    let crc = read_u32(image, base + 18);

    let Some(id) = SectionId::from_u16(raw_id) else {
      return Err(RayError::CorruptSnapshot(format!(
        "unknown section id {raw_id}"
      )));
    };

    if length == 0 {
      continue;
    }

    let end = offset
      .checked_add(length)
      .and_then(|v| usize::try_from(v).ok())
      .ok_or_else(|| RayError::CorruptSnapshot(format!("section {raw_id} overflows")))?;
    if (offset as usize) < table_end || end > image.len() {
      return Err(RayError::CorruptSnapshot(format!(
        "section {raw_id} out of bounds: offset {offset}, length {length}"
      )));
    }

    sections[id as usize] = SectionEntry {
      offset,
      length,
      crc,
    };
    max_section_end = max_section_end.max(end);
  }

  Ok(ParsedSectionTable {
    sections,
    max_section_end,
  })
}

/// Verify every present section's CRC32C against the image bytes.
pub fn verify_section_crcs(image: &[u8], sections: &[SectionEntry]) -> Result<()> {
  for entry in sections {
    if entry.length == 0 {
      continue;
    }
    let start = entry.offset as usize;
    let end = start + entry.length as usize;
    let computed = crc32c(&image[start..end]);
    if computed != entry.crc {
      return Err(RayError::CrcMismatch {
        stored: entry.crc,
        computed,
      });
    }
  }
  Ok(())
}

/// Encode the section table into `image` at the fixed header end.
pub fn write_section_table(image: &mut [u8], sections: &[(SectionId, SectionEntry)]) {
  for (i, (id, entry)) in sections.iter().enumerate() {
    let base = SNAPSHOT_HEADER_SIZE + i * SECTION_ENTRY_SIZE;
    write_u16(image, base, *id as u16);
    write_u64(image, base + 2, entry.offset);
    write_u64(image, base + 10, entry.length);
    write_u32(image, base + 18, entry.crc);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn section_id_round_trip() {
    for raw in 0..SectionId::COUNT as u16 {
      let id = SectionId::from_u16(raw).unwrap();
      assert_eq!(id as u16, raw);
    }
    assert!(SectionId::from_u16(SectionId::COUNT as u16).is_none());
  }

  #[test]
  fn rejects_out_of_bounds_section() {
    let mut image = vec![0u8; SNAPSHOT_HEADER_SIZE + SECTION_ENTRY_SIZE];
    write_u16(&mut image, SNAPSHOT_HEADER_SIZE, 0);
    write_u64(&mut image, SNAPSHOT_HEADER_SIZE + 2, 4096);
    write_u64(&mut image, SNAPSHOT_HEADER_SIZE + 10, 64);
    assert!(parse_section_table(&image, 1).is_err());
  }

  #[test]
  fn zero_length_sections_are_absent() {
    let image = vec![0u8; SNAPSHOT_HEADER_SIZE + SECTION_ENTRY_SIZE];
    let parsed = parse_section_table(&image, 1).unwrap();
    assert!(parsed.sections.iter().all(|s| s.length == 0));
  }
}
