//! WAL record codec.
//!
//! Wire layout, all little-endian:
//! `type u8 | tx_id u64 | payload_len u32 | payload | crc32c u32`
//! where the CRC covers everything before it. A record that fails its CRC,
//! or that runs past the end of the segment, is treated as if it was never
//! written.

use crate::constants::WAL_RECORD_OVERHEAD;
use crate::types::*;
use crate::util::binary::*;
use crate::util::crc::crc32c;

// ============================================================================
// Record types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
  Begin = 1,
  Commit = 2,
  Abort = 3,
  DefineLabel = 4,
  DefineEtype = 5,
  DefinePropkey = 6,
  CreateNode = 7,
  DeleteNode = 8,
  SetNodeKey = 9,
  SetNodeProp = 10,
  DelNodeProp = 11,
  AddEdge = 12,
  DelEdge = 13,
  SetEdgeProp = 14,
  DelEdgeProp = 15,
  SetNodeVector = 16,
  DelNodeVector = 17,
  Checkpoint = 18,
  AddNodeLabel = 19,
  DelNodeLabel = 20,
}

impl WalRecordType {
  pub fn from_u8(value: u8) -> Option<Self> {
    match value {
      1 => Some(Self::Begin),
      2 => Some(Self::Commit),
      3 => Some(Self::Abort),
      4 => Some(Self::DefineLabel),
      5 => Some(Self::DefineEtype),
      6 => Some(Self::DefinePropkey),
      7 => Some(Self::CreateNode),
      8 => Some(Self::DeleteNode),
      9 => Some(Self::SetNodeKey),
      10 => Some(Self::SetNodeProp),
      11 => Some(Self::DelNodeProp),
      12 => Some(Self::AddEdge),
      13 => Some(Self::DelEdge),
      14 => Some(Self::SetEdgeProp),
      15 => Some(Self::DelEdgeProp),
      16 => Some(Self::SetNodeVector),
      17 => Some(Self::DelNodeVector),
      18 => Some(Self::Checkpoint),
      19 => Some(Self::AddNodeLabel),
      20 => Some(Self::DelNodeLabel),
      _ => None,
    }
  }
}

// ============================================================================
// Record
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
  pub record_type: WalRecordType,
  pub tx_id: TxId,
  pub payload: Vec<u8>,
}

impl WalRecord {
  pub fn new(record_type: WalRecordType, tx_id: TxId, payload: Vec<u8>) -> Self {
    Self {
      record_type,
      tx_id,
      payload,
    }
  }

  pub fn encoded_len(&self) -> usize {
    WAL_RECORD_OVERHEAD + self.payload.len()
  }

  /// Encode with trailing CRC32C.
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = vec![0u8; self.encoded_len()];
    buf[0] = self.record_type as u8;
    write_u64(&mut buf, 1, self.tx_id);
    write_u32(&mut buf, 9, self.payload.len() as u32);
    buf[13..13 + self.payload.len()].copy_from_slice(&self.payload);
    let crc = crc32c(&buf[..13 + self.payload.len()]);
    write_u32(&mut buf, 13 + self.payload.len(), crc);
    buf
  }

  /// Decode one record at `offset`. Returns the record and the bytes it
  /// consumed, or `None` for a truncated, unknown-typed or CRC-failing
  /// record; the caller treats that as end of log.
  pub fn decode(buf: &[u8], offset: usize) -> Option<(Self, usize)> {
    if offset + WAL_RECORD_OVERHEAD > buf.len() {
      return None;
    }

    let record_type = WalRecordType::from_u8(buf[offset])?;
    let tx_id = read_u64(buf, offset + 1);
    let payload_len = read_u32(buf, offset + 9) as usize;

    let total = WAL_RECORD_OVERHEAD + payload_len;
    if offset + total > buf.len() {
      return None;
    }

    let body_end = offset + 13 + payload_len;
    let stored_crc = read_u32(buf, body_end);
    if crc32c(&buf[offset..body_end]) != stored_crc {
      return None;
    }

    Some((
      Self {
        record_type,
        tx_id,
        payload: buf[offset + 13..body_end].to_vec(),
      },
      total,
    ))
  }
}

// ============================================================================
// Payload encoding helpers
// ============================================================================

fn push_str(buf: &mut Vec<u8>, s: &str) {
  buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
  buf.extend_from_slice(s.as_bytes());
}

fn take_str(buf: &[u8], offset: &mut usize) -> Option<String> {
  if *offset + 4 > buf.len() {
    return None;
  }
  let len = read_u32(buf, *offset) as usize;
  *offset += 4;
  if *offset + len > buf.len() {
    return None;
  }
  let s = std::str::from_utf8(&buf[*offset..*offset + len]).ok()?;
  *offset += len;
  Some(s.to_string())
}

/// Encode a scalar property value: tag byte plus tag-specific payload.
/// Vector values never travel in property payloads (see `SetNodeVector`).
pub fn encode_prop_value(buf: &mut Vec<u8>, value: &PropValue) {
  buf.push(value.tag() as u8);
  match value {
    PropValue::Null => {}
    PropValue::Bool(b) => buf.push(u8::from(*b)),
    PropValue::I64(v) => buf.extend_from_slice(&v.to_le_bytes()),
    PropValue::F64(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
    PropValue::String(s) => push_str(buf, s),
    PropValue::VectorF32(_) => {}
  }
}

pub fn decode_prop_value(buf: &[u8], offset: &mut usize) -> Option<PropValue> {
  if *offset >= buf.len() {
    return None;
  }
  let tag = PropValueTag::from_u8(buf[*offset])?;
  *offset += 1;
  match tag {
    PropValueTag::Null => Some(PropValue::Null),
    PropValueTag::Bool => {
      let b = *buf.get(*offset)?;
      *offset += 1;
      Some(PropValue::Bool(b != 0))
    }
    PropValueTag::I64 => {
      if *offset + 8 > buf.len() {
        return None;
      }
      let v = read_u64(buf, *offset) as i64;
      *offset += 8;
      Some(PropValue::I64(v))
    }
    PropValueTag::F64 => {
      if *offset + 8 > buf.len() {
        return None;
      }
      let v = f64::from_bits(read_u64(buf, *offset));
      *offset += 8;
      Some(PropValue::F64(v))
    }
    PropValueTag::String => take_str(buf, offset).map(PropValue::String),
    PropValueTag::VectorF32 => None,
  }
}

// ============================================================================
// Typed payloads
// ============================================================================

pub struct CreateNodePayload {
  pub node_id: NodeId,
  pub key: Option<String>,
}

pub fn build_create_node_payload(node_id: NodeId, key: Option<&str>) -> Vec<u8> {
  let mut buf = Vec::with_capacity(13 + key.map_or(0, str::len));
  buf.extend_from_slice(&node_id.to_le_bytes());
  match key {
    Some(key) => {
      buf.push(1);
      push_str(&mut buf, key);
    }
    None => buf.push(0),
  }
  buf
}

pub fn parse_create_node_payload(buf: &[u8]) -> Option<CreateNodePayload> {
  if buf.len() < 9 {
    return None;
  }
  let node_id = read_u64(buf, 0);
  let key = if buf[8] != 0 {
    let mut offset = 9;
    Some(take_str(buf, &mut offset)?)
  } else {
    None
  };
  Some(CreateNodePayload { node_id, key })
}

pub fn build_node_id_payload(node_id: NodeId) -> Vec<u8> {
  node_id.to_le_bytes().to_vec()
}

pub fn parse_node_id_payload(buf: &[u8]) -> Option<NodeId> {
  if buf.len() < 8 {
    return None;
  }
  Some(read_u64(buf, 0))
}

pub fn build_set_node_key_payload(node_id: NodeId, key: Option<&str>) -> Vec<u8> {
  build_create_node_payload(node_id, key)
}

pub fn parse_set_node_key_payload(buf: &[u8]) -> Option<CreateNodePayload> {
  parse_create_node_payload(buf)
}

pub struct EdgePayload {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
}

pub fn build_edge_payload(src: NodeId, etype: ETypeId, dst: NodeId) -> Vec<u8> {
  let mut buf = Vec::with_capacity(20);
  buf.extend_from_slice(&src.to_le_bytes());
  buf.extend_from_slice(&etype.to_le_bytes());
  buf.extend_from_slice(&dst.to_le_bytes());
  buf
}

pub fn parse_edge_payload(buf: &[u8]) -> Option<EdgePayload> {
  if buf.len() < 20 {
    return None;
  }
  Some(EdgePayload {
    src: read_u64(buf, 0),
    etype: read_u32(buf, 8),
    dst: read_u64(buf, 12),
  })
}

pub struct NodePropPayload {
  pub node_id: NodeId,
  pub propkey: PropKeyId,
  pub value: Option<PropValue>,
}

pub fn build_set_node_prop_payload(node_id: NodeId, propkey: PropKeyId, value: &PropValue) -> Vec<u8> {
  let mut buf = Vec::with_capacity(24);
  buf.extend_from_slice(&node_id.to_le_bytes());
  buf.extend_from_slice(&propkey.to_le_bytes());
  encode_prop_value(&mut buf, value);
  buf
}

pub fn build_del_node_prop_payload(node_id: NodeId, propkey: PropKeyId) -> Vec<u8> {
  let mut buf = Vec::with_capacity(12);
  buf.extend_from_slice(&node_id.to_le_bytes());
  buf.extend_from_slice(&propkey.to_le_bytes());
  buf
}

pub fn parse_node_prop_payload(buf: &[u8], has_value: bool) -> Option<NodePropPayload> {
  if buf.len() < 12 {
    return None;
  }
  let node_id = read_u64(buf, 0);
  let propkey = read_u32(buf, 8);
  let value = if has_value {
    let mut offset = 12;
    Some(decode_prop_value(buf, &mut offset)?)
  } else {
    None
  };
  Some(NodePropPayload {
    node_id,
    propkey,
    value,
  })
}

pub struct EdgePropPayload {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
  pub propkey: PropKeyId,
  pub value: Option<PropValue>,
}

pub fn build_set_edge_prop_payload(
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
  propkey: PropKeyId,
  value: &PropValue,
) -> Vec<u8> {
  let mut buf = build_edge_payload(src, etype, dst);
  buf.extend_from_slice(&propkey.to_le_bytes());
  encode_prop_value(&mut buf, value);
  buf
}

pub fn build_del_edge_prop_payload(
  src: NodeId,
  etype: ETypeId,
  dst: NodeId,
  propkey: PropKeyId,
) -> Vec<u8> {
  let mut buf = build_edge_payload(src, etype, dst);
  buf.extend_from_slice(&propkey.to_le_bytes());
  buf
}

pub fn parse_edge_prop_payload(buf: &[u8], has_value: bool) -> Option<EdgePropPayload> {
  if buf.len() < 24 {
    return None;
  }
  let edge = parse_edge_payload(buf)?;
  let propkey = read_u32(buf, 20);
  let value = if has_value {
    let mut offset = 24;
    Some(decode_prop_value(buf, &mut offset)?)
  } else {
    None
  };
  Some(EdgePropPayload {
    src: edge.src,
    etype: edge.etype,
    dst: edge.dst,
    propkey,
    value,
  })
}

pub struct DefinePayload {
  pub id: u32,
  pub name: String,
}

pub fn build_define_payload(id: u32, name: &str) -> Vec<u8> {
  let mut buf = Vec::with_capacity(8 + name.len());
  buf.extend_from_slice(&id.to_le_bytes());
  push_str(&mut buf, name);
  buf
}

pub fn parse_define_payload(buf: &[u8]) -> Option<DefinePayload> {
  if buf.len() < 8 {
    return None;
  }
  let id = read_u32(buf, 0);
  let mut offset = 4;
  let name = take_str(buf, &mut offset)?;
  Some(DefinePayload { id, name })
}

pub struct NodeVectorPayload {
  pub node_id: NodeId,
  pub propkey: PropKeyId,
  pub vector: Option<Vec<f32>>,
}

pub fn build_set_node_vector_payload(node_id: NodeId, propkey: PropKeyId, vector: &[f32]) -> Vec<u8> {
  let mut buf = Vec::with_capacity(16 + vector.len() * 4);
  buf.extend_from_slice(&node_id.to_le_bytes());
  buf.extend_from_slice(&propkey.to_le_bytes());
  buf.extend_from_slice(&(vector.len() as u32).to_le_bytes());
  for v in vector {
    buf.extend_from_slice(&v.to_le_bytes());
  }
  buf
}

pub fn build_del_node_vector_payload(node_id: NodeId, propkey: PropKeyId) -> Vec<u8> {
  build_del_node_prop_payload(node_id, propkey)
}

pub fn parse_node_vector_payload(buf: &[u8], has_value: bool) -> Option<NodeVectorPayload> {
  if buf.len() < 12 {
    return None;
  }
  let node_id = read_u64(buf, 0);
  let propkey = read_u32(buf, 8);
  let vector = if has_value {
    if buf.len() < 16 {
      return None;
    }
    let dim = read_u32(buf, 12) as usize;
    if buf.len() < 16 + dim * 4 {
      return None;
    }
    let mut vector = Vec::with_capacity(dim);
    for i in 0..dim {
      let mut bytes = [0u8; 4];
      bytes.copy_from_slice(&buf[16 + i * 4..20 + i * 4]);
      vector.push(f32::from_le_bytes(bytes));
    }
    Some(vector)
  } else {
    None
  };
  Some(NodeVectorPayload {
    node_id,
    propkey,
    vector,
  })
}

pub fn build_node_label_payload(node_id: NodeId, label: LabelId) -> Vec<u8> {
  let mut buf = Vec::with_capacity(12);
  buf.extend_from_slice(&node_id.to_le_bytes());
  buf.extend_from_slice(&label.to_le_bytes());
  buf
}

pub fn parse_node_label_payload(buf: &[u8]) -> Option<(NodeId, LabelId)> {
  if buf.len() < 12 {
    return None;
  }
  Some((read_u64(buf, 0), read_u32(buf, 8)))
}

pub fn build_checkpoint_payload(generation: u64) -> Vec<u8> {
  generation.to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn record_round_trip() {
    let record = WalRecord::new(
      WalRecordType::CreateNode,
      42,
      build_create_node_payload(7, Some("user:alice")),
    );
    let bytes = record.encode();
    let (decoded, consumed) = WalRecord::decode(&bytes, 0).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(decoded, record);

    let payload = parse_create_node_payload(&decoded.payload).unwrap();
    assert_eq!(payload.node_id, 7);
    assert_eq!(payload.key.as_deref(), Some("user:alice"));
  }

  #[test]
  fn corrupted_record_is_rejected() {
    let record = WalRecord::new(WalRecordType::AddEdge, 1, build_edge_payload(1, 2, 3));
    let mut bytes = record.encode();
    let len = bytes.len();
    bytes[len - 6] ^= 0x01;
    assert!(WalRecord::decode(&bytes, 0).is_none());
  }

  #[test]
  fn truncated_record_is_rejected() {
    let record = WalRecord::new(WalRecordType::Commit, 9, Vec::new());
    let bytes = record.encode();
    assert!(WalRecord::decode(&bytes[..bytes.len() - 1], 0).is_none());
    assert!(WalRecord::decode(&[], 0).is_none());
  }

  #[test]
  fn prop_value_payloads() {
    for value in [
      PropValue::Null,
      PropValue::Bool(true),
      PropValue::I64(-5),
      PropValue::F64(2.5),
      PropValue::String("hi".to_string()),
    ] {
      let payload = build_set_node_prop_payload(3, 4, &value);
      let parsed = parse_node_prop_payload(&payload, true).unwrap();
      assert_eq!(parsed.node_id, 3);
      assert_eq!(parsed.propkey, 4);
      assert_eq!(parsed.value, Some(value));
    }
  }

  #[test]
  fn vector_payload_round_trip() {
    let payload = build_set_node_vector_payload(8, 2, &[0.25, -1.0, 3.5]);
    let parsed = parse_node_vector_payload(&payload, true).unwrap();
    assert_eq!(parsed.node_id, 8);
    assert_eq!(parsed.propkey, 2);
    assert_eq!(parsed.vector, Some(vec![0.25, -1.0, 3.5]));
  }

  #[test]
  fn edge_prop_payload_round_trip() {
    let payload = build_set_edge_prop_payload(1, 2, 3, 4, &PropValue::F64(0.9));
    let parsed = parse_edge_prop_payload(&payload, true).unwrap();
    assert_eq!((parsed.src, parsed.etype, parsed.dst, parsed.propkey), (1, 2, 3, 4));
    assert_eq!(parsed.value, Some(PropValue::F64(0.9)));

    let del = build_del_edge_prop_payload(1, 2, 3, 4);
    let parsed = parse_edge_prop_payload(&del, false).unwrap();
    assert_eq!(parsed.value, None);
  }
}
