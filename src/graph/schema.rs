//! Schema definitions: labels, edge types, property keys.
//!
//! Ids are dense small integers assigned at first definition and immutable
//! afterwards. `define_*` is idempotent by name; a definition becomes
//! durable with its transaction and is published to the shared name tables
//! at commit.

use crate::core::wal::record::{build_define_payload, WalRecordType};
use crate::error::Result;
use crate::graph::tx::TxHandle;
use crate::types::*;

fn pending_lookup<'a>(
  mut names: impl Iterator<Item = (&'a u32, &'a String)>,
  name: &str,
) -> Option<u32> {
  names
    .find(|(_, candidate)| candidate.as_str() == name)
    .map(|(&id, _)| id)
}

/// Define (or look up) a label by name.
pub fn define_label(handle: &mut TxHandle<'_>, name: &str) -> Result<LabelId> {
  if let Some(id) = handle.db().label_id(name) {
    return Ok(id);
  }
  if let Some(id) = pending_lookup(handle.state.pending.new_labels.iter(), name) {
    return Ok(id);
  }
  handle.require_writable()?;

  let id = handle.db().alloc_label_id();
  handle.push_record(WalRecordType::DefineLabel, build_define_payload(id, name));
  handle.state.pending.define_label(id, name);
  Ok(id)
}

/// Define (or look up) an edge type by name.
pub fn define_etype(handle: &mut TxHandle<'_>, name: &str) -> Result<ETypeId> {
  if let Some(id) = handle.db().etype_id(name) {
    return Ok(id);
  }
  if let Some(id) = pending_lookup(handle.state.pending.new_etypes.iter(), name) {
    return Ok(id);
  }
  handle.require_writable()?;

  let id = handle.db().alloc_etype_id();
  handle.push_record(WalRecordType::DefineEtype, build_define_payload(id, name));
  handle.state.pending.define_etype(id, name);
  Ok(id)
}

/// Define (or look up) a property key by name.
pub fn define_propkey(handle: &mut TxHandle<'_>, name: &str) -> Result<PropKeyId> {
  if let Some(id) = handle.db().propkey_id(name) {
    return Ok(id);
  }
  if let Some(id) = pending_lookup(handle.state.pending.new_propkeys.iter(), name) {
    return Ok(id);
  }
  handle.require_writable()?;

  let id = handle.db().alloc_propkey_id();
  handle.push_record(WalRecordType::DefinePropkey, build_define_payload(id, name));
  handle.state.pending.define_propkey(id, name);
  Ok(id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::db::{close_graph_db, open_graph_db, OpenOptions};
  use crate::graph::tx::{begin_tx, commit, rollback};
  use tempfile::tempdir;

  #[test]
  fn idempotent_by_name() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let person = define_label(&mut tx, "Person").unwrap();
    assert_eq!(define_label(&mut tx, "Person").unwrap(), person);
    let knows = define_etype(&mut tx, "KNOWS").unwrap();
    let name = define_propkey(&mut tx, "name").unwrap();
    commit(&mut tx).unwrap();

    // Published at commit; a later transaction resolves the same ids.
    let mut tx = begin_tx(&db).unwrap();
    assert_eq!(define_label(&mut tx, "Person").unwrap(), person);
    assert_eq!(define_etype(&mut tx, "KNOWS").unwrap(), knows);
    assert_eq!(define_propkey(&mut tx, "name").unwrap(), name);
    commit(&mut tx).unwrap();

    assert_eq!(db.label_name(person).as_deref(), Some("Person"));
    assert_eq!(db.etype_id("KNOWS"), Some(knows));
    close_graph_db(db).unwrap();
  }

  #[test]
  fn rolled_back_definitions_vanish() {
    let dir = tempdir().unwrap();
    let db = open_graph_db(dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    define_label(&mut tx, "Ghost").unwrap();
    rollback(&mut tx).unwrap();
    drop(tx);

    assert_eq!(db.label_id("Ghost"), None);
    close_graph_db(db).unwrap();
  }
}
