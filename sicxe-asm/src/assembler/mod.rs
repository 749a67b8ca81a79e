use crate::catalog::OpcodeTable;
use crate::error::{LineError, LineErrorKind};
use crate::object::{ModificationRecord, ObjectProgram};
use log::error;
use std::collections::HashMap;

pub mod eval;
mod listing;
mod pass1;
mod pass2;

/// One assembler symbol. `address` stays `None` for names only declared by
/// `EXTDEF`/`EXTREF`; `relative` marks addresses that move with the load
/// address; `extdef` exports the symbol, `external` imports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
  pub name: String,
  pub address: Option<u32>,
  pub relative: bool,
  pub extdef: bool,
  pub external: bool,
  pub referenced: bool,
}

/// Symbol table preserving definition order, with name lookup on the side.
#[derive(Debug, Default)]
pub struct SymbolTable {
  entries: Vec<SymbolEntry>,
  index: HashMap<String, usize>,
}

impl SymbolTable {
  pub fn get(&self, name: &str) -> Option<&SymbolEntry> {
    let key = name.to_uppercase();
    self.index.get(&key).map(|&i| &self.entries[i])
  }

  pub fn iter(&self) -> impl Iterator<Item = &SymbolEntry> {
    self.entries.iter()
  }

  /// Binds `name` to an address. Declaring over an `EXTDEF` forward
  /// declaration fills in its address; anything already bound, or declared
  /// imported via `EXTREF`, is a redefinition.
  pub fn define(
    &mut self,
    name: &str,
    address: u32,
    relative: bool,
  ) -> Result<(), LineErrorKind> {
    let key = name.to_uppercase();
    if let Some(&i) = self.index.get(&key) {
      let entry = &mut self.entries[i];
      if entry.external || entry.address.is_some() {
        return Err(LineErrorKind::DuplicateSymbol(key));
      }
      entry.address = Some(address);
      entry.relative = relative;
      return Ok(());
    }
    self.insert(SymbolEntry {
      name: key,
      address: Some(address),
      relative,
      extdef: false,
      external: false,
      referenced: false,
    });
    Ok(())
  }

  /// Marks `name` as exported, creating an unresolved entry if needed.
  pub fn declare_extdef(&mut self, name: &str) {
    let key = name.to_uppercase();
    if let Some(&i) = self.index.get(&key) {
      let entry = &mut self.entries[i];
      entry.extdef = true;
      entry.relative = true;
      return;
    }
    self.insert(SymbolEntry {
      name: key,
      address: None,
      relative: true,
      extdef: true,
      external: false,
      referenced: false,
    });
  }

  /// Marks `name` as imported. Imported symbols have no local address and
  /// assemble as zero with a modification record.
  pub fn declare_extref(&mut self, name: &str) {
    let key = name.to_uppercase();
    if let Some(&i) = self.index.get(&key) {
      let entry = &mut self.entries[i];
      entry.external = true;
      entry.referenced = true;
      return;
    }
    self.insert(SymbolEntry {
      name: key,
      address: None,
      relative: false,
      extdef: false,
      external: true,
      referenced: true,
    });
  }

  fn insert(&mut self, entry: SymbolEntry) {
    self.index.insert(entry.name.clone(), self.entries.len());
    self.entries.push(entry);
  }
}

/// A pooled literal. The key is the canonical `=C'…'` / `=X'…'` spelling;
/// the address stays unresolved until the pool flush at end of program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralEntry {
  pub key: String,
  pub bytes: Vec<u8>,
  pub address: Option<u32>,
}

impl LiteralEntry {
  pub fn len(&self) -> u32 {
    self.bytes.len() as u32
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  pub fn value_hex(&self) -> String {
    self.bytes.iter().map(|b| format!("{:02X}", b)).collect()
  }
}

/// Literal table in first-seen order; the whole table is the pending queue
/// since the pool flushes exactly once.
#[derive(Debug, Default)]
pub struct LiteralTable {
  entries: Vec<LiteralEntry>,
  index: HashMap<String, usize>,
}

impl LiteralTable {
  /// Enqueues a literal on first sight; later occurrences reuse the entry.
  pub fn intern(&mut self, key: &str, bytes: Vec<u8>) {
    if self.index.contains_key(key) {
      return;
    }
    self.index.insert(key.to_string(), self.entries.len());
    self.entries.push(LiteralEntry {
      key: key.to_string(),
      bytes,
      address: None,
    });
  }

  pub fn get(&self, key: &str) -> Option<&LiteralEntry> {
    self.index.get(key).map(|&i| &self.entries[i])
  }

  pub fn iter(&self) -> impl Iterator<Item = &LiteralEntry> {
    self.entries.iter()
  }

  /// Drains the pending queue: assigns each unplaced literal the current
  /// location counter and advances it by the literal's length.
  pub fn flush(&mut self, locctr: &mut u32) {
    for entry in &mut self.entries {
      if entry.address.is_none() {
        entry.address = Some(*locctr);
        *locctr += entry.bytes.len() as u32;
      }
    }
  }
}

/// The `BASE` directive binding consulted during displacement selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseBinding {
  Unbound,
  /// Symbolic reference recorded in pass 1, resolved before pass 2.
  Pending(String),
  Bound(u32),
}

/// One non-comment source line with the address it was assigned in pass 1.
/// Pass 2 fills in the object code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateRecord {
  pub line_no: usize,
  pub locctr: u32,
  pub source: String,
  pub object_code: String,
}

/// Everything one assembly run produces.
#[derive(Debug)]
pub struct Assembly {
  pub object: ObjectProgram,
  pub listing: String,
  pub intermediate: String,
  pub errors: Vec<LineError>,
}

/// Two-pass assembler state. All tables live here; nothing survives the
/// run.
pub struct Assembler<'a> {
  catalog: &'a OpcodeTable,
  symbols: SymbolTable,
  literals: LiteralTable,
  locctr: u32,
  start_address: u32,
  start_seen: bool,
  program_name: String,
  program_length: u32,
  base: BaseBinding,
  records: Vec<IntermediateRecord>,
  modifications: Vec<ModificationRecord>,
  errors: Vec<LineError>,
}

impl<'a> Assembler<'a> {
  pub fn new(catalog: &'a OpcodeTable) -> Self {
    Assembler {
      catalog,
      symbols: SymbolTable::default(),
      literals: LiteralTable::default(),
      locctr: 0,
      start_address: 0,
      start_seen: false,
      program_name: String::new(),
      program_length: 0,
      base: BaseBinding::Unbound,
      records: Vec::new(),
      modifications: Vec::new(),
      errors: Vec::new(),
    }
  }

  /// Runs both passes over `source` and collects the outputs.
  pub fn assemble(catalog: &OpcodeTable, source: &str) -> Assembly {
    let mut assembler = Assembler::new(catalog);
    assembler.first_pass(source);
    assembler.second_pass();
    Assembly {
      object: assembler.object_program(),
      listing: assembler.listing_text(),
      intermediate: assembler.intermediate_text(),
      errors: assembler.errors,
    }
  }

  pub fn symbols(&self) -> &SymbolTable {
    &self.symbols
  }

  pub fn literals(&self) -> &LiteralTable {
    &self.literals
  }

  pub fn program_length(&self) -> u32 {
    self.program_length
  }

  pub fn errors(&self) -> &[LineError] {
    &self.errors
  }

  fn report(&mut self, line_no: usize, kind: LineErrorKind) {
    let err = LineError { line_no, kind };
    error!("{}", err);
    self.errors.push(err);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn define_then_redefine_is_an_error() {
    let mut table = SymbolTable::default();
    table.define("ALPHA", 0x1000, true).unwrap();
    assert_eq!(
      table.define("alpha", 0x2000, true),
      Err(LineErrorKind::DuplicateSymbol("ALPHA".to_string()))
    );
  }

  #[test]
  fn extdef_before_definition_keeps_export_flag() {
    let mut table = SymbolTable::default();
    table.declare_extdef("BUFFER");
    table.define("BUFFER", 0x1003, true).unwrap();
    let entry = table.get("BUFFER").unwrap();
    assert!(entry.extdef);
    assert_eq!(entry.address, Some(0x1003));
  }

  #[test]
  fn defining_an_extref_name_is_an_error() {
    let mut table = SymbolTable::default();
    table.declare_extref("RDREC");
    assert!(table.define("RDREC", 0x10, true).is_err());
  }

  #[test]
  fn literal_intern_deduplicates_by_key() {
    let mut table = LiteralTable::default();
    table.intern("=X'F1'", vec![0xF1]);
    table.intern("=X'F1'", vec![0xF1]);
    assert_eq!(table.iter().count(), 1);
  }

  #[test]
  fn literal_flush_assigns_sequential_addresses() {
    let mut table = LiteralTable::default();
    table.intern("=X'F1'", vec![0xF1]);
    table.intern("=C'EOF'", vec![0x45, 0x4F, 0x46]);
    let mut locctr = 0x2000;
    table.flush(&mut locctr);
    assert_eq!(table.get("=X'F1'").unwrap().address, Some(0x2000));
    assert_eq!(table.get("=C'EOF'").unwrap().address, Some(0x2001));
    assert_eq!(locctr, 0x2004);
  }
}
