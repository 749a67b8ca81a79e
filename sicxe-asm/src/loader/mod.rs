use crate::error::Error;
use crate::object::{ModSign, ObjectProgram};
use log::{debug, warn};
use serde::Deserialize;
use std::fmt::Write;
use std::fs;
use std::path::Path;

pub mod memory;

use memory::MemoryImage;

/// Default load address when none is given on the command line.
pub const DEFAULT_LOAD_ADDRESS: u32 = 0x3300;

/// One entry of the external symbol table, in definition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstabEntry {
  pub name: String,
  pub address: u32,
}

/// A loaded control section: program name, its relocated address, and its
/// length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSection {
  pub name: String,
  pub address: u32,
  pub length: u32,
}

/// Linking loader: relocates object programs into contiguous memory from
/// the load address, resolves external references through the ESTAB, and
/// applies modification records.
pub struct Loader {
  load_address: u32,
  programs: Vec<ObjectProgram>,
  estab: Vec<EstabEntry>,
  csects: Vec<ControlSection>,
  memory: MemoryImage,
  execution_address: Option<u32>,
  warnings: Vec<String>,
}

impl Loader {
  pub fn new(load_address: u32) -> Self {
    Loader {
      load_address,
      programs: Vec::new(),
      estab: Vec::new(),
      csects: Vec::new(),
      memory: MemoryImage::default(),
      execution_address: None,
      warnings: Vec::new(),
    }
  }

  /// Queues a program; programs relocate in the order they were added.
  pub fn add_program(&mut self, program: ObjectProgram) {
    debug!(
      "Queued program '{}': length {:04X}, {} text records, {} modifications",
      program.name,
      program.length,
      program.text_records.len(),
      program.modifications.len()
    );
    self.programs.push(program);
  }

  /// Runs both loader passes.
  pub fn link(&mut self) {
    self.first_pass();
    self.second_pass();
  }

  /// Pass 1: walks the programs once, assigning each its relocation and
  /// entering the program name and every exported symbol into the ESTAB.
  fn first_pass(&mut self) {
    let mut cursor = self.load_address;
    for program in &self.programs {
      let relocation = cursor;
      if !program.name.trim().is_empty() {
        let name = program.name.clone();
        Self::enter_symbol(&mut self.estab, &mut self.warnings, &name, relocation);
        self.csects.push(ControlSection {
          name,
          address: relocation,
          length: program.length,
        });
      }
      for (symbol, offset) in &program.defines {
        Self::enter_symbol(
          &mut self.estab,
          &mut self.warnings,
          symbol,
          offset + relocation,
        );
      }
      cursor += program.length;
    }
  }

  fn enter_symbol(
    estab: &mut Vec<EstabEntry>,
    warnings: &mut Vec<String>,
    name: &str,
    address: u32,
  ) {
    if let Some(entry) = estab.iter_mut().find(|e| e.name == name) {
      let warning = format!("Warning: Duplicate external symbol '{}'.", name);
      warn!("{}", warning);
      warnings.push(warning);
      entry.address = address;
      return;
    }
    estab.push(EstabEntry { name: name.to_string(), address });
  }

  /// Pass 2: writes text records at their relocated addresses, applies
  /// modification records, and tracks the execution address. The last
  /// nonzero entry point wins.
  fn second_pass(&mut self) {
    let mut seen = Vec::new();
    for program in &self.programs {
      for reference in &program.references {
        if !seen.contains(reference) {
          seen.push(reference.clone());
        }
      }
    }
    for reference in &seen {
      if self.lookup(reference).is_none() {
        let warning = format!("Warning: Reference to undefined symbol '{}'.", reference);
        warn!("{}", warning);
        self.warnings.push(warning);
      }
    }

    let mut cursor = self.load_address;
    let mut execution_address = self.execution_address;
    let mut warnings = Vec::new();
    for program in &self.programs {
      let relocation = cursor;
      for record in &program.text_records {
        let mut address = record.start + relocation;
        for byte in record.bytes() {
          self.memory.set(address, byte);
          address += 1;
        }
      }
      for m in &program.modifications {
        let value = match self.estab.iter().find(|e| e.name == m.symbol) {
          Some(entry) => entry.address as i64,
          None => {
            let warning =
              format!("Warning: Modification symbol '{}' not found.", m.symbol);
            warn!("{}", warning);
            warnings.push(warning);
            0
          }
        };
        let delta = match m.sign {
          ModSign::Plus => value,
          ModSign::Minus => -value,
        };
        self.memory.adjust(m.address + relocation, m.half_bytes, delta);
      }
      if program.entry_point != 0 {
        execution_address = Some(program.entry_point + relocation);
      }
      cursor += program.length;
    }
    self.execution_address = execution_address;
    self.warnings.append(&mut warnings);
  }

  pub fn lookup(&self, name: &str) -> Option<u32> {
    self.estab.iter().find(|e| e.name == name).map(|e| e.address)
  }

  pub fn memory(&self) -> &MemoryImage {
    &self.memory
  }

  pub fn execution_address(&self) -> Option<u32> {
    self.execution_address
  }

  pub fn warnings(&self) -> &[String] {
    &self.warnings
  }

  /// The external symbol table dump: one block per control section with
  /// the symbols that fall inside it.
  pub fn symbol_table_report(&self) -> String {
    let mut out = String::new();
    out.push_str("Print The External Symbol Table\n");
    out.push_str("CSECT   SYMBOL   ADDR     CSADDR  LDADDR  LENGTH\n");
    for csect in &self.csects {
      let _ = writeln!(
        out,
        "{:<6}  {:<6}  {:<7}  {:04X}    {:<6}  {:06X}",
        csect.name, "$", "$", csect.address, "$", csect.length
      );
      for entry in &self.estab {
        if entry.name == csect.name {
          continue;
        }
        if entry.address >= csect.address && entry.address < csect.address + csect.length {
          let _ = writeln!(
            out,
            "{:<6}  {:<6}  {:<7}  {:<7}  {:<6}  {}",
            "$",
            entry.name,
            format!("{:06X}", entry.address - csect.address),
            "$",
            format!("{:04X}", entry.address),
            "$"
          );
        }
      }
    }
    out
  }

  /// The memory dump, or `None` when no text record wrote a byte.
  pub fn memory_report(&self) -> Option<String> {
    self.memory.dump(self.execution_address)
  }
}

/// TOML link file: an alternative to listing object files on the command
/// line.
#[derive(Debug, Deserialize)]
pub struct LinkFile {
  pub input_files: Vec<String>,
  pub output_file: Option<String>,
  pub load_address: Option<String>,
}

pub fn parse_link_file<P: AsRef<Path>>(path: P) -> Result<LinkFile, Error> {
  let path = path.as_ref();
  let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
  toml::from_str(&content).map_err(|e| Error::LinkFile {
    path: path.to_path_buf(),
    reason: e.to_string(),
  })
}
