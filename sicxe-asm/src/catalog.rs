use crate::error::Error;
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// The SIC/XE instruction set shipped with the assembler. An external
/// catalog file in the same format can be substituted on the command line.
const DEFAULT_CATALOG: &str = include_str!("../resources/opcodes.txt");

/// Format class as listed in the catalog. Format 4 never appears here: it
/// is the extended form of a format-3 instruction, selected in source with
/// a `+` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
  One,
  Two,
  Three,
}

impl FormatClass {
  /// Instruction size in bytes.
  pub fn size(self) -> u32 {
    match self {
      FormatClass::One => 1,
      FormatClass::Two => 2,
      FormatClass::Three => 3,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
  pub opcode: u8,
  pub format: FormatClass,
}

/// Immutable mnemonic lookup table, loaded once per run.
#[derive(Debug, Clone)]
pub struct OpcodeTable {
  entries: HashMap<String, OpcodeInfo>,
}

impl OpcodeTable {
  /// Parses catalog text: one `MNEMONIC FORMAT OPCODE-HEX` entry per line,
  /// blank lines and `#` comments ignored.
  pub fn parse(text: &str) -> Result<Self, Error> {
    let mut entries = HashMap::new();
    for (idx, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let parts: Vec<&str> = line.split_whitespace().collect();
      if parts.len() < 3 {
        return Err(Error::Catalog {
          line: idx + 1,
          reason: format!("expected 'MNEMONIC FORMAT OPCODE', got '{}'", line),
        });
      }
      let format = match parts[1] {
        "1" => FormatClass::One,
        "2" => FormatClass::Two,
        "3" => FormatClass::Three,
        other => {
          return Err(Error::Catalog {
            line: idx + 1,
            reason: format!("unknown format class '{}'", other),
          });
        }
      };
      let opcode = u8::from_str_radix(parts[2], 16).map_err(|_| Error::Catalog {
        line: idx + 1,
        reason: format!("bad opcode byte '{}'", parts[2]),
      })?;
      entries.insert(parts[0].to_uppercase(), OpcodeInfo { opcode, format });
    }
    debug!("Loaded {} opcode entries", entries.len());
    Ok(OpcodeTable { entries })
  }

  /// Loads the catalog from `path`, or the embedded default when `None`.
  pub fn load(path: Option<&Path>) -> Result<Self, Error> {
    match path {
      Some(p) => {
        let text = fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
        Self::parse(&text)
      }
      None => Self::parse(DEFAULT_CATALOG),
    }
  }

  /// Case-insensitive lookup. The `+` format-4 prefix must already be
  /// stripped by the caller.
  pub fn get(&self, mnemonic: &str) -> Option<&OpcodeInfo> {
    self.entries.get(&mnemonic.to_uppercase())
  }

  pub fn contains(&self, mnemonic: &str) -> bool {
    self.get(mnemonic).is_some()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
