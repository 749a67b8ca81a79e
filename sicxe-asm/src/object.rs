//! Object-program model shared by the assembler (writer) and the loader
//! (reader). Records are caret-delimited text, one per line, with uppercase
//! hex fields:
//!
//! ```text
//! H^NAME^startAddr(6)^length(6)
//! D^sym^addr(6)^sym^addr(6)…
//! R^sym^sym…
//! T^startAddr(6)^byteCount(2)^code^code…
//! M^addr(6)^halfBytes(2)^{+|-}symbol
//! E^entryAddr(6)
//! ```

use crate::common::{ReadResource, WriteResource};
use log::warn;
use std::io::{self, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModSign {
  Plus,
  Minus,
}

impl ModSign {
  fn as_char(self) -> char {
    match self {
      ModSign::Plus => '+',
      ModSign::Minus => '-',
    }
  }
}

/// A typed modification record: add or subtract a symbol's resolved value
/// into `half_bytes` nibbles of memory at `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationRecord {
  pub address: u32,
  pub half_bytes: u8,
  pub sign: ModSign,
  pub symbol: String,
}

/// A text record: contiguous object code starting at `start`. The code
/// pieces are kept as the assembler emitted them so the serialised record
/// preserves per-line caret boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
  pub start: u32,
  pub codes: Vec<String>,
}

impl TextRecord {
  pub fn byte_len(&self) -> u32 {
    self.codes.iter().map(|c| c.len() as u32 / 2).sum()
  }

  /// Decodes the concatenated code pieces. Pieces are validated on parse,
  /// so undecodable digits cannot occur here; they fall back to zero.
  pub fn bytes(&self) -> Vec<u8> {
    let mut out = Vec::new();
    for code in &self.codes {
      for chunk in code.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(chunk).unwrap_or("00");
        out.push(u8::from_str_radix(pair, 16).unwrap_or(0));
      }
    }
    out
  }
}

/// One relocatable object program, as written by pass 2 and consumed by
/// the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectProgram {
  pub name: String,
  pub start_address: u32,
  pub length: u32,
  pub defines: Vec<(String, u32)>,
  pub references: Vec<String>,
  pub text_records: Vec<TextRecord>,
  pub modifications: Vec<ModificationRecord>,
  pub entry_point: u32,
}

impl WriteResource for ObjectProgram {
  fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
    writeln!(
      writer,
      "H^{}^{:06X}^{:06X}",
      self.name, self.start_address, self.length
    )?;
    if !self.defines.is_empty() {
      write!(writer, "D")?;
      for (sym, addr) in &self.defines {
        write!(writer, "^{}^{:06X}", sym, addr)?;
      }
      writeln!(writer)?;
    }
    if !self.references.is_empty() {
      write!(writer, "R")?;
      for sym in &self.references {
        write!(writer, "^{}", sym)?;
      }
      writeln!(writer)?;
    }
    for record in &self.text_records {
      write!(writer, "T^{:06X}^{:02X}", record.start, record.byte_len())?;
      for code in &record.codes {
        write!(writer, "^{}", code)?;
      }
      writeln!(writer)?;
    }
    for m in &self.modifications {
      writeln!(
        writer,
        "M^{:06X}^{:02X}^{}{}",
        m.address,
        m.half_bytes,
        m.sign.as_char(),
        m.symbol
      )?;
    }
    writeln!(writer, "E^{:06X}", self.entry_point)?;
    Ok(())
  }
}

impl ReadResource for ObjectProgram {
  fn read_from(reader: &mut dyn Read) -> io::Result<Self> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    Ok(Self::parse(&text))
  }
}

fn parse_hex(field: &str) -> Option<u32> {
  u32::from_str_radix(field.trim(), 16).ok()
}

fn is_hex(code: &str) -> bool {
  !code.is_empty() && code.len() % 2 == 0 && code.bytes().all(|b| b.is_ascii_hexdigit())
}

impl ObjectProgram {
  /// Parses object-program text. Malformed records are skipped with a
  /// warning; the loader treats them as recoverable.
  pub fn parse(text: &str) -> Self {
    let mut program = ObjectProgram::default();
    for line in text.lines() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let fields: Vec<&str> = line.split('^').collect();
      match fields[0] {
        "H" => {
          if fields.len() < 4 {
            warn!("Skipping short H record: {}", line);
            continue;
          }
          match (parse_hex(fields[2]), parse_hex(fields[3])) {
            (Some(start), Some(length)) => {
              program.name = fields[1].trim().to_uppercase();
              program.start_address = start;
              program.length = length;
            }
            _ => warn!("Skipping malformed H record: {}", line),
          }
        }
        "D" => {
          let mut pairs = fields[1..].chunks(2);
          for chunk in &mut pairs {
            if chunk.len() < 2 {
              warn!("Dangling symbol in D record: {}", line);
              break;
            }
            match parse_hex(chunk[1]) {
              Some(addr) => program
                .defines
                .push((chunk[0].trim().to_uppercase(), addr)),
              None => warn!("Bad address in D record: {}", line),
            }
          }
        }
        "R" => {
          for sym in &fields[1..] {
            let sym = sym.trim();
            if !sym.is_empty() {
              program.references.push(sym.to_uppercase());
            }
          }
        }
        "T" => {
          if fields.len() < 4 {
            warn!("Skipping short T record: {}", line);
            continue;
          }
          let Some(start) = parse_hex(fields[1]) else {
            warn!("Bad start address in T record: {}", line);
            continue;
          };
          let Some(count) = parse_hex(fields[2]) else {
            warn!("Bad byte count in T record: {}", line);
            continue;
          };
          let codes: Vec<String> = fields[3..].iter().map(|c| c.trim().to_string()).collect();
          if codes.iter().any(|c| !is_hex(c)) {
            warn!("Skipping T record with non-hex code: {}", line);
            continue;
          }
          let record = TextRecord { start, codes };
          if record.byte_len() != count {
            warn!(
              "T record length field {:02X} disagrees with its {} code bytes",
              count,
              record.byte_len()
            );
          }
          program.text_records.push(record);
        }
        "M" => {
          if fields.len() < 4 {
            warn!("Skipping short M record: {}", line);
            continue;
          }
          let (Some(address), Some(half_bytes)) = (parse_hex(fields[1]), parse_hex(fields[2]))
          else {
            warn!("Skipping malformed M record: {}", line);
            continue;
          };
          let body = fields[3].trim();
          let sign = match body.chars().next() {
            Some('+') => ModSign::Plus,
            Some('-') => ModSign::Minus,
            _ => {
              warn!("M record without sign: {}", line);
              continue;
            }
          };
          program.modifications.push(ModificationRecord {
            address,
            half_bytes: half_bytes as u8,
            sign,
            symbol: body[1..].trim().to_uppercase(),
          });
        }
        "E" => {
          program.entry_point = fields
            .get(1)
            .and_then(|f| parse_hex(f))
            .unwrap_or(0);
        }
        _ => warn!("Skipping unknown record type: {}", line),
      }
    }
    program
  }

  /// Serialises the program to its record text.
  pub fn to_text(&self) -> String {
    let mut buffer = Vec::new();
    // Writing to a Vec cannot fail.
    let _ = self.write_to(&mut buffer);
    String::from_utf8(buffer).unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> ObjectProgram {
    ObjectProgram {
      name: "PROG".to_string(),
      start_address: 0x1000,
      length: 0x06,
      defines: vec![("FIVE".to_string(), 0x1003)],
      references: vec!["RDREC".to_string()],
      text_records: vec![TextRecord {
        start: 0x1000,
        codes: vec!["032000".to_string(), "000005".to_string()],
      }],
      modifications: vec![ModificationRecord {
        address: 0x1003,
        half_bytes: 6,
        sign: ModSign::Plus,
        symbol: "PROG".to_string(),
      }],
      entry_point: 0x1000,
    }
  }

  #[test]
  fn serialises_all_record_types() {
    let text = sample().to_text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "H^PROG^001000^000006");
    assert_eq!(lines[1], "D^FIVE^001003");
    assert_eq!(lines[2], "R^RDREC");
    assert_eq!(lines[3], "T^001000^06^032000^000005");
    assert_eq!(lines[4], "M^001003^06^+PROG");
    assert_eq!(lines[5], "E^001000");
  }

  #[test]
  fn omits_empty_d_and_r_records() {
    let program = ObjectProgram {
      name: "P".to_string(),
      ..ObjectProgram::default()
    };
    let text = program.to_text();
    assert!(!text.contains("\nD"));
    assert!(!text.contains("\nR"));
  }

  #[test]
  fn parse_round_trips() {
    let original = sample();
    let parsed = ObjectProgram::parse(&original.to_text());
    assert_eq!(parsed, original);
  }

  #[test]
  fn text_record_bytes_concatenate_pieces() {
    let record = TextRecord {
      start: 0,
      codes: vec!["0320".to_string(), "02".to_string()],
    };
    assert_eq!(record.byte_len(), 3);
    assert_eq!(record.bytes(), vec![0x03, 0x20, 0x02]);
  }

  #[test]
  fn malformed_records_are_skipped() {
    let program = ObjectProgram::parse("H^P^zz^10\nT^001000\nM^001000^06^PROG\nE^000000\n");
    assert_eq!(program.name, "");
    assert!(program.text_records.is_empty());
    assert!(program.modifications.is_empty());
  }

  #[test]
  fn entry_record_without_field_is_zero() {
    let program = ObjectProgram::parse("H^P^000000^000010\nE\n");
    assert_eq!(program.entry_point, 0);
  }
}
