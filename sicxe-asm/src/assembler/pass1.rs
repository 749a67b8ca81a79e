use super::{Assembler, BaseBinding, IntermediateRecord};
use crate::ast::{Directive, RawFields};
use crate::error::LineErrorKind;
use crate::parser;
use log::debug;

impl Assembler<'_> {
  /// Pass 1: assigns an address to every label, builds the symbol and
  /// literal tables, sizes every line, and records the intermediate
  /// stream. Ends by flushing the literal pool and fixing the program
  /// length.
  pub(crate) fn first_pass(&mut self, source: &str) {
    for (idx, raw_line) in source.lines().enumerate() {
      let line_no = idx + 1;
      let trimmed = raw_line.trim();
      if trimmed.is_empty() || trimmed.starts_with('.') || trimmed.starts_with(';') {
        continue;
      }
      let line = parser::strip_comment(trimmed).trim();
      if line.is_empty() {
        continue;
      }
      let Some(fields) = parser::split_fields(line, self.catalog) else {
        continue;
      };
      let directive = fields.opcode.as_deref().and_then(Directive::parse);

      if directive == Some(Directive::Start) && !self.start_seen && fields.operand.is_some() {
        self.handle_start(line_no, line, &fields);
        continue;
      }

      if let Some(label) = &fields.label
        && directive != Some(Directive::Equ)
      {
        if let Err(kind) = self.symbols.define(label, self.locctr, true) {
          self.report(line_no, kind);
          continue;
        }
      }

      self.records.push(IntermediateRecord {
        line_no,
        locctr: self.locctr,
        source: line.to_string(),
        object_code: String::new(),
      });

      if directive == Some(Directive::End) {
        break;
      }
      match directive {
        Some(d) => self.size_directive(line_no, &fields, d),
        None => self.size_instruction(line_no, &fields),
      }
    }

    self.literals.flush(&mut self.locctr);
    self.program_length = self.locctr.saturating_sub(self.start_address);
    debug!(
      "Pass 1 complete: {} records, program length {:04X}",
      self.records.len(),
      self.program_length
    );
  }

  fn handle_start(&mut self, line_no: usize, line: &str, fields: &RawFields) {
    let operand = fields.operand.as_deref().unwrap_or_default();
    let text = operand.trim().trim_start_matches('#');
    let Ok(address) = u32::from_str_radix(text, 16) else {
      self.report(line_no, LineErrorKind::MalformedOperand(operand.to_string()));
      return;
    };
    self.start_address = address;
    self.locctr = address;
    self.start_seen = true;
    if let Some(label) = &fields.label {
      match self.symbols.define(label, address, true) {
        Ok(()) => self.program_name = label.clone(),
        Err(kind) => self.report(line_no, kind),
      }
    }
    self.records.push(IntermediateRecord {
      line_no,
      locctr: self.locctr,
      source: line.to_string(),
      object_code: String::new(),
    });
  }

  fn size_directive(&mut self, line_no: usize, fields: &RawFields, directive: Directive) {
    let operand = fields.operand.as_deref();
    match directive {
      Directive::Byte => match operand {
        Some(op) => match parser::parse_byte_spec(op.trim()) {
          Ok(spec) => self.locctr += spec.bytes.len() as u32,
          Err(kind) => self.report(line_no, kind),
        },
        None => self.report(line_no, missing("BYTE needs a value")),
      },
      Directive::Word => self.locctr += 3,
      Directive::Resb => match self.parse_count(operand) {
        Some(n) => self.locctr += n,
        None => self.report(line_no, missing("RESB needs a byte count")),
      },
      Directive::Resw => match self.parse_count(operand) {
        Some(n) => self.locctr += 3 * n,
        None => self.report(line_no, missing("RESW needs a word count")),
      },
      Directive::Base => match operand {
        Some(op) => self.base = BaseBinding::Pending(op.trim().to_uppercase()),
        None => self.report(line_no, missing("BASE needs a symbol")),
      },
      Directive::Equ => self.handle_equ(line_no, fields),
      Directive::Extdef => match operand {
        Some(op) => {
          for sym in op.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            self.symbols.declare_extdef(sym);
          }
        }
        None => self.report(line_no, missing("EXTDEF needs symbols")),
      },
      Directive::Extref => match operand {
        Some(op) => {
          for sym in op.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            self.symbols.declare_extref(sym);
          }
        }
        None => self.report(line_no, missing("EXTREF needs symbols")),
      },
      // A second START or a stray END operand changes nothing here.
      Directive::Start | Directive::End => {}
    }
  }

  fn size_instruction(&mut self, line_no: usize, fields: &RawFields) {
    let Some(opcode) = fields.opcode.as_deref() else {
      return;
    };
    if let Some(bare) = opcode.strip_prefix('+') {
      if self.catalog.contains(bare) {
        self.locctr += 4;
      } else {
        self.report(line_no, LineErrorKind::UnknownMnemonic(opcode.to_string()));
        return;
      }
    } else if let Some(info) = self.catalog.get(opcode) {
      self.locctr += info.format.size();
    } else {
      self.report(line_no, LineErrorKind::UnknownMnemonic(opcode.to_string()));
      return;
    }

    // Literal operands are pooled on first sight. Directives never get
    // here, so they cannot enqueue literals.
    if let Some(op) = fields.operand.as_deref() {
      let op = op.trim();
      if op.starts_with('=') {
        match parser::parse_literal(op) {
          Ok((key, spec)) => self.literals.intern(&key, spec.bytes),
          Err(kind) => self.report(line_no, kind),
        }
      }
    }
  }

  fn handle_equ(&mut self, line_no: usize, fields: &RawFields) {
    let Some(label) = fields.label.clone() else {
      self.report(line_no, missing("EQU needs a label"));
      return;
    };
    let Some(operand) = fields.operand.as_deref() else {
      self.report(line_no, missing("EQU needs a value"));
      return;
    };
    let result = parser::parse_expr(operand.trim())
      .and_then(|expr| super::eval::eval_equ(&expr, &self.symbols, self.locctr));
    match result {
      Ok((value, relative)) => {
        if let Err(kind) = self.symbols.define(&label, value as u32, relative) {
          self.report(line_no, kind);
        }
      }
      Err(kind) => self.report(line_no, kind),
    }
  }

  fn parse_count(&self, operand: Option<&str>) -> Option<u32> {
    operand
      .map(|op| op.trim().trim_start_matches('#'))
      .and_then(|text| text.parse().ok())
  }
}

fn missing(what: &str) -> LineErrorKind {
  LineErrorKind::MissingOperand(what.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::OpcodeTable;

  fn pass1(source: &str) -> Assembler<'static> {
    // The catalog is immutable; leaking one per test keeps the borrows simple.
    let catalog = Box::leak(Box::new(OpcodeTable::load(None).unwrap()));
    let mut assembler = Assembler::new(catalog);
    assembler.first_pass(source);
    assembler
  }

  #[test]
  fn start_sets_name_start_address_and_symbol() {
    let asm = pass1("PROG START 1000\nFIRST LDA FIVE\nFIVE WORD 5\nEND FIRST\n");
    assert_eq!(asm.start_address, 0x1000);
    assert_eq!(asm.program_name, "PROG");
    assert_eq!(asm.symbols.get("PROG").unwrap().address, Some(0x1000));
    assert_eq!(asm.symbols.get("FIRST").unwrap().address, Some(0x1000));
    assert_eq!(asm.symbols.get("FIVE").unwrap().address, Some(0x1003));
    assert_eq!(asm.program_length(), 6);
  }

  #[test]
  fn directives_advance_the_location_counter() {
    let asm = pass1(
      "P START 0\nA RESB 4\nB RESW 2\nC BYTE C'EOF'\nD BYTE X'F1'\nE WORD 9\nEND\n",
    );
    assert_eq!(asm.symbols.get("A").unwrap().address, Some(0));
    assert_eq!(asm.symbols.get("B").unwrap().address, Some(4));
    assert_eq!(asm.symbols.get("C").unwrap().address, Some(10));
    assert_eq!(asm.symbols.get("D").unwrap().address, Some(13));
    assert_eq!(asm.symbols.get("E").unwrap().address, Some(14));
    assert_eq!(asm.program_length(), 17);
  }

  #[test]
  fn extended_instructions_take_four_bytes() {
    let asm = pass1("P START 0\n+LDA ALPHA\nALPHA WORD 1\nEND\n");
    assert_eq!(asm.symbols.get("ALPHA").unwrap().address, Some(4));
  }

  #[test]
  fn equ_star_records_the_location_counter() {
    let asm = pass1("P START 1230\nRESB 4\nHERE EQU *\nEND\n");
    let here = asm.symbols.get("HERE").unwrap();
    assert_eq!(here.address, Some(0x1234));
    assert!(here.relative);
  }

  #[test]
  fn equ_expression_uses_prior_symbols() {
    let asm = pass1("P START 0\nBUFFER RESB 4096\nBUFEND EQU *\nMAXLEN EQU BUFEND-BUFFER\nEND\n");
    let maxlen = asm.symbols.get("MAXLEN").unwrap();
    assert_eq!(maxlen.address, Some(4096));
    assert!(!maxlen.relative);
  }

  #[test]
  fn repeated_literal_is_pooled_once_at_program_end() {
    let asm = pass1("P START 0\nLDA =X'F1'\nLDCH =X'F1'\nEND\n");
    let entry = asm.literals.get("=X'F1'").unwrap();
    assert_eq!(entry.address, Some(6));
    assert_eq!(entry.len(), 1);
    assert_eq!(asm.program_length(), 7);
  }

  #[test]
  fn literal_forms_share_one_key() {
    let asm = pass1("P START 0\nLDA =X'F1'\nLDCH =0Xf1\nEND\n");
    assert_eq!(asm.literals.iter().count(), 1);
  }

  #[test]
  fn redefined_symbol_is_a_line_error_and_line_is_skipped() {
    let asm = pass1("P START 0\nA WORD 1\nA WORD 2\nEND\n");
    assert_eq!(asm.errors().len(), 1);
    assert!(matches!(
      asm.errors()[0].kind,
      LineErrorKind::DuplicateSymbol(_)
    ));
    // The duplicate line consumed no address.
    assert_eq!(asm.program_length(), 3);
  }

  #[test]
  fn unknown_mnemonic_is_reported_and_consumes_no_space() {
    let asm = pass1("P START 0\nFROB ALPHA\nALPHA WORD 1\nEND\n");
    assert!(matches!(
      asm.errors()[0].kind,
      LineErrorKind::UnknownMnemonic(_)
    ));
    assert_eq!(asm.symbols.get("ALPHA").unwrap().address, Some(0));
  }

  #[test]
  fn extref_symbols_are_external_and_not_relative() {
    let asm = pass1("P START 0\nEXTREF RDREC, WRREC\nEND\n");
    let entry = asm.symbols.get("RDREC").unwrap();
    assert!(entry.external);
    assert!(entry.referenced);
    assert!(!entry.relative);
    assert!(asm.symbols.get("WRREC").is_some());
  }

  #[test]
  fn base_directive_records_a_pending_symbol() {
    let asm = pass1("P START 0\nBASE LENGTH\nLENGTH WORD 0\nEND\n");
    assert_eq!(asm.base, BaseBinding::Pending("LENGTH".to_string()));
  }

  #[test]
  fn comment_lines_produce_no_records() {
    let asm = pass1("P START 0\n. full comment\n; other comment\nWORD 1\nEND\n");
    assert_eq!(asm.records.len(), 3);
  }

  #[test]
  fn end_stops_the_pass() {
    let asm = pass1("P START 0\nEND\nWORD 1\n");
    assert_eq!(asm.program_length(), 0);
  }
}
