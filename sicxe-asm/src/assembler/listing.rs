use super::Assembler;
use crate::parser;
use std::fmt::Write;

fn address_hex(address: Option<u32>) -> String {
  match address {
    Some(value) => format!("{:X}", value),
    None => "0".to_string(),
  }
}

impl Assembler<'_> {
  /// The `.lst` text: one line per record, the flushed literal pool, then
  /// the symbol table in ascending name order.
  pub(crate) fn listing_text(&self) -> String {
    let mut out = String::new();
    for record in &self.records {
      let fields = parser::split_fields(&record.source, self.catalog);
      let (label, opcode, operand) = match fields {
        Some(f) => (
          f.label.map(|l| format!("{}:", l)).unwrap_or_default(),
          f.opcode.unwrap_or_default(),
          f.operand.unwrap_or_default(),
        ),
        None => (String::new(), String::new(), String::new()),
      };
      let _ = writeln!(
        out,
        "{:05X} {:<8}{:<8}{:<15}{}",
        record.locctr, label, opcode, operand, record.object_code
      );
    }
    for literal in self.literals.iter() {
      if let Some(address) = literal.address {
        let _ = writeln!(
          out,
          "{:05X} {:<8}{:<8}{:<15}{}",
          address,
          "",
          "*",
          literal.key,
          literal.value_hex()
        );
      }
    }

    out.push_str("\nSYMBOL TABLE\n");
    out.push_str("SYMBOL VALUE RFLAG MFLAG IOFLAG\n");
    let mut names: Vec<&str> = self.symbols.iter().map(|s| s.name.as_str()).collect();
    names.sort_unstable();
    for name in names {
      // Sorted names all come from the table.
      let Some(entry) = self.symbols.get(name) else {
        continue;
      };
      let _ = writeln!(
        out,
        "{} {:<4} {:<5} {:<5} {}",
        entry.name,
        address_hex(entry.address),
        if entry.relative { "TRUE" } else { "FALSE" },
        "FALSE",
        if entry.external { "EXTERNAL" } else { "INTERNAL" }
      );
    }
    out
  }

  /// The diagnostic intermediate file: the pass-1 records, the program
  /// length, and the symbol and literal tables in definition order.
  pub(crate) fn intermediate_text(&self) -> String {
    let mut out = String::new();
    for record in &self.records {
      let _ = writeln!(out, "{:04}\t{:04X}\t{}", record.line_no, record.locctr, record.source);
    }
    let _ = writeln!(out, "\nProgram Length: {:04X}", self.program_length);

    out.push_str("\nSymbol Table:\n");
    out.push_str("SYMBOL\tValue\tRFLAG\tMFLAG\tIOFLAG\n");
    for entry in self.symbols.iter() {
      let _ = writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}",
        entry.name,
        address_hex(entry.address),
        if entry.relative { "TRUE" } else { "FALSE" },
        "FALSE",
        if entry.external { "EXTERNAL" } else { "INTERNAL" }
      );
    }

    out.push_str("\nLiteral Table:\n");
    out.push_str("LITERAL\tVALUE\tLENGTH\tADDRESS\n");
    for literal in self.literals.iter() {
      let _ = writeln!(
        out,
        "{}\t{}\t{}\t{}",
        literal.key,
        literal.value_hex(),
        literal.len(),
        address_hex(literal.address)
      );
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use crate::assembler::Assembler;
  use crate::catalog::OpcodeTable;

  #[test]
  fn listing_lines_carry_address_fields_and_object_code() {
    let catalog = OpcodeTable::load(None).unwrap();
    let assembly =
      Assembler::assemble(&catalog, "PROG START 1000\nFIRST LDA FIVE\nFIVE WORD 5\nEND FIRST\n");
    let lines: Vec<&str> = assembly.listing.lines().collect();
    assert_eq!(lines[0], "01000 PROG:   START   1000           ");
    assert_eq!(lines[1], "01000 FIRST:  LDA     FIVE           032000");
    assert_eq!(lines[2], "01003 FIVE:   WORD    5              000005");
    assert_eq!(lines[3], "01006         END     FIRST          ");
  }

  #[test]
  fn listing_symbol_table_is_sorted_and_flagged() {
    let catalog = OpcodeTable::load(None).unwrap();
    let assembly = Assembler::assemble(
      &catalog,
      "PROG START 1000\nEXTREF ZETA\nALPHA WORD 1\nEND\n",
    );
    let tail: Vec<&str> = assembly
      .listing
      .lines()
      .skip_while(|l| *l != "SYMBOL TABLE")
      .collect();
    assert_eq!(tail[1], "SYMBOL VALUE RFLAG MFLAG IOFLAG");
    assert_eq!(tail[2], "ALPHA 1000 TRUE  FALSE INTERNAL");
    assert_eq!(tail[3], "PROG 1000 TRUE  FALSE INTERNAL");
    assert_eq!(tail[4], "ZETA 0    FALSE FALSE EXTERNAL");
  }

  #[test]
  fn listing_shows_the_literal_pool_after_the_program() {
    let catalog = OpcodeTable::load(None).unwrap();
    let assembly = Assembler::assemble(&catalog, "P START 0\nLDCH =X'F1'\nEND\n");
    assert!(assembly.listing.contains("00003         *       =X'F1'         F1"));
  }

  #[test]
  fn intermediate_has_line_numbers_addresses_and_tables() {
    let catalog = OpcodeTable::load(None).unwrap();
    let assembly =
      Assembler::assemble(&catalog, "PROG START 1000\nFIRST LDA FIVE\nFIVE WORD 5\nEND FIRST\n");
    let lines: Vec<&str> = assembly.intermediate.lines().collect();
    assert_eq!(lines[0], "0001\t1000\tPROG START 1000");
    assert_eq!(lines[1], "0002\t1000\tFIRST LDA FIVE");
    assert_eq!(lines[2], "0003\t1003\tFIVE WORD 5");
    assert_eq!(lines[3], "0004\t1006\tEND FIRST");
    assert!(assembly.intermediate.contains("Program Length: 0006"));
    assert!(assembly.intermediate.contains("Symbol Table:"));
    assert!(assembly.intermediate.contains("Literal Table:"));
  }
}
