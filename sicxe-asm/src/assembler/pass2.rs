use super::eval::{self, OperandValue};
use super::{Assembler, BaseBinding};
use crate::ast::{Directive, Expr, Operand, RegOperand};
use crate::catalog::{FormatClass, OpcodeInfo};
use crate::error::LineErrorKind;
use crate::object::{ModificationRecord, ObjectProgram, TextRecord};
use crate::parser;
use log::debug;

/// Maximum object-code bytes in one text record.
const TEXT_RECORD_CAPACITY: u32 = 30;

impl Assembler<'_> {
  /// Pass 2: walks the intermediate records, attaches object code, and
  /// accumulates modification records.
  pub(crate) fn second_pass(&mut self) {
    if let BaseBinding::Pending(name) = &self.base {
      self.base = match self.symbols.get(name).and_then(|e| e.address) {
        Some(address) => BaseBinding::Bound(address),
        None => BaseBinding::Unbound,
      };
    }

    for idx in 0..self.records.len() {
      let line_no = self.records[idx].line_no;
      let locctr = self.records[idx].locctr;
      let source = self.records[idx].source.clone();
      // Lines pass 1 already rejected keep their address but emit nothing.
      if self.errors.iter().any(|e| e.line_no == line_no) {
        continue;
      }
      let Some(fields) = parser::split_fields(&source, self.catalog) else {
        continue;
      };
      let Some(opcode) = fields.opcode else {
        continue;
      };
      let operand = fields.operand.as_deref().map(str::trim);

      let outcome = match Directive::parse(&opcode) {
        Some(Directive::Byte) => self.encode_byte(operand),
        Some(Directive::Word) => self.encode_word(operand, locctr),
        Some(_) => Ok(String::new()),
        None => self.encode_instruction(&opcode, operand, locctr),
      };
      match outcome {
        Ok(code) => self.records[idx].object_code = code,
        Err(kind) => self.report(line_no, kind),
      }
    }
    debug!("Pass 2 complete: {} modification records", self.modifications.len());
  }

  fn encode_byte(&self, operand: Option<&str>) -> Result<String, LineErrorKind> {
    let operand =
      operand.ok_or_else(|| LineErrorKind::MissingOperand("BYTE needs a value".to_string()))?;
    let spec = parser::parse_byte_spec(operand)?;
    Ok(spec.bytes.iter().map(|b| format!("{:02X}", b)).collect())
  }

  /// WORD: a 24-bit value, with one modification record per identifier in
  /// the expression — against the external name for imports, against the
  /// program name for everything local.
  fn encode_word(&mut self, operand: Option<&str>, locctr: u32) -> Result<String, LineErrorKind> {
    let operand =
      operand.ok_or_else(|| LineErrorKind::MissingOperand("WORD needs a value".to_string()))?;
    let expr = parser::parse_expr(operand)?;
    let value = eval::eval_operand(&expr, &self.symbols)?;
    self.push_modifications(&value, locctr, 6);
    Ok(format!("{:06X}", value.value & 0xFFFFFF))
  }

  fn encode_instruction(
    &mut self,
    opcode: &str,
    operand: Option<&str>,
    locctr: u32,
  ) -> Result<String, LineErrorKind> {
    let (bare, extended) = match opcode.strip_prefix('+') {
      Some(rest) => (rest, true),
      None => (opcode, false),
    };
    let info = *self
      .catalog
      .get(bare)
      .ok_or_else(|| LineErrorKind::UnknownMnemonic(opcode.to_string()))?;

    if extended {
      return self.encode_format4(info, operand, locctr);
    }
    match info.format {
      FormatClass::One => Ok(format!("{:02X}", info.opcode)),
      FormatClass::Two => self.encode_format2(info, operand),
      FormatClass::Three => self.encode_format3(info, operand, locctr),
    }
  }

  fn encode_format2(
    &self,
    info: OpcodeInfo,
    operand: Option<&str>,
  ) -> Result<String, LineErrorKind> {
    let operand = operand
      .ok_or_else(|| LineErrorKind::MissingOperand("format 2 needs registers".to_string()))?;
    let (first, second) = parser::parse_reg_operands(operand)?;
    let r1 = reg_nibble(&first)?;
    let r2 = match second {
      Some(slot) => reg_nibble(&slot)?,
      None => 0,
    };
    Ok(format!("{:02X}{:X}{:X}", info.opcode, r1 & 0xF, r2 & 0xF))
  }

  fn encode_format3(
    &mut self,
    info: OpcodeInfo,
    operand: Option<&str>,
    locctr: u32,
  ) -> Result<String, LineErrorKind> {
    let next_loc = locctr + 3;
    let parsed = operand.map(parser::parse_operand).transpose()?;
    let (ni, x_flag, body) = classify(parsed);
    let first_byte = (info.opcode & 0xFC) | ni;

    // Immediate with a pure decimal operand: PC-relative attempt against
    // the literal value, then the low 12 bits. No base fallback here; an
    // out-of-range immediate silently truncates.
    if let OperandBody::Expr(Expr::Num(n)) = &body
      && ni == 0b01
    {
      let n = *n;
      let pc_disp = n - next_loc as i64;
      let (disp, p_flag) = if (-2048..=2047).contains(&pc_disp) {
        ((pc_disp as i32 & 0xFFF) as u16, 1u8)
      } else {
        ((n & 0xFFF) as u16, 0u8)
      };
      let xbpe = (x_flag << 3) | (p_flag << 1);
      return Ok(format!("{:02X}{:X}{:03X}", first_byte, xbpe, disp));
    }

    let target = self.resolve_target(&body)?.0;
    let (disp, b_flag, p_flag) = select_displacement(target, next_loc, &self.base);
    let xbpe = (x_flag << 3) | (b_flag << 2) | (p_flag << 1);
    Ok(format!("{:02X}{:X}{:03X}", first_byte, xbpe, disp))
  }

  /// Format 4 carries the 20-bit absolute target. Every identifier in the
  /// address expression yields a 5-half-byte modification record at the
  /// address field, one byte past the instruction start.
  fn encode_format4(
    &mut self,
    info: OpcodeInfo,
    operand: Option<&str>,
    locctr: u32,
  ) -> Result<String, LineErrorKind> {
    let parsed = operand.map(parser::parse_operand).transpose()?;
    let (ni, x_flag, body) = classify(parsed);
    let first_byte = (info.opcode & 0xFC) | ni;
    let (target, value) = self.resolve_target(&body)?;
    if let Some(value) = value {
      self.push_modifications(&value, locctr + 1, 5);
    }
    let xbpe = (x_flag << 3) | 1;
    Ok(format!(
      "{:02X}{:X}{:05X}",
      first_byte,
      xbpe,
      target & 0xFFFFF
    ))
  }

  /// Resolves an operand body to its target address. Literal operands use
  /// the pool address and never produce expression terms.
  fn resolve_target(
    &self,
    body: &OperandBody,
  ) -> Result<(i64, Option<OperandValue>), LineErrorKind> {
    match body {
      OperandBody::None => Ok((0, None)),
      OperandBody::Literal(key) => {
        let address = self
          .literals
          .get(key)
          .and_then(|entry| entry.address)
          .ok_or_else(|| LineErrorKind::MalformedLiteral(key.clone()))?;
        Ok((address as i64, None))
      }
      OperandBody::Expr(expr) => {
        let value = eval::eval_operand(expr, &self.symbols)?;
        Ok((value.value, Some(value)))
      }
    }
  }

  fn push_modifications(&mut self, value: &OperandValue, address: u32, half_bytes: u8) {
    for term in &value.terms {
      let symbol = if term.external {
        term.symbol.clone()
      } else {
        self.program_name.to_uppercase()
      };
      self.modifications.push(ModificationRecord {
        address,
        half_bytes,
        sign: term.sign,
        symbol,
      });
    }
  }

  /// Assembles the object program from the pass-2 results and the flushed
  /// literal pool.
  pub(crate) fn object_program(&self) -> ObjectProgram {
    let name = if self.program_name.is_empty() {
      "      ".to_string()
    } else {
      let upper = self.program_name.to_uppercase();
      upper.chars().take(6).collect()
    };

    let defines = self
      .symbols
      .iter()
      .filter(|s| s.extdef)
      .filter_map(|s| s.address.map(|a| (s.name.clone(), a)))
      .collect();
    let references = self
      .symbols
      .iter()
      .filter(|s| s.external && s.referenced)
      .map(|s| s.name.clone())
      .collect();

    let mut builder = TextBuilder::default();
    for record in &self.records {
      builder.push(record.locctr, &record.object_code);
    }
    for literal in self.literals.iter() {
      if let Some(address) = literal.address {
        builder.push(address, &literal.value_hex());
      }
    }

    ObjectProgram {
      name,
      start_address: self.start_address,
      length: self.program_length,
      defines,
      references,
      text_records: builder.finish(),
      modifications: self.modifications.clone(),
      entry_point: self.start_address,
    }
  }
}

enum OperandBody {
  None,
  Expr(Expr),
  Literal(String),
}

/// Splits a parsed operand into its `n i` flags, the index flag, and the
/// addressing body.
fn classify(parsed: Option<Operand>) -> (u8, u8, OperandBody) {
  match parsed {
    None => (0b11, 0, OperandBody::None),
    Some(Operand::Immediate(expr)) => (0b01, 0, OperandBody::Expr(expr)),
    Some(Operand::Indirect(sym)) => (0b10, 0, OperandBody::Expr(Expr::Sym(sym))),
    Some(Operand::Simple(expr)) => (0b11, 0, OperandBody::Expr(expr)),
    Some(Operand::Indexed(expr)) => (0b11, 1, OperandBody::Expr(expr)),
    Some(Operand::Literal(key)) => (0b11, 0, OperandBody::Literal(key)),
  }
}

fn reg_nibble(slot: &RegOperand) -> Result<u8, LineErrorKind> {
  match slot {
    RegOperand::Value(n) => Ok(*n),
    RegOperand::Register(name) => register_number(name)
      .ok_or_else(|| LineErrorKind::UnknownRegister(name.clone())),
  }
}

fn register_number(name: &str) -> Option<u8> {
  match name {
    "A" => Some(0),
    "X" => Some(1),
    "L" => Some(2),
    "B" => Some(3),
    "S" => Some(4),
    "T" => Some(5),
    "F" => Some(6),
    "PC" => Some(8),
    "SW" => Some(9),
    _ => None,
  }
}

/// Displacement selection for format 3: PC-relative first, then
/// base-relative, then the bare low 12 bits of the target. Returns the
/// displacement and the `b` and `p` flags.
pub(crate) fn select_displacement(
  target: i64,
  next_loc: u32,
  base: &BaseBinding,
) -> (u16, u8, u8) {
  let pc_disp = target - next_loc as i64;
  if (-2048..=2047).contains(&pc_disp) {
    return ((pc_disp as i32 & 0xFFF) as u16, 0, 1);
  }
  if let BaseBinding::Bound(base_addr) = base {
    let base_disp = target - *base_addr as i64;
    if (0..=4095).contains(&base_disp) {
      return (base_disp as u16, 1, 0);
    }
  }
  ((target & 0xFFF) as u16, 0, 0)
}

/// Builds text records with an explicit cursor over the last emitted
/// address: any discontinuity, as well as 30-byte overflow, starts a new
/// record. An oversized single emission splits at the capacity boundary.
#[derive(Default)]
struct TextBuilder {
  records: Vec<TextRecord>,
  current: Option<TextRecord>,
  next_address: u32,
}

impl TextBuilder {
  fn push(&mut self, address: u32, code: &str) {
    if code.is_empty() {
      return;
    }
    let mut address = address;
    let mut rest = code;
    loop {
      let open_len = match &self.current {
        Some(record) if address == self.next_address => record.byte_len(),
        Some(_) => {
          self.flush();
          0
        }
        None => 0,
      };
      let room = (TEXT_RECORD_CAPACITY - open_len) as usize * 2;
      if rest.len() <= room {
        self.append(address, rest.to_string());
        return;
      }
      let (head, tail) = rest.split_at(room);
      if !head.is_empty() {
        self.append(address, head.to_string());
      }
      self.flush();
      address += (head.len() / 2) as u32;
      rest = tail;
    }
  }

  fn append(&mut self, address: u32, code: String) {
    let bytes = (code.len() / 2) as u32;
    match &mut self.current {
      Some(record) => record.codes.push(code),
      None => {
        self.current = Some(TextRecord { start: address, codes: vec![code] });
      }
    }
    self.next_address = address + bytes;
  }

  fn flush(&mut self) {
    if let Some(record) = self.current.take() {
      self.records.push(record);
    }
  }

  fn finish(mut self) -> Vec<TextRecord> {
    self.flush();
    self.records
  }
}
