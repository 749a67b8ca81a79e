use crate::ast::{BinOp, DataSpec, Directive, Expr, Operand, RawFields, RegOperand};
use crate::catalog::OpcodeTable;
use crate::error::LineErrorKind;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "grammar/sicxe.pest"]
pub struct SourceParser;

/// Cuts a source line at the first `.` or `;`, which introduce comments.
pub fn strip_comment(line: &str) -> &str {
  match line.find(['.', ';']) {
    Some(idx) => &line[..idx],
    None => line,
  }
}

/// Identifier check for labels and symbols: leading letter or underscore,
/// then letters, digits, underscores.
pub fn is_valid_symbol(token: &str) -> bool {
  let mut chars = token.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits a comment-stripped line into label / opcode / operand. A label is
/// either the first token with a trailing colon, or a leading identifier
/// that is neither a catalog mnemonic nor a directive. Remaining tokens
/// past the opcode are rejoined into the operand field.
pub fn split_fields(line: &str, catalog: &OpcodeTable) -> Option<RawFields> {
  let tokens: Vec<&str> = line.split_whitespace().collect();
  if tokens.is_empty() {
    return None;
  }

  let mut rest = &tokens[..];
  let mut label = None;
  if let Some(stripped) = tokens[0].strip_suffix(':') {
    label = Some(stripped.to_uppercase());
    rest = &rest[1..];
  } else if is_valid_symbol(tokens[0])
    && !catalog.contains(tokens[0])
    && Directive::parse(tokens[0]).is_none()
  {
    label = Some(tokens[0].to_uppercase());
    rest = &rest[1..];
  }

  let opcode = rest.first().map(|tok| tok.to_uppercase());
  let operand = if rest.len() > 1 {
    Some(rest[1..].join(" "))
  } else {
    None
  };
  Some(RawFields { label, opcode, operand })
}

/// Classifies an instruction operand into its addressing mode.
pub fn parse_operand(text: &str) -> Result<Operand, LineErrorKind> {
  let mut pairs = SourceParser::parse(Rule::operand_field, text)
    .map_err(|_| LineErrorKind::MalformedOperand(text.to_string()))?;
  let field = pairs.next().ok_or_else(|| LineErrorKind::MalformedOperand(text.to_string()))?;
  let mut inner = field.into_inner();
  let operand = inner
    .next()
    .ok_or_else(|| LineErrorKind::MalformedOperand(text.to_string()))?;
  let mut parts = operand.into_inner();
  let first = parts
    .next()
    .ok_or_else(|| LineErrorKind::MalformedOperand(text.to_string()))?;
  match first.as_rule() {
    Rule::literal => {
      let spec = decode_data_spec(first.into_inner().next().unwrap())?;
      Ok(Operand::Literal(format!("={}", spec.canonical)))
    }
    Rule::immediate => {
      let expr = build_expr(first.into_inner().next().unwrap())?;
      Ok(Operand::Immediate(expr))
    }
    Rule::indirect => {
      let sym = first.into_inner().next().unwrap().as_str().to_uppercase();
      Ok(Operand::Indirect(sym))
    }
    Rule::expr => {
      let expr = build_expr(first)?;
      match parts.next() {
        Some(suffix) if suffix.as_rule() == Rule::indexed_suffix => Ok(Operand::Indexed(expr)),
        _ => Ok(Operand::Simple(expr)),
      }
    }
    _ => Err(LineErrorKind::MalformedOperand(text.to_string())),
  }
}

/// Parses a BYTE operand: `C'…'`, `X'…'`, `0C…`, or `0X…`.
pub fn parse_byte_spec(text: &str) -> Result<DataSpec, LineErrorKind> {
  let mut pairs = SourceParser::parse(Rule::byte_field, text)
    .map_err(|_| LineErrorKind::MalformedLiteral(text.to_string()))?;
  let field = pairs.next().ok_or_else(|| LineErrorKind::MalformedLiteral(text.to_string()))?;
  let spec = field
    .into_inner()
    .next()
    .ok_or_else(|| LineErrorKind::MalformedLiteral(text.to_string()))?;
  decode_data_spec(spec)
}

/// Parses a `=`-prefixed literal, returning the canonical table key and the
/// decoded bytes.
pub fn parse_literal(text: &str) -> Result<(String, DataSpec), LineErrorKind> {
  let mut pairs = SourceParser::parse(Rule::literal_field, text)
    .map_err(|_| LineErrorKind::MalformedLiteral(text.to_string()))?;
  let field = pairs.next().ok_or_else(|| LineErrorKind::MalformedLiteral(text.to_string()))?;
  let literal = field
    .into_inner()
    .next()
    .ok_or_else(|| LineErrorKind::MalformedLiteral(text.to_string()))?;
  let spec = decode_data_spec(literal.into_inner().next().unwrap())?;
  Ok((format!("={}", spec.canonical), spec))
}

/// Parses an arithmetic expression field (EQU and WORD operands).
pub fn parse_expr(text: &str) -> Result<Expr, LineErrorKind> {
  let mut pairs = SourceParser::parse(Rule::expr_field, text)
    .map_err(|_| LineErrorKind::BadExpression(text.to_string()))?;
  let field = pairs.next().ok_or_else(|| LineErrorKind::BadExpression(text.to_string()))?;
  let expr = field
    .into_inner()
    .next()
    .ok_or_else(|| LineErrorKind::BadExpression(text.to_string()))?;
  build_expr(expr)
}

/// Parses the one or two register slots of a format-2 operand.
pub fn parse_reg_operands(
  text: &str,
) -> Result<(RegOperand, Option<RegOperand>), LineErrorKind> {
  let mut pairs = SourceParser::parse(Rule::reg_field, text)
    .map_err(|_| LineErrorKind::MalformedOperand(text.to_string()))?;
  let field = pairs.next().ok_or_else(|| LineErrorKind::MalformedOperand(text.to_string()))?;
  let pair_rule = field
    .into_inner()
    .next()
    .ok_or_else(|| LineErrorKind::MalformedOperand(text.to_string()))?;
  let mut slots = pair_rule.into_inner();
  let first = decode_reg_operand(slots.next().unwrap(), text)?;
  let second = match slots.next() {
    Some(p) => Some(decode_reg_operand(p, text)?),
    None => None,
  };
  Ok((first, second))
}

fn decode_reg_operand(pair: Pair<Rule>, text: &str) -> Result<RegOperand, LineErrorKind> {
  let inner = pair.into_inner().next().unwrap();
  match inner.as_rule() {
    Rule::reg_imm | Rule::reg_num => {
      let digits = match inner.as_rule() {
        Rule::reg_imm => inner.into_inner().next().unwrap().as_str().to_string(),
        _ => inner.as_str().to_string(),
      };
      let value: u8 = digits
        .parse()
        .map_err(|_| LineErrorKind::MalformedOperand(text.to_string()))?;
      Ok(RegOperand::Value(value))
    }
    Rule::reg_name => Ok(RegOperand::Register(inner.as_str().to_uppercase())),
    _ => Err(LineErrorKind::MalformedOperand(text.to_string())),
  }
}

fn decode_data_spec(pair: Pair<Rule>) -> Result<DataSpec, LineErrorKind> {
  let inner = pair.into_inner().next().unwrap();
  match inner.as_rule() {
    Rule::char_quoted | Rule::char_raw => {
      let body = inner.into_inner().next().unwrap().as_str().to_string();
      let bytes = body.bytes().collect();
      Ok(DataSpec { canonical: format!("C'{}'", body), bytes })
    }
    Rule::hex_quoted | Rule::hex_raw => {
      let digits = inner.into_inner().next().unwrap().as_str().to_uppercase();
      if digits.len() % 2 != 0 {
        return Err(LineErrorKind::MalformedLiteral(digits));
      }
      let mut bytes = Vec::with_capacity(digits.len() / 2);
      for chunk in digits.as_bytes().chunks(2) {
        let pair_str = std::str::from_utf8(chunk).map_err(|_| {
          LineErrorKind::MalformedLiteral(digits.clone())
        })?;
        let byte = u8::from_str_radix(pair_str, 16)
          .map_err(|_| LineErrorKind::MalformedLiteral(digits.clone()))?;
        bytes.push(byte);
      }
      Ok(DataSpec { canonical: format!("X'{}'", digits), bytes })
    }
    _ => Err(LineErrorKind::MalformedLiteral(String::new())),
  }
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, LineErrorKind> {
  match pair.as_rule() {
    Rule::expr => {
      let mut inner = pair.into_inner();
      let mut acc = build_expr(inner.next().unwrap())?;
      while let Some(op) = inner.next() {
        let rhs = build_expr(inner.next().unwrap())?;
        let binop = if op.as_str() == "+" { BinOp::Add } else { BinOp::Sub };
        acc = Expr::Bin(Box::new(acc), binop, Box::new(rhs));
      }
      Ok(acc)
    }
    Rule::term => {
      let mut inner = pair.into_inner();
      let mut acc = build_expr(inner.next().unwrap())?;
      while let Some(op) = inner.next() {
        let rhs = build_expr(inner.next().unwrap())?;
        let binop = if op.as_str() == "*" { BinOp::Mul } else { BinOp::Div };
        acc = Expr::Bin(Box::new(acc), binop, Box::new(rhs));
      }
      Ok(acc)
    }
    Rule::factor => build_expr(pair.into_inner().next().unwrap()),
    Rule::number => {
      let text = pair.as_str();
      text
        .parse::<i64>()
        .map(Expr::Num)
        .map_err(|_| LineErrorKind::BadExpression(text.to_string()))
    }
    Rule::ident => Ok(Expr::Sym(pair.as_str().to_uppercase())),
    Rule::here => Ok(Expr::Here),
    Rule::neg => {
      let inner = build_expr(pair.into_inner().next().unwrap())?;
      Ok(Expr::Neg(Box::new(inner)))
    }
    _ => Err(LineErrorKind::BadExpression(pair.as_str().to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::OpcodeTable;

  fn catalog() -> OpcodeTable {
    OpcodeTable::load(None).unwrap()
  }

  #[test]
  fn strips_trailing_comments() {
    assert_eq!(strip_comment("LDA FIVE ; load"), "LDA FIVE ");
    assert_eq!(strip_comment("LDA FIVE . load"), "LDA FIVE ");
    assert_eq!(strip_comment("LDA FIVE"), "LDA FIVE");
  }

  #[test]
  fn splits_label_with_colon() {
    let fields = split_fields("FIRST: LDA FIVE", &catalog()).unwrap();
    assert_eq!(fields.label.as_deref(), Some("FIRST"));
    assert_eq!(fields.opcode.as_deref(), Some("LDA"));
    assert_eq!(fields.operand.as_deref(), Some("FIVE"));
  }

  #[test]
  fn splits_bare_label() {
    let fields = split_fields("five WORD 5", &catalog()).unwrap();
    assert_eq!(fields.label.as_deref(), Some("FIVE"));
    assert_eq!(fields.opcode.as_deref(), Some("WORD"));
  }

  #[test]
  fn mnemonic_is_not_mistaken_for_label() {
    let fields = split_fields("LDA FIVE", &catalog()).unwrap();
    assert_eq!(fields.label, None);
    assert_eq!(fields.opcode.as_deref(), Some("LDA"));
  }

  #[test]
  fn label_only_line_has_no_opcode() {
    let fields = split_fields("LOOP:", &catalog()).unwrap();
    assert_eq!(fields.label.as_deref(), Some("LOOP"));
    assert_eq!(fields.opcode, None);
  }

  #[test]
  fn operand_tokens_are_rejoined() {
    let fields = split_fields("EXTDEF BUFFER, LENGTH", &catalog()).unwrap();
    assert_eq!(fields.operand.as_deref(), Some("BUFFER, LENGTH"));
  }

  #[test]
  fn parses_immediate_operand() {
    assert_eq!(
      parse_operand("#3"),
      Ok(Operand::Immediate(Expr::Num(3)))
    );
    assert_eq!(
      parse_operand("#LENGTH"),
      Ok(Operand::Immediate(Expr::Sym("LENGTH".to_string())))
    );
  }

  #[test]
  fn parses_indirect_operand() {
    assert_eq!(
      parse_operand("@RETADR"),
      Ok(Operand::Indirect("RETADR".to_string()))
    );
  }

  #[test]
  fn parses_indexed_operand() {
    assert_eq!(
      parse_operand("BUFFER,X"),
      Ok(Operand::Indexed(Expr::Sym("BUFFER".to_string())))
    );
    assert_eq!(
      parse_operand("buffer , x"),
      Ok(Operand::Indexed(Expr::Sym("BUFFER".to_string())))
    );
  }

  #[test]
  fn parses_literal_operand_with_canonical_key() {
    assert_eq!(
      parse_operand("=x'f1'"),
      Ok(Operand::Literal("=X'F1'".to_string()))
    );
    assert_eq!(
      parse_operand("=0XF1"),
      Ok(Operand::Literal("=X'F1'".to_string()))
    );
    assert_eq!(
      parse_operand("=C'EOF'"),
      Ok(Operand::Literal("=C'EOF'".to_string()))
    );
    assert_eq!(
      parse_operand("=0CEOF"),
      Ok(Operand::Literal("=C'EOF'".to_string()))
    );
  }

  #[test]
  fn parses_expression_operand() {
    assert_eq!(
      parse_operand("BUFEND-BUFFER"),
      Ok(Operand::Simple(Expr::Bin(
        Box::new(Expr::Sym("BUFEND".to_string())),
        BinOp::Sub,
        Box::new(Expr::Sym("BUFFER".to_string())),
      )))
    );
  }

  #[test]
  fn rejects_garbage_operand() {
    assert!(parse_operand("#").is_err());
    assert!(parse_operand("@RETADR,X").is_err());
  }

  #[test]
  fn expression_precedence_is_mul_before_add() {
    let expr = parse_expr("ALPHA+2*3").unwrap();
    assert_eq!(
      expr,
      Expr::Bin(
        Box::new(Expr::Sym("ALPHA".to_string())),
        BinOp::Add,
        Box::new(Expr::Bin(
          Box::new(Expr::Num(2)),
          BinOp::Mul,
          Box::new(Expr::Num(3)),
        )),
      )
    );
  }

  #[test]
  fn parses_parenthesised_expression() {
    let expr = parse_expr("(ALPHA+2)*3").unwrap();
    assert!(matches!(expr, Expr::Bin(_, BinOp::Mul, _)));
  }

  #[test]
  fn parses_star_as_location_counter() {
    assert_eq!(parse_expr("*"), Ok(Expr::Here));
  }

  #[test]
  fn parses_leading_minus() {
    assert_eq!(parse_expr("-1"), Ok(Expr::Neg(Box::new(Expr::Num(1)))));
  }

  #[test]
  fn byte_spec_decodes_character_form() {
    let spec = parse_byte_spec("C'EOF'").unwrap();
    assert_eq!(spec.canonical, "C'EOF'");
    assert_eq!(spec.bytes, b"EOF".to_vec());
  }

  #[test]
  fn byte_spec_decodes_hex_forms() {
    let spec = parse_byte_spec("X'f1'").unwrap();
    assert_eq!(spec.canonical, "X'F1'");
    assert_eq!(spec.bytes, vec![0xF1]);
    let spec = parse_byte_spec("0X05").unwrap();
    assert_eq!(spec.bytes, vec![0x05]);
  }

  #[test]
  fn byte_spec_rejects_odd_hex() {
    assert!(parse_byte_spec("X'F1A'").is_err());
    assert!(parse_byte_spec("0XF1A").is_err());
  }

  #[test]
  fn literal_key_is_normalised() {
    let (key, spec) = parse_literal("=0xf1").unwrap();
    assert_eq!(key, "=X'F1'");
    assert_eq!(spec.bytes, vec![0xF1]);
  }

  #[test]
  fn parses_register_pairs() {
    assert_eq!(
      parse_reg_operands("A,X"),
      Ok((
        RegOperand::Register("A".to_string()),
        Some(RegOperand::Register("X".to_string())),
      ))
    );
    assert_eq!(
      parse_reg_operands("T"),
      Ok((RegOperand::Register("T".to_string()), None))
    );
    assert_eq!(
      parse_reg_operands("T,4"),
      Ok((
        RegOperand::Register("T".to_string()),
        Some(RegOperand::Value(4)),
      ))
    );
    assert_eq!(
      parse_reg_operands("#2,S"),
      Ok((
        RegOperand::Value(2),
        Some(RegOperand::Register("S".to_string())),
      ))
    );
  }
}
