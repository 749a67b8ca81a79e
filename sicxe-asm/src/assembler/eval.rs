//! Expression evaluation for the two contexts the assembler needs:
//! `EQU` operands get the full `+ - * /` arithmetic with relocatability
//! tracking, while WORD and instruction operands get a signed `+`/`-` walk
//! that collects every identifier occurrence for modification records.

use super::SymbolTable;
use crate::ast::{BinOp, Expr};
use crate::error::LineErrorKind;
use crate::object::ModSign;

/// Partial result of an `EQU` evaluation: the numeric value plus the net
/// count of relative terms. 0 means absolute, 1 means relative, anything
/// else has no meaning at load time.
struct RelValue {
  value: i64,
  rel: i32,
}

/// Evaluates an `EQU` operand against the current tables. `*` stands for
/// the location counter. Returns the value and whether it is relative.
pub fn eval_equ(
  expr: &Expr,
  symbols: &SymbolTable,
  locctr: u32,
) -> Result<(i64, bool), LineErrorKind> {
  let v = walk(expr, symbols, locctr)?;
  match v.rel {
    0 => Ok((v.value, false)),
    1 => Ok((v.value, true)),
    _ => Err(LineErrorKind::BadExpression(
      "relative terms do not cancel to an absolute or relative value".to_string(),
    )),
  }
}

fn walk(expr: &Expr, symbols: &SymbolTable, locctr: u32) -> Result<RelValue, LineErrorKind> {
  match expr {
    Expr::Num(n) => Ok(RelValue { value: *n, rel: 0 }),
    Expr::Sym(name) => {
      let entry = symbols
        .get(name)
        .ok_or_else(|| LineErrorKind::UndefinedSymbol(name.clone()))?;
      let address = entry
        .address
        .ok_or_else(|| LineErrorKind::UndefinedSymbol(name.clone()))?;
      Ok(RelValue {
        value: address as i64,
        rel: if entry.relative { 1 } else { 0 },
      })
    }
    Expr::Here => Ok(RelValue { value: locctr as i64, rel: 1 }),
    Expr::Neg(inner) => {
      let v = walk(inner, symbols, locctr)?;
      Ok(RelValue { value: -v.value, rel: -v.rel })
    }
    Expr::Bin(lhs, op, rhs) => {
      let a = walk(lhs, symbols, locctr)?;
      let b = walk(rhs, symbols, locctr)?;
      match op {
        BinOp::Add => Ok(RelValue { value: a.value + b.value, rel: a.rel + b.rel }),
        BinOp::Sub => Ok(RelValue { value: a.value - b.value, rel: a.rel - b.rel }),
        BinOp::Mul | BinOp::Div => {
          if a.rel != 0 || b.rel != 0 {
            return Err(LineErrorKind::BadExpression(
              "relative values cannot be multiplied or divided".to_string(),
            ));
          }
          if *op == BinOp::Div {
            if b.value == 0 {
              return Err(LineErrorKind::BadExpression("division by zero".to_string()));
            }
            Ok(RelValue { value: a.value / b.value, rel: 0 })
          } else {
            Ok(RelValue { value: a.value * b.value, rel: 0 })
          }
        }
      }
    }
  }
}

/// One identifier occurrence inside an operand expression, with the sign
/// it carries and whether it names an imported symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprTerm {
  pub symbol: String,
  pub sign: ModSign,
  pub external: bool,
}

/// Result of evaluating a WORD or instruction operand: imported symbols
/// contribute zero to the value and are listed in `terms` along with every
/// other identifier occurrence.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OperandValue {
  pub value: i64,
  pub relative: bool,
  pub terms: Vec<ExprTerm>,
}

/// Evaluates an operand expression. Only `+`/`-` chains are meaningful in
/// this context; `*`, `/`, and the location-counter pseudo-symbol are
/// rejected.
pub fn eval_operand(expr: &Expr, symbols: &SymbolTable) -> Result<OperandValue, LineErrorKind> {
  let mut out = OperandValue::default();
  linear(expr, symbols, false, &mut out)?;
  Ok(out)
}

fn linear(
  expr: &Expr,
  symbols: &SymbolTable,
  negated: bool,
  out: &mut OperandValue,
) -> Result<(), LineErrorKind> {
  match expr {
    Expr::Num(n) => {
      out.value += if negated { -n } else { *n };
      Ok(())
    }
    Expr::Sym(name) => {
      let entry = symbols
        .get(name)
        .ok_or_else(|| LineErrorKind::UndefinedSymbol(name.clone()))?;
      let sign = if negated { ModSign::Minus } else { ModSign::Plus };
      if entry.external {
        out.terms.push(ExprTerm { symbol: name.clone(), sign, external: true });
      } else {
        let address = entry
          .address
          .ok_or_else(|| LineErrorKind::UndefinedSymbol(name.clone()))?;
        out.value += if negated { -(address as i64) } else { address as i64 };
        out.relative |= entry.relative;
        out.terms.push(ExprTerm { symbol: name.clone(), sign, external: false });
      }
      Ok(())
    }
    Expr::Here => Err(LineErrorKind::BadExpression(
      "'*' is only valid in EQU operands".to_string(),
    )),
    Expr::Neg(inner) => linear(inner, symbols, !negated, out),
    Expr::Bin(lhs, BinOp::Add, rhs) => {
      linear(lhs, symbols, negated, out)?;
      linear(rhs, symbols, negated, out)
    }
    Expr::Bin(lhs, BinOp::Sub, rhs) => {
      linear(lhs, symbols, negated, out)?;
      linear(rhs, symbols, !negated, out)
    }
    Expr::Bin(_, _, _) => Err(LineErrorKind::BadExpression(
      "only + and - are allowed in this operand".to_string(),
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse_expr;

  fn symbols() -> SymbolTable {
    let mut table = SymbolTable::default();
    table.define("ALPHA", 0x1000, true).unwrap();
    table.define("BETA", 0x1006, true).unwrap();
    table.define("SIZE", 16, false).unwrap();
    table.declare_extref("RDREC");
    table
  }

  #[test]
  fn equ_evaluates_arithmetic() {
    let (value, relative) = eval_equ(&parse_expr("SIZE*2+1").unwrap(), &symbols(), 0).unwrap();
    assert_eq!(value, 33);
    assert!(!relative);
  }

  #[test]
  fn equ_star_is_the_location_counter() {
    let (value, relative) = eval_equ(&parse_expr("*").unwrap(), &symbols(), 0x1234).unwrap();
    assert_eq!(value, 0x1234);
    assert!(relative);
  }

  #[test]
  fn equ_relative_minus_relative_is_absolute() {
    let (value, relative) =
      eval_equ(&parse_expr("BETA-ALPHA").unwrap(), &symbols(), 0).unwrap();
    assert_eq!(value, 6);
    assert!(!relative);
  }

  #[test]
  fn equ_relative_plus_relative_is_rejected() {
    assert!(eval_equ(&parse_expr("BETA+ALPHA").unwrap(), &symbols(), 0).is_err());
  }

  #[test]
  fn equ_relative_cannot_be_scaled() {
    assert!(eval_equ(&parse_expr("ALPHA*2").unwrap(), &symbols(), 0).is_err());
  }

  #[test]
  fn equ_division_by_zero_is_rejected() {
    assert!(eval_equ(&parse_expr("SIZE/0").unwrap(), &symbols(), 0).is_err());
  }

  #[test]
  fn equ_unknown_symbol_is_rejected() {
    assert!(eval_equ(&parse_expr("GAMMA").unwrap(), &symbols(), 0).is_err());
  }

  #[test]
  fn operand_collects_signed_terms() {
    let value = eval_operand(&parse_expr("ALPHA-BETA").unwrap(), &symbols()).unwrap();
    assert_eq!(value.value, -6);
    assert_eq!(value.terms.len(), 2);
    assert_eq!(value.terms[0].sign, ModSign::Plus);
    assert_eq!(value.terms[1].sign, ModSign::Minus);
  }

  #[test]
  fn operand_externals_contribute_zero() {
    let value = eval_operand(&parse_expr("RDREC+4").unwrap(), &symbols()).unwrap();
    assert_eq!(value.value, 4);
    assert_eq!(value.terms.len(), 1);
    assert!(value.terms[0].external);
  }

  #[test]
  fn operand_rejects_multiplication() {
    assert!(eval_operand(&parse_expr("ALPHA*2").unwrap(), &symbols()).is_err());
  }

  #[test]
  fn operand_rejects_unknown_symbols() {
    assert_eq!(
      eval_operand(&parse_expr("GAMMA").unwrap(), &symbols()),
      Err(LineErrorKind::UndefinedSymbol("GAMMA".to_string()))
    );
  }
}
