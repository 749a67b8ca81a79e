use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors that abort the whole run: missing inputs, an unreadable opcode
/// catalog, or a bad link file. Anything recoverable at line granularity is
/// a [`LineError`] instead.
#[derive(Debug)]
pub enum Error {
  Io { path: PathBuf, source: io::Error },
  Catalog { line: usize, reason: String },
  LinkFile { path: PathBuf, reason: String },
}

impl Error {
  pub fn io<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
    Error::Io { path: path.into(), source }
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Io { path, source } => {
        write!(f, "{}: {}", path.display(), source)
      }
      Error::Catalog { line, reason } => {
        write!(f, "opcode catalog line {}: {}", line, reason)
      }
      Error::LinkFile { path, reason } => {
        write!(f, "link file {}: {}", path.display(), reason)
      }
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Error::Io { source, .. } => Some(source),
      _ => None,
    }
  }
}

/// Why a single source line failed to assemble. The line is skipped and
/// assembly continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineErrorKind {
  UnknownMnemonic(String),
  UnknownRegister(String),
  MalformedLiteral(String),
  MalformedOperand(String),
  BadExpression(String),
  DuplicateSymbol(String),
  UndefinedSymbol(String),
  MissingOperand(String),
}

impl fmt::Display for LineErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LineErrorKind::UnknownMnemonic(m) => write!(f, "unknown mnemonic '{}'", m),
      LineErrorKind::UnknownRegister(r) => write!(f, "unknown register '{}'", r),
      LineErrorKind::MalformedLiteral(l) => write!(f, "malformed literal '{}'", l),
      LineErrorKind::MalformedOperand(o) => write!(f, "malformed operand '{}'", o),
      LineErrorKind::BadExpression(e) => write!(f, "bad expression: {}", e),
      LineErrorKind::DuplicateSymbol(s) => write!(f, "symbol '{}' already defined", s),
      LineErrorKind::UndefinedSymbol(s) => write!(f, "undefined symbol '{}'", s),
      LineErrorKind::MissingOperand(what) => write!(f, "missing operand: {}", what),
    }
  }
}

/// A [`LineErrorKind`] tied to the source line it occurred on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
  pub line_no: usize,
  pub kind: LineErrorKind,
}

impl fmt::Display for LineError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "line {}: {}", self.line_no, self.kind)
  }
}
