use clap::Parser;
use log::{error, info, warn};
use sicxe_asm::assembler::Assembler;
use sicxe_asm::catalog::OpcodeTable;
use sicxe_asm::common::WriteResource;
use sicxe_asm::error::Error;
use std::fs;
use std::path::PathBuf;

/// SIC/XE two-pass assembler: produces a listing, an object program, and a
/// diagnostic intermediate file.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Input assembly source file
  source: PathBuf,

  /// Opcode catalog file (defaults to the built-in SIC/XE set)
  #[arg(short, long)]
  opcodes: Option<PathBuf>,

  /// Increase logging verbosity (-v, -vv, etc.)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let cli = Cli::parse();

  let log_level = match cli.verbose {
    0 => "info",
    1 => "debug",
    _ => "trace",
  };

  unsafe {
    std::env::set_var("RUST_LOG", log_level);
  }

  env_logger::init();

  let catalog = match OpcodeTable::load(cli.opcodes.as_deref()) {
    Ok(catalog) => catalog,
    Err(e) => {
      error!("Failed to load opcode catalog: {}", e);
      return Err(e.into());
    }
  };

  let source = match fs::read_to_string(&cli.source) {
    Ok(s) => s,
    Err(e) => {
      error!("Failed to read source file: {}", e);
      return Err(Error::io(&cli.source, e).into());
    }
  };

  info!("Assembling {}", cli.source.display());
  let assembly = Assembler::assemble(&catalog, &source);

  let lst_path = cli.source.with_extension("lst");
  let obj_path = cli.source.with_extension("obj");

  fs::write(&lst_path, &assembly.listing).map_err(|e| Error::io(&lst_path, e))?;
  assembly
    .object
    .write_to_path(&obj_path)
    .map_err(|e| Error::io(&obj_path, e))?;
  fs::write("test1.int", &assembly.intermediate)
    .map_err(|e| Error::io("test1.int", e))?;

  if assembly.errors.is_empty() {
    info!(
      "Wrote {} and {}",
      lst_path.display(),
      obj_path.display()
    );
  } else {
    warn!(
      "{} line(s) failed to assemble; object program is incomplete",
      assembly.errors.len()
    );
  }
  Ok(())
}
