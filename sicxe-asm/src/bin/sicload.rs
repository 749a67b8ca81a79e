use clap::Parser;
use log::{error, info};
use sicxe_asm::common::ReadResource;
use sicxe_asm::error::Error;
use sicxe_asm::loader::{DEFAULT_LOAD_ADDRESS, Loader, parse_link_file};
use sicxe_asm::object::ObjectProgram;
use std::fs;
use std::path::PathBuf;

/// SIC/XE linking loader: combines object programs into an absolute memory
/// image and resolves external references.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Object program files, loaded in the given order
  #[arg(required_unless_present = "link_file")]
  objects: Vec<PathBuf>,

  /// Load address in hex
  #[arg(short, long)]
  load_address: Option<String>,

  /// TOML link file naming the inputs, output, and load address
  #[arg(long, conflicts_with = "objects")]
  link_file: Option<PathBuf>,

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

  let mut inputs: Vec<PathBuf> = cli.objects.clone();
  let mut output = "MEMORY.DAT".to_string();
  let mut load_text = cli.load_address.clone();

  if let Some(path) = &cli.link_file {
    let link = match parse_link_file(path) {
      Ok(link) => link,
      Err(e) => {
        error!("{}", e);
        return Err(e.into());
      }
    };
    inputs = link.input_files.iter().map(PathBuf::from).collect();
    if let Some(out) = link.output_file {
      output = out;
    }
    if load_text.is_none() {
      load_text = link.load_address;
    }
  }

  let load_address = match &load_text {
    Some(text) => match u32::from_str_radix(text.trim(), 16) {
      Ok(address) => address,
      Err(_) => {
        error!("Bad load address '{}'; expected hex", text);
        return Err(format!("bad load address '{}'", text).into());
      }
    },
    None => DEFAULT_LOAD_ADDRESS,
  };

  let mut loader = Loader::new(load_address);
  for path in &inputs {
    let program = match ObjectProgram::read_from_path(path) {
      Ok(program) => program,
      Err(e) => {
        println!("Error: Could not find file {}", path.display());
        return Err(Error::io(path, e).into());
      }
    };
    loader.add_program(program);
  }

  info!("Linking {} program(s) at {:04X}", inputs.len(), load_address);
  loader.link();

  for warning in loader.warnings() {
    println!("{}", warning);
  }
  print!("{}", loader.symbol_table_report());

  match loader.memory_report() {
    Some(report) => {
      fs::write(&output, &report).map_err(|e| Error::io(&output, e))?;
      print!("{}", report);
      println!("Linking complete. Output written to {}", output);
    }
    None => println!("No memory to display."),
  }
  Ok(())
}
