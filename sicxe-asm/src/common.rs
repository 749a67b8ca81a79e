use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Anything that can be serialised onto a writer; the path helper wraps the
/// file in a buffered writer.
pub trait WriteResource {
  fn write_to(&self, writer: &mut dyn Write) -> io::Result<()>;

  fn write_to_path<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    self.write_to(&mut writer)
  }
}

/// Counterpart of [`WriteResource`] for artifacts read back from disk.
pub trait ReadResource {
  fn read_from(reader: &mut dyn Read) -> io::Result<Self>
  where
    Self: Sized;

  fn read_from_path<P: AsRef<Path>>(path: P) -> io::Result<Self>
  where
    Self: Sized,
  {
    let mut reader = BufReader::new(File::open(path)?);
    Self::read_from(&mut reader)
  }
}
