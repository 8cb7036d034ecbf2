use std::{fs::OpenOptions, path::Path};

use log::error;
use memmap2::Mmap;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Read-only memory-mapped view of a data file, used to speed up the
/// startup scan. The map is immutable, so reads need no locking; the
/// engine swaps back to standard file IO before any write.
pub struct MMapIO {
  map: Mmap,
}

impl MMapIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file = OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
      .map_err(|e| {
        error!("failed to open data file for mmap: {}", e);
        Errors::FailedToOpenDataFile
      })?;

    // an empty file maps to an empty slice
    let map = unsafe { Mmap::map(&file) }.map_err(|e| {
      error!("failed to map data file: {}", e);
      Errors::FailedToOpenDataFile
    })?;

    Ok(MMapIO { map })
  }
}

impl IOManager for MMapIO {
  /// Copies out as many bytes as the mapping holds at `offset`; like
  /// `read_at`, a read near the tail may return fewer bytes than asked.
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let data = &self.map[..];
    if offset >= data.len() as u64 {
      return Err(Errors::ReadDataFileEOF);
    }

    let start = offset as usize;
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    Ok(n)
  }

  fn write(&self, _buf: &[u8]) -> Result<usize> {
    // read-only view, appends go through standard file io
    Err(Errors::FailedToWriteToDataFile)
  }

  fn sync(&self) -> Result<()> {
    // nothing of ours to flush, and the view cannot be written through
    Err(Errors::FailedToSyncDataFile)
  }

  fn size(&self) -> u64 {
    self.map.len() as u64
  }
}

#[cfg(test)]
mod tests {
  use std::{fs, path::PathBuf};

  use crate::fio::file_io::FileIO;

  use super::*;

  fn fixture(name: &str, content: &[u8]) -> PathBuf {
    let path = PathBuf::from(format!("/tmp/emberkv-mmap-{}.data", name));
    let _ = fs::remove_file(&path);
    if !content.is_empty() {
      let fio = FileIO::new(&path).unwrap();
      fio.write(content).unwrap();
      fio.sync().unwrap();
    }
    path
  }

  #[test]
  fn test_mmap_empty_file() {
    let path = fixture("empty", b"");

    let mmap_io = MMapIO::new(&path).unwrap();
    assert_eq!(mmap_io.size(), 0);

    let mut buf = [0u8; 8];
    assert_eq!(
      mmap_io.read(&mut buf, 0).err().unwrap(),
      Errors::ReadDataFileEOF
    );

    fs::remove_file(&path).unwrap();
  }

  #[test]
  fn test_mmap_positioned_read() {
    let path = fixture("read", b"hello world, good morning");

    let mmap_io = MMapIO::new(&path).unwrap();
    assert_eq!(mmap_io.size(), 25);

    let mut buf = [0u8; 5];
    assert_eq!(mmap_io.read(&mut buf, 0).unwrap(), 5);
    assert_eq!(&buf, b"hello");

    assert_eq!(mmap_io.read(&mut buf, 6).unwrap(), 5);
    assert_eq!(&buf, b"world");

    // past the end of the mapping
    assert_eq!(
      mmap_io.read(&mut buf, 25).err().unwrap(),
      Errors::ReadDataFileEOF
    );

    fs::remove_file(&path).unwrap();
  }

  #[test]
  fn test_mmap_short_read_at_tail() {
    let path = fixture("tail", b"0123456789");

    let mmap_io = MMapIO::new(&path).unwrap();
    let mut buf = [0u8; 8];
    let n = mmap_io.read(&mut buf, 6).unwrap();
    assert_eq!(n, 4);
    assert_eq!(&buf[..n], b"6789");

    fs::remove_file(&path).unwrap();
  }

  #[test]
  fn test_mmap_rejects_writes() {
    let path = fixture("readonly", b"abc");

    let mmap_io = MMapIO::new(&path).unwrap();
    assert!(mmap_io.write(b"more").is_err());
    assert!(mmap_io.sync().is_err());

    fs::remove_file(&path).unwrap();
  }
}
