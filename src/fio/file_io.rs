use std::{
  fs::{File, OpenOptions},
  io::Write,
  os::unix::fs::FileExt,
  path::Path,
  sync::Arc,
};

use log::error;
use parking_lot::RwLock;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Standard file IO backed by an open descriptor.
pub struct FileIO {
  fd: Arc<RwLock<File>>,
}

impl FileIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    match OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
    {
      Ok(file) => Ok(FileIO {
        fd: Arc::new(RwLock::new(file)),
      }),
      Err(e) => {
        error!("failed to open data file: {}", e);
        Err(Errors::FailedToOpenDataFile)
      }
    }
  }
}

impl IOManager for FileIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let read_guard = self.fd.read();
    match read_guard.read_at(buf, offset) {
      Ok(n) => Ok(n),
      Err(e) => {
        error!("read from data file failed: {}", e);
        Err(Errors::FailedToReadFromDataFile)
      }
    }
  }

  fn write(&self, buf: &[u8]) -> Result<usize> {
    let mut write_guard = self.fd.write();
    match write_guard.write(buf) {
      Ok(n) => Ok(n),
      Err(e) => {
        error!("write to data file failed: {}", e);
        Err(Errors::FailedToWriteToDataFile)
      }
    }
  }

  fn sync(&self) -> Result<()> {
    let read_guard = self.fd.read();
    if let Err(e) = read_guard.sync_all() {
      error!("sync data file failed: {}", e);
      return Err(Errors::FailedToSyncDataFile);
    }
    Ok(())
  }

  fn size(&self) -> u64 {
    let read_guard = self.fd.read();
    read_guard.metadata().unwrap().len()
  }
}

#[cfg(test)]
mod tests {
  use std::{fs, path::PathBuf};

  use super::*;

  #[test]
  fn test_file_io_write() {
    let path = PathBuf::from("/tmp/emberkv-fio-write.data");
    let _ = fs::remove_file(&path);

    let fio = FileIO::new(&path).unwrap();

    let res1 = fio.write(b"key-a");
    assert_eq!(res1.unwrap(), 5);

    let res2 = fio.write(b"key-bb");
    assert_eq!(res2.unwrap(), 6);

    fs::remove_file(&path).unwrap();
  }

  #[test]
  fn test_file_io_read() {
    let path = PathBuf::from("/tmp/emberkv-fio-read.data");
    let _ = fs::remove_file(&path);

    let fio = FileIO::new(&path).unwrap();
    fio.write(b"key-a").unwrap();
    fio.write(b"key-b").unwrap();

    let mut buf1 = [0u8; 5];
    let read1 = fio.read(&mut buf1, 0);
    assert_eq!(read1.unwrap(), 5);
    assert_eq!(&buf1, b"key-a");

    let mut buf2 = [0u8; 5];
    let read2 = fio.read(&mut buf2, 5);
    assert_eq!(read2.unwrap(), 5);
    assert_eq!(&buf2, b"key-b");

    fs::remove_file(&path).unwrap();
  }

  #[test]
  fn test_file_io_sync_and_size() {
    let path = PathBuf::from("/tmp/emberkv-fio-sync.data");
    let _ = fs::remove_file(&path);

    let fio = FileIO::new(&path).unwrap();
    assert_eq!(fio.size(), 0);

    fio.write(b"some bytes").unwrap();
    assert!(fio.sync().is_ok());
    assert_eq!(fio.size(), 10);

    fs::remove_file(&path).unwrap();
  }
}
