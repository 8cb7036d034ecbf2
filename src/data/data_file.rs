use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use bytes::BytesMut;
use parking_lot::RwLock;

use crate::{
  errors::{Errors, Result},
  fio::{new_io_manager, IOManager},
  option::IOManagerType,
};

use super::log_record::{
  decode_log_record_header, max_log_record_header_size, LogRecord, LogRecordPos, LogRecordType,
  ReadLogRecord,
};

pub const DATA_FILE_NAME_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq.no";

/// One numbered append-only log file. The highest id is the active file,
/// every lower id is sealed and read-only.
pub struct DataFile {
  file_id: Arc<RwLock<u32>>,
  write_off: Arc<RwLock<u64>>,
  io_manager: Box<dyn IOManager>,
}

impl DataFile {
  pub fn new<P>(dir_path: P, file_id: u32, io_type: IOManagerType) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = get_data_file_name(dir_path, file_id);
    let io_manager = new_io_manager(file_name, io_type)?;

    Ok(DataFile {
      file_id: Arc::new(RwLock::new(file_id)),
      write_off: Arc::new(RwLock::new(0)),
      io_manager,
    })
  }

  /// Opens the hint file produced by merge.
  pub fn new_hint_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(HINT_FILE_NAME);
    let io_manager = new_io_manager(file_name, IOManagerType::StandardFileIO)?;

    Ok(DataFile {
      file_id: Arc::new(RwLock::new(0)),
      write_off: Arc::new(RwLock::new(0)),
      io_manager,
    })
  }

  /// Opens the merge-finished marker file.
  pub fn new_merge_fin_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(MERGE_FINISHED_FILE_NAME);
    let io_manager = new_io_manager(file_name, IOManagerType::StandardFileIO)?;

    Ok(DataFile {
      file_id: Arc::new(RwLock::new(0)),
      write_off: Arc::new(RwLock::new(0)),
      io_manager,
    })
  }

  /// Opens the seq number checkpoint file.
  pub fn new_seq_no_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(SEQ_NO_FILE_NAME);
    let io_manager = new_io_manager(file_name, IOManagerType::StandardFileIO)?;

    Ok(DataFile {
      file_id: Arc::new(RwLock::new(0)),
      write_off: Arc::new(RwLock::new(0)),
      io_manager,
    })
  }

  pub fn get_write_off(&self) -> u64 {
    *self.write_off.read()
  }

  pub fn set_write_off(&self, offset: u64) {
    *self.write_off.write() = offset;
  }

  pub fn get_file_id(&self) -> u32 {
    *self.file_id.read()
  }

  pub fn file_size(&self) -> u64 {
    self.io_manager.size()
  }

  /// Reads one record at `offset`. `ReadDataFileEOF` marks a clean end of
  /// data, `InvalidRecordCrc` a corrupted record.
  pub fn read_log_record(&self, offset: u64) -> Result<ReadLogRecord> {
    let file_size = self.io_manager.size();
    if offset >= file_size {
      return Err(Errors::ReadDataFileEOF);
    }

    // never read past the end of the file
    let mut header_len = max_log_record_header_size();
    if offset + header_len as u64 > file_size {
      header_len = (file_size - offset) as usize;
    }

    let mut header_buf = BytesMut::zeroed(header_len);
    self.io_manager.read(&mut header_buf, offset)?;
    let header_bytes = header_buf.freeze();

    let (header, header_size) = match decode_log_record_header(header_bytes.clone()) {
      Some(res) => res,
      None => return Err(Errors::ReadDataFileEOF),
    };

    // an all-zero header marks the end of valid data
    if header.crc == 0 && header.key_size == 0 && header.value_size == 0 {
      return Err(Errors::ReadDataFileEOF);
    }

    // a header claiming more bytes than the file holds is a torn write
    let record_size = header_size + header.key_size + header.value_size;
    if offset + record_size as u64 > file_size {
      return Err(Errors::InvalidRecordCrc);
    }

    let mut kv_buf = BytesMut::zeroed(header.key_size + header.value_size);
    self.io_manager.read(&mut kv_buf, offset + header_size as u64)?;

    // verify the crc before trusting any field
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header_bytes[4..header_size]);
    hasher.update(&kv_buf);
    if hasher.finalize() != header.crc {
      return Err(Errors::InvalidRecordCrc);
    }

    let record = LogRecord {
      key: kv_buf[..header.key_size].to_vec(),
      value: kv_buf[header.key_size..].to_vec(),
      rec_type: LogRecordType::from_u8(header.rec_type),
    };

    Ok(ReadLogRecord {
      record,
      size: record_size,
    })
  }

  pub fn write(&self, buf: &[u8]) -> Result<usize> {
    let n_bytes = self.io_manager.write(buf)?;
    *self.write_off.write() += n_bytes as u64;
    Ok(n_bytes)
  }

  /// Appends one hint entry mapping a user key to its merged position.
  pub fn write_hint_record(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<()> {
    let hint_record = LogRecord {
      key,
      value: pos.encode(),
      rec_type: LogRecordType::Normal,
    };
    self.write(&hint_record.encode())?;
    Ok(())
  }

  pub fn sync(&self) -> Result<()> {
    self.io_manager.sync()
  }

  /// Swaps the IO backend, used after an mmap-accelerated startup scan.
  pub fn set_io_manager<P>(&mut self, dir_path: P, io_type: IOManagerType) -> Result<()>
  where
    P: AsRef<Path>,
  {
    self.io_manager = new_io_manager(get_data_file_name(dir_path, self.get_file_id()), io_type)?;
    Ok(())
  }
}

pub fn get_data_file_name<P>(dir_path: P, file_id: u32) -> PathBuf
where
  P: AsRef<Path>,
{
  let name = std::format!("{:09}{}", file_id, DATA_FILE_NAME_SUFFIX);
  dir_path.as_ref().join(name)
}

#[cfg(test)]
mod tests {
  use std::fs;

  use super::*;

  fn test_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from(format!("/tmp/emberkv-datafile-{}", name));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
  }

  #[test]
  fn test_new_data_file() {
    let dir = test_dir("new");

    let data_file = DataFile::new(&dir, 0, IOManagerType::StandardFileIO).unwrap();
    assert_eq!(data_file.get_file_id(), 0);
    assert_eq!(data_file.get_write_off(), 0);
    assert!(get_data_file_name(&dir, 0).is_file());

    let data_file2 = DataFile::new(&dir, 660, IOManagerType::StandardFileIO).unwrap();
    assert_eq!(data_file2.get_file_id(), 660);
    assert!(get_data_file_name(&dir, 660).ends_with("000000660.data"));

    fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn test_data_file_write_then_read() {
    let dir = test_dir("rw");
    let data_file = DataFile::new(&dir, 100, IOManagerType::StandardFileIO).unwrap();

    let rec1 = LogRecord {
      key: b"aa".to_vec(),
      value: b"value-1".to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let enc1 = rec1.encode();
    data_file.write(&enc1).unwrap();
    assert_eq!(data_file.get_write_off(), enc1.len() as u64);

    let rec2 = LogRecord {
      key: b"bb".to_vec(),
      value: b"value-2".to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let enc2 = rec2.encode();
    data_file.write(&enc2).unwrap();

    let read1 = data_file.read_log_record(0).unwrap();
    assert_eq!(read1.size, enc1.len());
    assert_eq!(read1.record.key, b"aa".to_vec());
    assert_eq!(read1.record.value, b"value-1".to_vec());

    let read2 = data_file.read_log_record(enc1.len() as u64).unwrap();
    assert_eq!(read2.record.key, b"bb".to_vec());

    // past the tail
    let eof = data_file.read_log_record((enc1.len() + enc2.len()) as u64);
    assert_eq!(eof.err().unwrap(), Errors::ReadDataFileEOF);

    fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn test_data_file_read_tombstone() {
    let dir = test_dir("tombstone");
    let data_file = DataFile::new(&dir, 0, IOManagerType::StandardFileIO).unwrap();

    let rec = LogRecord {
      key: b"gone".to_vec(),
      value: Default::default(),
      rec_type: LogRecordType::Deleted,
    };
    data_file.write(&rec.encode()).unwrap();

    let read = data_file.read_log_record(0).unwrap();
    assert_eq!(read.record.rec_type, LogRecordType::Deleted);
    assert!(read.record.value.is_empty());

    fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn test_data_file_detects_corruption() {
    let dir = test_dir("corrupt");
    let data_file = DataFile::new(&dir, 0, IOManagerType::StandardFileIO).unwrap();

    let rec = LogRecord {
      key: b"key".to_vec(),
      value: b"value".to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let enc = rec.encode();
    data_file.write(&enc).unwrap();
    data_file.sync().unwrap();

    // flip one bit in the value segment on disk
    let path = get_data_file_name(&dir, 0);
    let mut raw = fs::read(&path).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x40;
    fs::write(&path, raw).unwrap();

    let reopened = DataFile::new(&dir, 0, IOManagerType::StandardFileIO).unwrap();
    let res = reopened.read_log_record(0);
    assert_eq!(res.err().unwrap(), Errors::InvalidRecordCrc);

    fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn test_data_file_sync() {
    let dir = test_dir("sync");
    let data_file = DataFile::new(&dir, 0, IOManagerType::StandardFileIO).unwrap();

    let rec = LogRecord {
      key: b"key".to_vec(),
      value: b"value".to_vec(),
      rec_type: LogRecordType::Normal,
    };
    data_file.write(&rec.encode()).unwrap();
    assert!(data_file.sync().is_ok());

    fs::remove_dir_all(&dir).unwrap();
  }
}
