use std::{
  collections::HashMap,
  fs,
  path::Path,
  sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
};

use bytes::Bytes;
use fs2::FileExt;
use log::{error, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
  batch::{log_record_key_with_seq, parse_log_record_key, NON_TRANSACTION_SEQ_NO},
  data::{
    data_file::{
      get_data_file_name, DataFile, DATA_FILE_NAME_SUFFIX, MERGE_FINISHED_FILE_NAME,
      SEQ_NO_FILE_NAME,
    },
    log_record::{LogRecord, LogRecordPos, LogRecordType, TransactionRecord},
  },
  errors::{Errors, Result},
  index,
  merge::{get_non_merge_file_id, load_merge_files},
  option::{IOManagerType, IndexType, Options},
  util,
};

pub const FILE_LOCK_NAME: &str = "flock";
const SEQ_NO_KEY: &str = "seq.no";

/// The storage engine. One instance owns a directory exclusively; share it
/// across threads behind an `Arc`.
pub struct Engine {
  pub(crate) options: Arc<Options>,
  /// The file currently accepting appends.
  pub(crate) active_data_file: Arc<RwLock<DataFile>>,
  /// Sealed files keyed by id, read-only.
  pub(crate) older_files: Arc<RwLock<HashMap<u32, DataFile>>>,
  pub(crate) index: Box<dyn index::Indexer>,
  /// Ids found at startup, only meaningful during index loading.
  file_ids: Vec<u32>,
  pub(crate) batch_commit_lock: Mutex<()>,
  /// Largest transaction seq handed out so far.
  pub(crate) seq_no: Arc<AtomicU64>,
  pub(crate) merging_lock: Mutex<()>,
  pub(crate) seq_file_exists: bool,
  pub(crate) is_initial: bool,
  lock_file: fs::File,
  bytes_write: Arc<AtomicUsize>,
}

/// A point-in-time view of the engine's footprint.
#[derive(Debug)]
pub struct Stat {
  /// Number of live keys.
  pub key_num: usize,
  /// Data files on disk, the active one included.
  pub data_file_num: usize,
  /// Total bytes under the database directory.
  pub disk_size: u64,
}

impl Engine {
  /// Opens (or creates) a database directory and rebuilds the in-memory
  /// state from its files.
  pub fn open(opts: Options) -> Result<Engine> {
    check_options(&opts)?;

    let options = opts;
    let dir_path = options.dir_path.clone();
    let mut is_initial = false;
    if !dir_path.is_dir() {
      is_initial = true;
      if let Err(e) = fs::create_dir_all(&dir_path) {
        error!("failed to create database directory: {}", e);
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    }

    // only one process may own the directory
    let lock_file = match fs::OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .open(dir_path.join(FILE_LOCK_NAME))
    {
      Ok(file) => file,
      Err(e) => {
        error!("failed to open the lock file: {}", e);
        return Err(Errors::FailedToOpenDataFile);
      }
    };
    if lock_file.try_lock_exclusive().is_err() {
      return Err(Errors::DatabaseIsUsing);
    }

    if let Ok(entries) = fs::read_dir(&dir_path) {
      // nothing on disk yet besides the lock file
      if entries.count() <= 1 {
        is_initial = true;
      }
    }

    // promote a finished merge before anything reads the data files
    load_merge_files(&dir_path)?;

    // mmap buys nothing when the index skips replay
    let use_mmap = options.mmap_at_startup && options.index_type != IndexType::BPlusTree;
    let mut data_files = load_data_files(&dir_path, use_mmap)?;
    let file_ids: Vec<u32> = data_files.iter().map(|f| f.get_file_id()).collect();

    // the highest id is the active file
    let active_file = match data_files.pop() {
      Some(file) => file,
      None => DataFile::new(&dir_path, 0, IOManagerType::StandardFileIO)?,
    };
    let mut older_files = HashMap::new();
    for file in data_files {
      older_files.insert(file.get_file_id(), file);
    }

    let index = index::new_indexer(options.index_type, &dir_path);

    let mut engine = Engine {
      options: Arc::new(options),
      active_data_file: Arc::new(RwLock::new(active_file)),
      older_files: Arc::new(RwLock::new(older_files)),
      index,
      file_ids,
      batch_commit_lock: Mutex::new(()),
      seq_no: Arc::new(AtomicU64::new(NON_TRANSACTION_SEQ_NO)),
      merging_lock: Mutex::new(()),
      seq_file_exists: false,
      is_initial,
      lock_file,
      bytes_write: Arc::new(AtomicUsize::new(0)),
    };

    if engine.options.index_type != IndexType::BPlusTree {
      engine.load_index_from_hint_file()?;
      let current_seq_no = engine.load_index_from_data_files()?;
      engine.seq_no.store(current_seq_no, Ordering::SeqCst);

      // a partially written tail must go physically, appends reuse the
      // file in append mode and have to line up with the write position
      {
        let active_file = engine.active_data_file.read();
        let write_off = active_file.get_write_off();
        if write_off < active_file.file_size() {
          let file_name = get_data_file_name(&dir_path, active_file.get_file_id());
          let file = fs::OpenOptions::new()
            .write(true)
            .open(&file_name)
            .map_err(|_| Errors::FailedToOpenDataFile)?;
          if let Err(e) = file.set_len(write_off) {
            error!("failed to truncate the corrupted tail: {}", e);
            return Err(Errors::FailedToWriteToDataFile);
          }
        }
      }

      if use_mmap {
        engine.reset_io_type()?;
      }
    } else {
      engine.load_seq_no()?;

      // no replay with the disk-backed index, so place the write
      // position at the physical end of the active file
      let active_file = engine.active_data_file.write();
      active_file.set_write_off(active_file.file_size());
    }

    Ok(engine)
  }

  /// Flushes the seq checkpoint (disk-backed index only) and the active
  /// data file.
  pub fn close(&self) -> Result<()> {
    if !self.options.dir_path.is_dir() {
      return Ok(());
    }

    if self.options.index_type == IndexType::BPlusTree {
      let seq_no_file = DataFile::new_seq_no_file(&self.options.dir_path)?;
      let seq_no_record = LogRecord {
        key: SEQ_NO_KEY.as_bytes().to_vec(),
        value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
        rec_type: LogRecordType::Normal,
      };
      seq_no_file.write(&seq_no_record.encode())?;
      seq_no_file.sync()?;
    }

    self.active_data_file.read().sync()
  }

  /// Fsyncs the active data file.
  pub fn sync(&self) -> Result<()> {
    self.active_data_file.read().sync()
  }

  pub fn stat(&self) -> Result<Stat> {
    let older_files = self.older_files.read();
    Ok(Stat {
      key_num: self.index.size(),
      data_file_num: older_files.len() + 1,
      disk_size: util::file::dir_disk_size(&self.options.dir_path),
    })
  }

  /// Stores `value` under `key`, replacing any previous value.
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let mut record = LogRecord {
      key: log_record_key_with_seq(key.to_vec(), NON_TRANSACTION_SEQ_NO),
      value: value.to_vec(),
      rec_type: LogRecordType::Normal,
    };

    let log_record_pos = self.append_log_record(&mut record)?;
    if !self.index.put(key.to_vec(), log_record_pos) {
      return Err(Errors::IndexUpdateFailed);
    }
    Ok(())
  }

  /// Removes `key`. Removing an absent key is not an error and writes
  /// nothing.
  pub fn delete(&self, key: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    if self.index.get(key.to_vec()).is_none() {
      return Ok(());
    }

    let mut record = LogRecord {
      key: log_record_key_with_seq(key.to_vec(), NON_TRANSACTION_SEQ_NO),
      value: Default::default(),
      rec_type: LogRecordType::Deleted,
    };
    self.append_log_record(&mut record)?;

    if !self.index.delete(key.to_vec()) {
      return Err(Errors::IndexUpdateFailed);
    }
    Ok(())
  }

  pub fn get(&self, key: Bytes) -> Result<Bytes> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    match self.index.get(key.to_vec()) {
      Some(pos) => self.get_value_by_position(&pos),
      None => Err(Errors::KeyNotFound),
    }
  }

  /// Resolves a position to the value stored there.
  pub(crate) fn get_value_by_position(&self, pos: &LogRecordPos) -> Result<Bytes> {
    let active_file = self.active_data_file.read();
    let older_files = self.older_files.read();

    let log_record = if active_file.get_file_id() == pos.file_id {
      active_file.read_log_record(pos.offset)?.record
    } else {
      match older_files.get(&pos.file_id) {
        Some(data_file) => data_file.read_log_record(pos.offset)?.record,
        None => return Err(Errors::DataFileNotFound),
      }
    };

    if log_record.rec_type == LogRecordType::Deleted {
      return Err(Errors::KeyNotFound);
    }

    Ok(log_record.value.into())
  }

  /// Appends one record to the active file, rotating first when the record
  /// would push it past `data_file_size`. Returns the record's position.
  pub(crate) fn append_log_record(&self, log_record: &mut LogRecord) -> Result<LogRecordPos> {
    let dir_path = &self.options.dir_path;
    let enc_record = log_record.encode();
    let record_len = enc_record.len() as u64;

    let mut active_file = self.active_data_file.write();
    if active_file.get_write_off() + record_len > self.options.data_file_size {
      // the sealed file must be durable before a new one shows up
      active_file.sync()?;

      let current_fid = active_file.get_file_id();
      let mut older_files = self.older_files.write();
      let old_file = DataFile::new(dir_path, current_fid, IOManagerType::StandardFileIO)?;
      older_files.insert(current_fid, old_file);

      let new_file = DataFile::new(dir_path, current_fid + 1, IOManagerType::StandardFileIO)?;
      *active_file = new_file;
    }

    let write_off = active_file.get_write_off();
    active_file.write(&enc_record)?;

    let written = self.bytes_write.fetch_add(enc_record.len(), Ordering::SeqCst) + enc_record.len();
    let mut need_sync = self.options.sync_writes;
    if !need_sync && self.options.bytes_per_sync > 0 && written >= self.options.bytes_per_sync {
      need_sync = true;
    }
    if need_sync {
      active_file.sync()?;
      self.bytes_write.store(0, Ordering::SeqCst);
    }

    Ok(LogRecordPos {
      file_id: active_file.get_file_id(),
      offset: write_off,
    })
  }

  pub(crate) fn is_engine_empty(&self) -> bool {
    let active_file = self.active_data_file.read();
    let older_files = self.older_files.read();
    active_file.get_write_off() == 0 && older_files.is_empty()
  }

  /// Replays every data file at or above the merge watermark, rebuilding
  /// the index and returning the largest transaction seq seen.
  fn load_index_from_data_files(&self) -> Result<u64> {
    let mut current_seq_no = NON_TRANSACTION_SEQ_NO;
    if self.file_ids.is_empty() {
      return Ok(current_seq_no);
    }

    // files below this id are already covered by the hint file
    let mut non_merge_file_id = 0;
    if self
      .options
      .dir_path
      .join(MERGE_FINISHED_FILE_NAME)
      .is_file()
    {
      non_merge_file_id = get_non_merge_file_id(&self.options.dir_path)?;
    }

    // records of an open batch, held back until its finish marker shows up
    let mut transaction_records: HashMap<u64, Vec<TransactionRecord>> = HashMap::new();

    let active_file = self.active_data_file.read();
    let older_files = self.older_files.read();

    for (i, file_id) in self.file_ids.iter().enumerate() {
      if *file_id < non_merge_file_id {
        continue;
      }

      let data_file = if *file_id == active_file.get_file_id() {
        &*active_file
      } else {
        older_files
          .get(file_id)
          .expect("data file disappeared while loading the index")
      };

      let mut offset = 0;
      loop {
        let (log_record, size) = match data_file.read_log_record(offset) {
          Ok(read) => (read.record, read.size),
          Err(Errors::ReadDataFileEOF) => break,
          Err(Errors::InvalidRecordCrc) if i == self.file_ids.len() - 1 => {
            // a partially written tail, everything after it is garbage
            warn!(
              "corrupted record at {:09}.data offset {}, truncating the tail",
              file_id, offset
            );
            break;
          }
          Err(e) => return Err(e),
        };

        let log_record_pos = LogRecordPos {
          file_id: *file_id,
          offset,
        };

        let (real_key, seq_no) = parse_log_record_key(log_record.key.clone());
        if seq_no == NON_TRANSACTION_SEQ_NO {
          self.update_index(real_key, log_record.rec_type, log_record_pos);
        } else if log_record.rec_type == LogRecordType::TxnFinished {
          // the batch is committed, apply it as a whole
          if let Some(records) = transaction_records.remove(&seq_no) {
            for txn_record in records {
              self.update_index(txn_record.record.key, txn_record.record.rec_type, txn_record.pos);
            }
          }
        } else {
          let mut record = log_record;
          record.key = real_key;
          transaction_records
            .entry(seq_no)
            .or_default()
            .push(TransactionRecord {
              record,
              pos: log_record_pos,
            });
        }

        if seq_no > current_seq_no {
          current_seq_no = seq_no;
        }

        offset += size as u64;
      }

      // the replay position of the last file is the write position
      if i == self.file_ids.len() - 1 {
        active_file.set_write_off(offset);
      }
    }

    // batches without a finish marker are dropped here; their bytes stay
    // in the log until the next merge
    Ok(current_seq_no)
  }

  fn update_index(&self, key: Vec<u8>, rec_type: LogRecordType, pos: LogRecordPos) {
    match rec_type {
      LogRecordType::Normal => {
        if !self.index.put(key, pos) {
          panic!("failed to update index at startup");
        }
      }
      LogRecordType::Deleted => {
        self.index.delete(key);
      }
      LogRecordType::TxnFinished => unreachable!("finish markers never reach the index"),
    }
  }

  /// Restores the seq counter persisted at the last clean shutdown, then
  /// removes the checkpoint so a stale value can never be reused.
  fn load_seq_no(&mut self) -> Result<()> {
    let file_name = self.options.dir_path.join(SEQ_NO_FILE_NAME);
    if !file_name.is_file() {
      return Ok(());
    }

    let seq_no_file = DataFile::new_seq_no_file(&self.options.dir_path)?;
    let record = seq_no_file.read_log_record(0)?.record;
    let v = String::from_utf8(record.value).expect("seq checkpoint is not valid utf8");
    let seq_no = v.parse::<u64>().expect("seq checkpoint is not a number");

    self.seq_no.store(seq_no, Ordering::SeqCst);
    self.seq_file_exists = true;

    fs::remove_file(file_name).expect("failed to remove the seq checkpoint");
    Ok(())
  }

  /// Swaps every data file from the startup memory map back to standard
  /// file IO so appends can resume.
  fn reset_io_type(&self) -> Result<()> {
    let mut active_file = self.active_data_file.write();
    active_file.set_io_manager(&self.options.dir_path, IOManagerType::StandardFileIO)?;

    let mut older_files = self.older_files.write();
    for (_, file) in older_files.iter_mut() {
      file.set_io_manager(&self.options.dir_path, IOManagerType::StandardFileIO)?;
    }
    Ok(())
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      error!("error while closing the engine: {}", e);
    }
    if let Err(e) = self.lock_file.unlock() {
      error!("failed to unlock the directory: {}", e);
    }
  }
}

fn check_options(opts: &Options) -> Result<()> {
  let dir_path = opts.dir_path.to_str();
  if dir_path.is_none() || dir_path.unwrap().is_empty() {
    return Err(Errors::DirPathIsEmpty);
  }

  if opts.data_file_size == 0 {
    return Err(Errors::DataFileSizeTooSmall);
  }

  Ok(())
}

fn load_data_files<P>(dir_path: P, use_mmap: bool) -> Result<Vec<DataFile>>
where
  P: AsRef<Path>,
{
  let dir = match fs::read_dir(&dir_path) {
    Ok(dir) => dir,
    Err(e) => {
      error!("failed to read the database directory: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };

  let mut file_ids = Vec::new();
  for entry in dir.flatten() {
    let file_os_str = entry.file_name();
    let file_name = file_os_str.to_str().unwrap();

    if file_name.ends_with(DATA_FILE_NAME_SUFFIX) {
      let split_names: Vec<&str> = file_name.split('.').collect();
      let file_id = match split_names[0].parse::<u32>() {
        Ok(fid) => fid,
        Err(_) => return Err(Errors::DataDirectoryCorrupted),
      };
      file_ids.push(file_id);
    }
  }

  // load from the smallest id up, the last file opened is the active one
  file_ids.sort();

  let mut data_files = Vec::new();
  for file_id in file_ids.iter() {
    let io_type = if use_mmap {
      IOManagerType::MemoryMap
    } else {
      IOManagerType::StandardFileIO
    };
    data_files.push(DataFile::new(&dir_path, *file_id, io_type)?);
  }

  Ok(data_files)
}
