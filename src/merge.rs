use std::{
  fs,
  path::{Path, PathBuf},
};

use log::error;

use crate::{
  batch::{log_record_key_with_seq, parse_log_record_key, NON_TRANSACTION_SEQ_NO},
  data::{
    data_file::{
      get_data_file_name, DataFile, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME,
      MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
    },
    log_record::{decode_log_record_pos, LogRecord, LogRecordType},
  },
  db::{Engine, FILE_LOCK_NAME},
  errors::{Errors, Result},
  option::{IOManagerType, Options},
  util,
};

const MERGE_DIR_NAME: &str = "merge";
const MERGE_FIN_KEY: &[u8] = "merge.finished".as_bytes();

impl Engine {
  /// Compacts the log: rewrites every live record into a staging directory
  /// next to the database, together with a hint file, and marks the result
  /// ready. Promotion into the primary directory happens on the next open.
  ///
  /// Writers are only paused while the active file is rotated out; records
  /// written during the merge land in files the merge never touches.
  pub fn merge(&self) -> Result<()> {
    if self.is_engine_empty() {
      return Ok(());
    }

    let lock = self.merging_lock.try_lock();
    if lock.is_none() {
      return Err(Errors::MergeInProgress);
    }

    // staging may need room for a full copy of the database
    let total_size = util::file::dir_disk_size(&self.options.dir_path);
    if total_size >= util::file::available_disk_space() {
      return Err(Errors::MergeNoEnoughSpace);
    }

    let merge_path = get_merge_path(&self.options.dir_path);
    if merge_path.is_dir() {
      fs::remove_dir_all(&merge_path).unwrap();
    }
    if let Err(e) = fs::create_dir_all(&merge_path) {
      error!("failed to create the merge directory: {}", e);
      return Err(Errors::FailedToCreateDatabaseDir);
    }

    let merge_files = self.rotate_merge_files()?;

    let mut merge_db_opts = Options::default();
    merge_db_opts.dir_path = merge_path.clone();
    merge_db_opts.data_file_size = self.options.data_file_size;
    // one explicit fsync at the end instead of record-by-record syncs
    merge_db_opts.sync_writes = false;
    let merge_db = Engine::open(merge_db_opts)?;

    let hint_file = DataFile::new_hint_file(&merge_path)?;

    for data_file in merge_files.iter() {
      let mut offset = 0;
      loop {
        let (mut log_record, size) = match data_file.read_log_record(offset) {
          Ok(read) => (read.record, read.size),
          Err(Errors::ReadDataFileEOF) => break,
          Err(e) => return Err(e),
        };

        // live iff the current index still points exactly at this record
        let (real_key, _) = parse_log_record_key(log_record.key.clone());
        if let Some(index_pos) = self.index.get(real_key.clone()) {
          if index_pos.file_id == data_file.get_file_id() && index_pos.offset == offset {
            // survivors become plain writes, their batch is long settled
            log_record.key = log_record_key_with_seq(real_key.clone(), NON_TRANSACTION_SEQ_NO);
            let new_pos = merge_db.append_log_record(&mut log_record)?;
            hint_file.write_hint_record(real_key, new_pos)?;
          }
        }
        offset += size as u64;
      }
    }

    merge_db.sync()?;
    hint_file.sync()?;

    // the first id the merge did not cover; everything below it is
    // superseded by the staged files
    let non_merge_file_id = merge_files.last().unwrap().get_file_id() + 1;
    let merge_fin_file = DataFile::new_merge_fin_file(&merge_path)?;
    let merge_fin_record = LogRecord {
      key: MERGE_FIN_KEY.to_vec(),
      value: non_merge_file_id.to_string().into_bytes(),
      rec_type: LogRecordType::Normal,
    };
    merge_fin_file.write(&merge_fin_record.encode())?;
    merge_fin_file.sync()?;

    Ok(())
  }

  /// Seals the active file and snapshots every sealed file for the merge.
  /// Writers continue into a fresh active file the moment this returns.
  fn rotate_merge_files(&self) -> Result<Vec<DataFile>> {
    // lock order matches the append path: active file first, sealed map second
    let mut active_file = self.active_data_file.write();
    let mut older_files = self.older_files.write();

    let mut merge_file_ids: Vec<u32> = older_files.keys().copied().collect();

    active_file.sync()?;
    let active_file_id = active_file.get_file_id();
    *active_file = DataFile::new(
      &self.options.dir_path,
      active_file_id + 1,
      IOManagerType::StandardFileIO,
    )?;

    let sealed = DataFile::new(
      &self.options.dir_path,
      active_file_id,
      IOManagerType::StandardFileIO,
    )?;
    older_files.insert(active_file_id, sealed);
    merge_file_ids.push(active_file_id);

    // rewrite from the oldest file up so newer records win
    merge_file_ids.sort();

    let mut merge_files = Vec::new();
    for file_id in merge_file_ids {
      merge_files.push(DataFile::new(
        &self.options.dir_path,
        file_id,
        IOManagerType::StandardFileIO,
      )?);
    }
    Ok(merge_files)
  }

  /// Replays the hint file, if any, straight into the index.
  pub(crate) fn load_index_from_hint_file(&self) -> Result<()> {
    let hint_file_name = self.options.dir_path.join(HINT_FILE_NAME);
    if !hint_file_name.is_file() {
      return Ok(());
    }

    let hint_file = DataFile::new_hint_file(&self.options.dir_path)?;
    let mut offset = 0;
    loop {
      let (log_record, size) = match hint_file.read_log_record(offset) {
        Ok(read) => (read.record, read.size),
        Err(Errors::ReadDataFileEOF) => break,
        Err(e) => return Err(e),
      };

      let pos = decode_log_record_pos(log_record.value);
      self.index.put(log_record.key, pos);
      offset += size as u64;
    }

    Ok(())
  }
}

fn get_merge_path<P>(dir_path: P) -> PathBuf
where
  P: AsRef<Path>,
{
  let file_name = dir_path.as_ref().file_name().unwrap();
  let merge_name = std::format!("{}-{}", file_name.to_str().unwrap(), MERGE_DIR_NAME);
  let parent = dir_path.as_ref().parent().unwrap();
  parent.to_path_buf().join(merge_name)
}

/// Promotes a finished merge: removes the files it superseded and moves the
/// staged files into the primary directory. A staging directory without the
/// finished marker is a dead merge and is discarded.
pub(crate) fn load_merge_files<P>(dir_path: P) -> Result<()>
where
  P: AsRef<Path>,
{
  let merge_path = get_merge_path(&dir_path);
  if !merge_path.is_dir() {
    return Ok(());
  }

  let dir = match fs::read_dir(&merge_path) {
    Ok(dir) => dir,
    Err(e) => {
      error!("failed to read the merge directory: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };

  let mut merge_file_names = Vec::new();
  let mut merge_finished = false;
  for file in dir.flatten() {
    let file_os_str = file.file_name();
    let file_name = file_os_str.to_str().unwrap();

    if file_name.ends_with(MERGE_FINISHED_FILE_NAME) {
      merge_finished = true;
    }
    // the staging engine's own bookkeeping stays behind
    if file_name.ends_with(SEQ_NO_FILE_NAME) {
      continue;
    }
    if file_name.ends_with(FILE_LOCK_NAME) {
      continue;
    }
    let meta = file.metadata().unwrap();
    if file_name.ends_with(DATA_FILE_NAME_SUFFIX) && meta.len() == 0 {
      continue;
    }

    merge_file_names.push(file.file_name());
  }

  if !merge_finished {
    fs::remove_dir_all(&merge_path).unwrap();
    return Ok(());
  }

  // only now is it safe to drop the superseded originals
  let non_merge_file_id = get_non_merge_file_id(&merge_path)?;
  for fid in 0..non_merge_file_id {
    let file = get_data_file_name(&dir_path, fid);
    if file.is_file() {
      fs::remove_file(file).unwrap();
    }
  }

  for file_name in merge_file_names {
    let src_path = merge_path.join(&file_name);
    let dst_path = dir_path.as_ref().join(&file_name);
    fs::rename(src_path, dst_path).unwrap();
  }

  fs::remove_dir_all(&merge_path).unwrap();

  Ok(())
}

/// Reads the first id not covered by the merge from the finished marker.
pub(crate) fn get_non_merge_file_id<P>(dir_path: P) -> Result<u32>
where
  P: AsRef<Path>,
{
  let merge_fin_file = DataFile::new_merge_fin_file(dir_path)?;
  let merge_fin_record = merge_fin_file.read_log_record(0)?;
  let v = String::from_utf8(merge_fin_record.record.value).unwrap();
  let non_merge_file_id = v.parse::<u32>().unwrap();
  Ok(non_merge_file_id)
}

#[cfg(test)]
mod tests {
  use std::{path::PathBuf, sync::Arc, thread};

  use bytes::Bytes;

  use super::*;
  use crate::util::rand_kv::{get_test_key, get_test_value};

  #[test]
  fn test_merge_empty_engine() {
    let mut opt = Options::default();
    opt.dir_path = PathBuf::from("/tmp/emberkv-merge-1");
    let _ = fs::remove_dir_all(&opt.dir_path);
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    assert!(engine.merge().is_ok());

    fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_preserves_live_records() {
    let mut opt = Options::default();
    opt.dir_path = PathBuf::from("/tmp/emberkv-merge-2");
    opt.data_file_size = 32 * 1024;
    let _ = fs::remove_dir_all(&opt.dir_path);
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..5000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    assert!(engine.merge().is_ok());

    std::mem::drop(engine);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    let keys = engine2.list_keys().unwrap();
    assert_eq!(keys.len(), 5000);
    for i in 0..5000 {
      assert_eq!(engine2.get(get_test_key(i)).unwrap(), get_test_value(i));
    }

    fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_reclaims_space() {
    let mut opt = Options::default();
    opt.dir_path = PathBuf::from("/tmp/emberkv-merge-3");
    opt.data_file_size = 32 * 1024;
    let _ = fs::remove_dir_all(&opt.dir_path);
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..1000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    for i in 0..500 {
      engine
        .put(get_test_key(i), Bytes::from("overwritten value"))
        .unwrap();
    }
    for i in 500..750 {
      engine.delete(get_test_key(i)).unwrap();
    }
    let size_before = util::file::dir_disk_size(&opt.dir_path);

    assert!(engine.merge().is_ok());
    std::mem::drop(engine);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    let size_after = util::file::dir_disk_size(&opt.dir_path);
    assert!(size_after < size_before);

    assert_eq!(engine2.list_keys().unwrap().len(), 750);
    for i in 0..500 {
      assert_eq!(
        engine2.get(get_test_key(i)).unwrap(),
        Bytes::from("overwritten value")
      );
    }
    for i in 500..750 {
      assert_eq!(
        engine2.get(get_test_key(i)).err().unwrap(),
        Errors::KeyNotFound
      );
    }
    for i in 750..1000 {
      assert_eq!(engine2.get(get_test_key(i)).unwrap(), get_test_value(i));
    }

    fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_after_delete_all() {
    let mut opt = Options::default();
    opt.dir_path = PathBuf::from("/tmp/emberkv-merge-4");
    opt.data_file_size = 32 * 1024;
    let _ = fs::remove_dir_all(&opt.dir_path);
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..2000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
      engine.delete(get_test_key(i)).unwrap();
    }

    assert!(engine.merge().is_ok());
    std::mem::drop(engine);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    assert_eq!(engine2.list_keys().unwrap().len(), 0);
    for i in 0..2000 {
      assert_eq!(
        engine2.get(get_test_key(i)).err().unwrap(),
        Errors::KeyNotFound
      );
    }

    fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_with_concurrent_writes() {
    let mut opt = Options::default();
    opt.dir_path = PathBuf::from("/tmp/emberkv-merge-5");
    opt.data_file_size = 32 * 1024;
    let _ = fs::remove_dir_all(&opt.dir_path);
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..2000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    for i in 1000..2000 {
      engine.delete(get_test_key(i)).unwrap();
    }

    let eng = Arc::new(engine);

    let writer = {
      let eng = eng.clone();
      thread::spawn(move || {
        for i in 5000..7000 {
          eng.put(get_test_key(i), get_test_value(i)).unwrap();
        }
      })
    };
    let merger = {
      let eng = eng.clone();
      thread::spawn(move || {
        eng.merge().unwrap();
      })
    };
    writer.join().unwrap();
    merger.join().unwrap();

    std::mem::drop(eng);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    assert_eq!(engine2.list_keys().unwrap().len(), 3000);
    for i in 0..1000 {
      assert_eq!(engine2.get(get_test_key(i)).unwrap(), get_test_value(i));
    }
    for i in 5000..7000 {
      assert_eq!(engine2.get(get_test_key(i)).unwrap(), get_test_value(i));
    }

    fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }
}
