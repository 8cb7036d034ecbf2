use std::result;

use thiserror::Error;

/// All failures the engine can surface to callers.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Errors {
  #[error("the key is empty")]
  KeyIsEmpty,

  #[error("key not found in database")]
  KeyNotFound,

  #[error("failed to update index")]
  IndexUpdateFailed,

  #[error("data file is not found")]
  DataFileNotFound,

  #[error("the database directory maybe corrupted")]
  DataDirectoryCorrupted,

  #[error("exceed the max batch num")]
  ExceedMaxBatchNum,

  #[error("merge is in progress, try again later")]
  MergeInProgress,

  #[error("no enough disk space for merge")]
  MergeNoEnoughSpace,

  #[error("cannot use write batch, seq no file not exists")]
  UnableToUseWriteBatch,

  #[error("the database directory is used by another process")]
  DatabaseIsUsing,

  #[error("invalid crc value, log record maybe corrupted")]
  InvalidRecordCrc,

  /// Internal marker for a clean end of a data file scan.
  #[error("read data file eof")]
  ReadDataFileEOF,

  #[error("dir path can not be empty")]
  DirPathIsEmpty,

  #[error("data file size must be greater than 0")]
  DataFileSizeTooSmall,

  #[error("failed to open data file")]
  FailedToOpenDataFile,

  #[error("failed to read from data file")]
  FailedToReadFromDataFile,

  #[error("failed to write to data file")]
  FailedToWriteToDataFile,

  #[error("failed to sync data file")]
  FailedToSyncDataFile,

  #[error("failed to create the database directory")]
  FailedToCreateDatabaseDir,

  #[error("failed to read the database directory")]
  FailedToReadDatabaseDir,
}

pub type Result<T> = result::Result<T, Errors>;
