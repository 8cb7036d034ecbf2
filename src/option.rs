use lazy_static::lazy_static;
use std::path::PathBuf;

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("emberkv");
}

#[derive(Debug, Clone)]
pub struct Options {
  /// Database directory, must be non-empty.
  pub dir_path: PathBuf,

  /// Max bytes per data file before rotation, must be greater than 0.
  pub data_file_size: u64,

  /// Fsync after every append.
  pub sync_writes: bool,

  /// If greater than 0, fsync after accumulating this many unsynced bytes.
  pub bytes_per_sync: usize,

  pub index_type: IndexType,

  /// Memory-map data files for the recovery scan, then swap back to
  /// standard file IO before any write.
  pub mmap_at_startup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
  /// Ordered tree guarded by a readers-writer lock, the default.
  BTree,

  /// Radix tree, cheaper on long shared key prefixes.
  AdaptiveRadix,

  /// Entries persisted in an embedded B+-tree, for key sets that do not
  /// fit in memory. Startup replay is skipped with this variant.
  BPlusTree,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      dir_path: DEFAULT_DIR_PATH.clone(),
      data_file_size: 256 * 1024 * 1024, // 256MB
      sync_writes: false,
      bytes_per_sync: 0,
      index_type: IndexType::BTree,
      mmap_at_startup: true,
    }
  }
}

pub struct IteratorOptions {
  /// Only keys starting with this byte prefix are yielded.
  pub prefix: Vec<u8>,
  pub reverse: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for IteratorOptions {
  fn default() -> Self {
    Self {
      prefix: Default::default(),
      reverse: false,
    }
  }
}

pub struct WriteBatchOptions {
  /// Max number of pending operations in one batch.
  pub max_batch_num: usize,

  /// Fsync the active file once the txn-finished record is appended.
  pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
  fn default() -> Self {
    Self {
      max_batch_num: 1000,
      sync_writes: true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOManagerType {
  StandardFileIO,

  /// Read-only memory map, only used for startup scans.
  MemoryMap,
}
