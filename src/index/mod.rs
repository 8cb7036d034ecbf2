pub mod art;
pub mod bptree;
pub mod btree;

use std::path::Path;

use bytes::Bytes;

use crate::{
  data::log_record::LogRecordPos,
  errors::Result,
  option::{IndexType, IteratorOptions},
};

/// In-memory key to position map. Every variant carries its own internal
/// synchronization, the engine treats the index as thread-safe.
pub trait Indexer: Sync + Send {
  /// Inserts or replaces the position for `key`.
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> bool;

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos>;

  /// Removes `key`, reporting whether it existed.
  fn delete(&self, key: Vec<u8>) -> bool;

  fn size(&self) -> usize;

  fn list_keys(&self) -> Result<Vec<Bytes>>;

  /// Creates an iterator over a snapshot of the current key set.
  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator>;
}

pub fn new_indexer<P>(index_type: IndexType, dir_path: P) -> Box<dyn Indexer>
where
  P: AsRef<Path>,
{
  match index_type {
    IndexType::BTree => Box::new(btree::BTree::new()),
    IndexType::AdaptiveRadix => Box::new(art::AdaptiveRadixTree::new()),
    IndexType::BPlusTree => Box::new(bptree::BPlusTree::new(dir_path)),
  }
}

/// Ordered walk over index entries, ascending byte order of keys, or
/// descending when created with `reverse`.
pub trait IndexIterator: Sync + Send {
  /// Back to the first entry.
  fn rewind(&mut self);

  /// Positions on the first key >= `key` (<= when reversed).
  fn seek(&mut self, key: Vec<u8>);

  /// Yields the current entry and advances, `None` once exhausted.
  fn next(&mut self) -> Option<(&Vec<u8>, &LogRecordPos)>;
}
