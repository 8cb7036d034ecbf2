use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
  db::Engine,
  errors::Result,
  index::IndexIterator,
  option::IteratorOptions,
};

/// User-facing ordered scan. Wraps an index iterator and resolves each
/// position to its value on demand. Direction and prefix are fixed at
/// creation.
pub struct Iterator<'a> {
  index_iter: Arc<RwLock<Box<dyn IndexIterator>>>,
  engine: &'a Engine,
}

impl Engine {
  pub fn iter(&self, options: IteratorOptions) -> Iterator {
    Iterator {
      index_iter: Arc::new(RwLock::new(self.index.iterator(options))),
      engine: self,
    }
  }

  /// All live keys in ascending byte order.
  pub fn list_keys(&self) -> Result<Vec<Bytes>> {
    self.index.list_keys()
  }

  /// Calls `f` on every live pair in ascending key order, stopping early
  /// once `f` returns false.
  pub fn fold<F>(&self, f: F) -> Result<()>
  where
    F: Fn(Bytes, Bytes) -> bool,
  {
    let iter = self.iter(IteratorOptions::default());
    while let Some((key, value)) = iter.next() {
      if !f(key, value) {
        break;
      }
    }
    Ok(())
  }
}

impl Iterator<'_> {
  /// Back to the first entry.
  pub fn rewind(&self) {
    let mut index_iter = self.index_iter.write();
    index_iter.rewind();
  }

  /// Jumps to the first key >= `key` (<= when reversed).
  pub fn seek(&self, key: Vec<u8>) {
    let mut index_iter = self.index_iter.write();
    index_iter.seek(key);
  }

  /// Yields the next live pair, `None` once the scan is exhausted.
  #[allow(clippy::should_implement_trait)]
  pub fn next(&self) -> Option<(Bytes, Bytes)> {
    let mut index_iter = self.index_iter.write();
    if let Some((key, pos)) = index_iter.next() {
      let value = self
        .engine
        .get_value_by_position(pos)
        .expect("failed to read the value an index entry points at");
      return Some((Bytes::from(key.clone()), value));
    }
    None
  }
}
