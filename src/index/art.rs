use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};

use crate::{data::log_record::LogRecordPos, errors::Result, option::IteratorOptions};

use super::{IndexIterator, Indexer};

/// Radix-tree index. Stores shared key prefixes once, which keeps the
/// footprint down for key spaces like `user/0000001/...`.
pub struct AdaptiveRadixTree {
  tree: Arc<RwLock<Trie<Vec<u8>, LogRecordPos>>>,
}

impl AdaptiveRadixTree {
  pub fn new() -> Self {
    Self {
      tree: Arc::new(RwLock::new(Trie::new())),
    }
  }
}

impl Indexer for AdaptiveRadixTree {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> bool {
    let mut write_guard = self.tree.write();
    write_guard.insert(key, pos);
    true
  }

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let read_guard = self.tree.read();
    read_guard.get(&key).copied()
  }

  fn delete(&self, key: Vec<u8>) -> bool {
    let mut write_guard = self.tree.write();
    write_guard.remove(&key).is_some()
  }

  fn size(&self) -> usize {
    self.tree.read().len()
  }

  fn list_keys(&self) -> Result<Vec<Bytes>> {
    let read_guard = self.tree.read();
    Ok(
      read_guard
        .iter()
        .map(|(key, _)| Bytes::from(key.clone()))
        .collect(),
    )
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    let read_guard = self.tree.read();
    let mut items: Vec<(Vec<u8>, LogRecordPos)> = read_guard
      .iter()
      .map(|(key, pos)| (key.clone(), *pos))
      .collect();
    // trie iteration is already in ascending key order
    if options.reverse {
      items.reverse();
    }

    Box::new(AdaptiveRadixTreeIterator {
      items,
      curr_index: 0,
      options,
    })
  }
}

pub struct AdaptiveRadixTreeIterator {
  items: Vec<(Vec<u8>, LogRecordPos)>,
  curr_index: usize,
  options: IteratorOptions,
}

impl IndexIterator for AdaptiveRadixTreeIterator {
  fn rewind(&mut self) {
    self.curr_index = 0;
  }

  fn seek(&mut self, key: Vec<u8>) {
    self.curr_index = match self.items.binary_search_by(|(x, _)| {
      if self.options.reverse {
        x.cmp(&key).reverse()
      } else {
        x.cmp(&key)
      }
    }) {
      Ok(equal_val) => equal_val,
      Err(insert_val) => insert_val,
    };
  }

  fn next(&mut self) -> Option<(&Vec<u8>, &LogRecordPos)> {
    if self.curr_index >= self.items.len() {
      return None;
    }

    while let Some(item) = self.items.get(self.curr_index) {
      self.curr_index += 1;
      let prefix = &self.options.prefix;
      if prefix.is_empty() || item.0.starts_with(prefix) {
        return Some((&item.0, &item.1));
      }
    }
    None
  }
}
