use std::{path::Path, sync::Arc};

use bytes::Bytes;
use jammdb::DB;

use crate::{
  data::log_record::{decode_log_record_pos, LogRecordPos},
  errors::Result,
  option::IteratorOptions,
};

use super::{IndexIterator, Indexer};

const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";
const BPTREE_BUCKET_NAME: &str = "emberkv-index";

/// Disk-backed index persisted in an embedded B+-tree. Entries survive
/// restarts, so the engine skips log replay with this variant.
pub struct BPlusTree {
  tree: Arc<DB>,
}

impl BPlusTree {
  pub fn new<P>(dir_path: P) -> Self
  where
    P: AsRef<Path>,
  {
    let bptree =
      DB::open(dir_path.as_ref().join(BPTREE_INDEX_FILE_NAME)).expect("failed to open bptree index");
    let tree = Arc::new(bptree);

    let tx = tree.tx(true).expect("failed to begin tx");
    tx.get_or_create_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to create index bucket");
    tx.commit().unwrap();

    Self { tree }
  }
}

impl Indexer for BPlusTree {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> bool {
    let tx = self.tree.tx(true).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");
    bucket
      .put(key, pos.encode())
      .expect("failed to put key in bptree");
    tx.commit().unwrap();
    true
  }

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let tx = self.tree.tx(false).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");
    bucket
      .get_kv(key)
      .map(|kv| decode_log_record_pos(kv.value().to_vec()))
  }

  fn delete(&self, key: Vec<u8>) -> bool {
    let tx = self.tree.tx(true).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");
    let existed = bucket.delete(key).is_ok();
    tx.commit().unwrap();
    existed
  }

  fn size(&self) -> usize {
    let tx = self.tree.tx(false).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");
    bucket.kv_pairs().count()
  }

  fn list_keys(&self) -> Result<Vec<Bytes>> {
    let tx = self.tree.tx(false).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");
    Ok(
      bucket
        .kv_pairs()
        .map(|kv| Bytes::from(kv.key().to_vec()))
        .collect(),
    )
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    // the read transaction lives only for this snapshot
    let tx = self.tree.tx(false).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");

    let mut items: Vec<(Vec<u8>, LogRecordPos)> = bucket
      .kv_pairs()
      .map(|kv| (kv.key().to_vec(), decode_log_record_pos(kv.value().to_vec())))
      .collect();
    if options.reverse {
      items.reverse();
    }

    Box::new(BPlusTreeIterator {
      items,
      curr_index: 0,
      options,
    })
  }
}

pub struct BPlusTreeIterator {
  items: Vec<(Vec<u8>, LogRecordPos)>,
  curr_index: usize,
  options: IteratorOptions,
}

impl IndexIterator for BPlusTreeIterator {
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
