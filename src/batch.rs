use std::{collections::HashMap, sync::atomic::Ordering, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use prost::encoding::{decode_varint, encode_varint};

use crate::{
  data::log_record::{LogRecord, LogRecordType},
  db::Engine,
  errors::{Errors, Result},
  option::{IndexType, WriteBatchOptions},
};

/// Seq value tagging writes that happen outside a batch.
pub(crate) const NON_TRANSACTION_SEQ_NO: u64 = 0;

/// Reserved key of the record committing a batch.
pub(crate) const TXN_FIN_KEY: &[u8] = "txn-fin".as_bytes();

/// Buffers puts and deletes and commits them atomically: either every
/// operation becomes visible or, after a crash, none of them do.
pub struct WriteBatch<'a> {
  /// Last write per user key wins, order of insertion is irrelevant.
  pending_writes: Arc<Mutex<HashMap<Vec<u8>, LogRecord>>>,
  engine: &'a Engine,
  options: WriteBatchOptions,
}

impl Engine {
  /// Creates an empty write batch.
  ///
  /// With the disk-backed index the batch seq must have survived the last
  /// shutdown; on a pre-existing directory without a seq checkpoint the
  /// batch API stays unavailable.
  pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch> {
    if self.options.index_type == IndexType::BPlusTree && !self.seq_file_exists && !self.is_initial
    {
      return Err(Errors::UnableToUseWriteBatch);
    }

    Ok(WriteBatch {
      pending_writes: Arc::new(Mutex::new(HashMap::new())),
      engine: self,
      options,
    })
  }
}

impl WriteBatch<'_> {
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let record = LogRecord {
      key: key.to_vec(),
      value: value.to_vec(),
      rec_type: LogRecordType::Normal,
    };

    let mut pending_writes = self.pending_writes.lock();
    pending_writes.insert(key.to_vec(), record);
    Ok(())
  }

  pub fn delete(&self, key: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let mut pending_writes = self.pending_writes.lock();

    // deleting a key unknown to both the index and this batch is a no-op,
    // a tombstone would only waste log space
    if self.engine.index.get(key.to_vec()).is_none() {
      pending_writes.remove(&key.to_vec());
      return Ok(());
    }

    let record = LogRecord {
      key: key.to_vec(),
      value: Default::default(),
      rec_type: LogRecordType::Deleted,
    };
    pending_writes.insert(key.to_vec(), record);
    Ok(())
  }

  /// Writes all pending operations under one seq, sealed by a txn-finished
  /// record. The index only changes after the marker is in the log.
  pub fn commit(&self) -> Result<()> {
    let mut pending_writes = self.pending_writes.lock();
    if pending_writes.is_empty() {
      return Ok(());
    }
    if pending_writes.len() > self.options.max_batch_num {
      return Err(Errors::ExceedMaxBatchNum);
    }

    // batch commits are serialized against each other
    let _commit_guard = self.engine.batch_commit_lock.lock();

    let seq_no = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

    let mut positions = HashMap::new();
    for (_, item) in pending_writes.iter() {
      let mut record = LogRecord {
        key: log_record_key_with_seq(item.key.clone(), seq_no),
        value: item.value.clone(),
        rec_type: item.rec_type,
      };
      let pos = self.engine.append_log_record(&mut record)?;
      positions.insert(item.key.clone(), pos);
    }

    // the marker is what commits the batch
    let mut fin_record = LogRecord {
      key: log_record_key_with_seq(TXN_FIN_KEY.to_vec(), seq_no),
      value: Default::default(),
      rec_type: LogRecordType::TxnFinished,
    };
    self.engine.append_log_record(&mut fin_record)?;

    if self.options.sync_writes {
      self.engine.sync()?;
    }

    // marker is durable, now the batch may become visible
    for (_, item) in pending_writes.iter() {
      let pos = positions.get(&item.key).unwrap();
      match item.rec_type {
        LogRecordType::Normal => {
          self.engine.index.put(item.key.clone(), *pos);
        }
        LogRecordType::Deleted => {
          self.engine.index.delete(item.key.clone());
        }
        LogRecordType::TxnFinished => unreachable!("markers are never buffered"),
      }
    }

    pending_writes.clear();
    Ok(())
  }
}

/// Builds a stored key: `[uvarint(seq)][user key bytes]`.
pub(crate) fn log_record_key_with_seq(key: Vec<u8>, seq_no: u64) -> Vec<u8> {
  let mut enc_key = BytesMut::new();
  encode_varint(seq_no, &mut enc_key);
  enc_key.extend_from_slice(&key);
  enc_key.to_vec()
}

/// Splits a stored key back into the user key and its seq.
pub(crate) fn parse_log_record_key(key: Vec<u8>) -> (Vec<u8>, u64) {
  let mut buf = BytesMut::new();
  buf.put_slice(&key);
  let seq_no = decode_varint(&mut buf).expect("failed to decode seq from stored key");
  (buf.to_vec(), seq_no)
}
