use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::{
  decode_length_delimiter, encode_length_delimiter,
  encoding::{decode_varint, encode_varint},
  length_delimiter_len,
};

/// On-disk layout of a single log record:
///
/// ```text
/// +---------+-------+---------------+---------------+-----+-------+
/// | crc(4)  | type  | key len       | value len     | key | value |
/// +---------+-------+---------------+---------------+-----+-------+
///   u32 LE    u8      varint          varint
/// ```
///
/// The crc covers every byte after itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
  Normal = 1,

  /// Tombstone, the key no longer exists.
  Deleted = 2,

  /// Commit marker for all records carrying the same seq number.
  TxnFinished = 3,
}

impl LogRecordType {
  pub fn from_u8(v: u8) -> LogRecordType {
    match v {
      1 => LogRecordType::Normal,
      2 => LogRecordType::Deleted,
      3 => LogRecordType::TxnFinished,
      _ => panic!("unknown log record type: {}", v),
    }
  }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
  pub(crate) key: Vec<u8>,
  pub(crate) value: Vec<u8>,
  pub(crate) rec_type: LogRecordType,
}

impl LogRecord {
  /// Serializes the record, crc first.
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(self.encoded_length());

    // crc placeholder, patched once the rest of the record is in place
    buf.put_u32_le(0);
    buf.put_u8(self.rec_type as u8);
    encode_length_delimiter(self.key.len(), &mut buf).unwrap();
    encode_length_delimiter(self.value.len(), &mut buf).unwrap();
    buf.extend_from_slice(&self.key);
    buf.extend_from_slice(&self.value);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[4..]);
    let crc = hasher.finalize();
    buf[..4].copy_from_slice(&crc.to_le_bytes());

    buf.to_vec()
  }

  fn encoded_length(&self) -> usize {
    4 + 1
      + length_delimiter_len(self.key.len())
      + length_delimiter_len(self.value.len())
      + self.key.len()
      + self.value.len()
  }
}

/// Upper bound of the encoded header: crc + type + two maximal varints.
pub fn max_log_record_header_size() -> usize {
  4 + 1 + length_delimiter_len(u32::MAX as usize) * 2
}

/// Decoded header fields. The type byte stays raw until the crc of the full
/// record has been verified.
pub(crate) struct LogRecordHeader {
  pub(crate) crc: u32,
  pub(crate) rec_type: u8,
  pub(crate) key_size: usize,
  pub(crate) value_size: usize,
}

/// Parses a header from the front of `buf`, returning the consumed byte
/// count as well. `None` means too few bytes to hold a header.
pub(crate) fn decode_log_record_header(buf: Bytes) -> Option<(LogRecordHeader, usize)> {
  if buf.len() <= 4 {
    return None;
  }

  let mut buf = buf;
  let crc = buf.get_u32_le();
  let rec_type = buf.get_u8();
  let key_size = decode_length_delimiter(&mut buf).ok()?;
  let value_size = decode_length_delimiter(&mut buf).ok()?;

  let header_size = 4 + 1 + length_delimiter_len(key_size) + length_delimiter_len(value_size);
  Some((
    LogRecordHeader {
      crc,
      rec_type,
      key_size,
      value_size,
    },
    header_size,
  ))
}

/// A record decoded from disk plus the number of bytes it occupied.
pub struct ReadLogRecord {
  pub(crate) record: LogRecord,
  pub(crate) size: usize,
}

/// Holds a batch record until its txn-finished marker shows up during the
/// startup replay.
pub(crate) struct TransactionRecord {
  pub(crate) record: LogRecord,
  pub(crate) pos: LogRecordPos,
}

/// Where a record lives on disk, pointing at its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
  pub(crate) file_id: u32,
  pub(crate) offset: u64,
}

impl LogRecordPos {
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_varint(self.file_id as u64, &mut buf);
    encode_varint(self.offset, &mut buf);
    buf.to_vec()
  }
}

pub fn decode_log_record_pos(pos: Vec<u8>) -> LogRecordPos {
  let mut buf = Bytes::from(pos);
  let file_id = decode_varint(&mut buf).expect("failed to decode file id") as u32;
  let offset = decode_varint(&mut buf).expect("failed to decode offset");
  LogRecordPos { file_id, offset }
}
