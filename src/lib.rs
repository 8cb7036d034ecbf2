//! EmberKV: an embeddable key-value storage engine built on the Bitcask model.
//!
//! EmberKV pairs an append-only log on disk with a fully in-memory index, so
//! every read costs at most one seek and every write is a sequential append.
//! The working set of keys has to fit in memory (or the disk-backed index
//! variant takes over); values do not.
//!
//! # Features
//!
//! * One positioned read per lookup, sequential appends per write
//! * Configurable durability: per-write fsync or a bytes-written watermark
//! * Atomic multi-key write batches sealed by a commit record
//! * Space reclamation through live-record compaction with a hint file
//! * Pluggable index: ordered tree, radix tree, or an embedded B+-tree
//! * Memory-mapped reads to speed up startup recovery
//!
//! # Basic Usage
//!
//! ```
//! use bytes::Bytes;
//! use emberkv::{db::Engine, option::Options};
//!
//! let mut opts = Options::default();
//! opts.dir_path = std::env::temp_dir().join("emberkv-doc");
//! let engine = Engine::open(opts).expect("failed to open emberkv engine");
//!
//! let key = Bytes::from(b"hello".to_vec());
//! let value = Bytes::from(b"world".to_vec());
//! engine.put(key.clone(), value.clone()).expect("failed to put");
//!
//! let retrieved = engine.get(key.clone()).expect("failed to get");
//! assert_eq!(retrieved, value);
//!
//! engine.delete(key).expect("failed to delete");
//! ```

mod data;

mod fio;
mod index;
mod iterator;

pub mod batch;
pub mod db;
pub mod errors;
pub mod merge;
pub mod option;
pub mod util;
