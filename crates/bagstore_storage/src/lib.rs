//! # BagStore Storage
//!
//! Byte backends and the durable record store for BagStore.
//!
//! Backends are **opaque byte stores**: they read, append, flush and
//! truncate bytes without interpreting them. The record store layers a
//! checksummed append-only log on top of a backend and keeps one payload per
//! primary key. Neither layer knows about entities or index keys.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral bags
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use bagstore_storage::{InMemoryBackend, LogRecordStore, RecordStore};
//!
//! let store = LogRecordStore::open(Box::new(InMemoryBackend::new())).unwrap();
//! store.insert_record("e1", b"hello world").unwrap();
//! assert_eq!(store.read_record("e1").unwrap().unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod record;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use record::{
    crc32, FileRecordStoreFactory, InMemoryRecordStoreFactory, KeyExtractor, LogRecordStore, Record,
    RecordScan, RecordStore, RecordStoreFactory,
};
