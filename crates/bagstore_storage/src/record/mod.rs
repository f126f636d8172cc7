//! Durable record stores.
//!
//! A record store keeps one byte payload per primary key. It is the only
//! source of truth for a bag: every secondary index can be thrown away and
//! rebuilt from [`RecordStore::read_all_records`].

mod factory;
mod frame;
mod log;

pub use factory::{FileRecordStoreFactory, InMemoryRecordStoreFactory, RecordStoreFactory};
pub use frame::crc32;
pub use log::LogRecordStore;

use crate::error::StorageResult;

/// A live record: primary key plus stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Primary key.
    pub key: String,
    /// Stored payload.
    pub data: Vec<u8>,
}

/// One pass over every live record of a store.
///
/// Not restartable; ask the store for a new scan instead.
#[derive(Debug)]
pub struct RecordScan {
    records: std::vec::IntoIter<Record>,
}

impl RecordScan {
    pub(crate) fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl Iterator for RecordScan {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.records.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for RecordScan {}

/// Callback used by [`RecordStore::verify`] to pull the primary key out of a
/// stored payload.
pub type KeyExtractor<'a> = dyn Fn(&[u8]) -> StorageResult<String> + 'a;

/// Keyed, durable storage of record payloads.
///
/// Implementations are shared between all callers of a bag and must be
/// safe to use from several threads. Per-record write atomicity is the
/// implementation's job; coordination between records is not.
pub trait RecordStore: Send + Sync {
    /// Returns whether the store accepts operations.
    fn is_open(&self) -> bool;

    /// Reads the live record stored under `key`.
    fn read_record(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::RecordExists`](crate::StorageError::RecordExists)
    /// when `key` is already live.
    fn insert_record(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Replaces an existing record.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::RecordNotFound`](crate::StorageError::RecordNotFound)
    /// when `key` is not live.
    fn update_record(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes a record, returning whether it was live.
    fn remove_record(&self, key: &str) -> StorageResult<bool>;

    /// Returns every live record in physical order.
    fn read_all_records(&self) -> StorageResult<RecordScan>;

    /// Re-reads every physical record and rebuilds the primary key structure
    /// from the keys `extract_key` reports.
    ///
    /// The first extraction failure aborts verification and leaves the
    /// existing key structure untouched. Returns the number of live records.
    fn verify(&self, extract_key: &KeyExtractor<'_>) -> StorageResult<u64>;

    /// Number of live records.
    fn size(&self) -> StorageResult<u64>;

    /// Bytes occupied on the backend, superseded versions included.
    fn disk_size(&self) -> StorageResult<u64>;

    /// Makes every write so far durable.
    fn flush(&self) -> StorageResult<()>;

    /// Closes the store; later operations fail with `Closed`.
    fn close(&self) -> StorageResult<()>;
}
