//! Byte backend trait.

use crate::error::StorageResult;

/// An append-only byte container underneath a record log or index snapshot.
///
/// Backends never interpret what they hold. Frames, checksums and record
/// keys belong to the layers above.
///
/// # Invariants
///
/// - `append` returns the offset the data starts at, which is the size
///   before the call
/// - `read_at` returns exactly the bytes previously appended there
/// - after `sync` returns, everything appended so far survives a crash
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// when the range is not fully inside the backend.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the number of bytes held.
    fn size(&self) -> StorageResult<u64>;

    /// Makes all data and metadata durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops every byte at or after `new_size`.
    ///
    /// Used to cut a torn tail after a crash and to rewrite snapshots.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
