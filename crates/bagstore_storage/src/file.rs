//! File backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Appends are buffered up to this many bytes before reaching the OS.
const WRITE_BUFFER: usize = 64 * 1024;

/// Append side of the file and how much of it the OS has seen.
#[derive(Debug)]
struct Writer {
    file: BufWriter<File>,
    flushed: u64,
}

impl Writer {
    fn drain(&mut self, len: u64) -> StorageResult<()> {
        self.file.flush()?;
        self.flushed = len;
        Ok(())
    }
}

/// A backend stored in a single append-mode file.
///
/// Frames are buffered in memory and handed to the OS on `flush`, on
/// `sync`, or when a read reaches into bytes still buffered. The file and
/// its parent directories are created on open, so a bag's record log
/// appears the first time the bag is loaded.
///
/// ```no_run
/// use bagstore_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("bags/orders.records")).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    writer: Mutex<Writer>,
    reader: Mutex<File>,
    len: u64,
}

impl FileBackend {
    /// Opens the file at `path`, creating it and missing parent directories.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let append = OpenOptions::new().create(true).append(true).open(path)?;
        let reader = File::open(path)?;
        let len = append.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Writer {
                file: BufWriter::with_capacity(WRITE_BUFFER, append),
                flushed: len,
            }),
            reader: Mutex::new(reader),
            len,
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if end > self.len {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        {
            let mut writer = self.writer.lock();
            if end > writer.flushed {
                writer.drain(self.len)?;
            }
        }

        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        reader.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.len;
        if !data.is_empty() {
            self.writer.get_mut().file.write_all(data)?;
            self.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let len = self.len;
        self.writer.get_mut().drain(len)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let len = self.len;
        let writer = self.writer.get_mut();
        writer.drain(len)?;
        writer.file.get_ref().sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.len {
            return Err(StorageError::invalid_input(format!(
                "cannot truncate {} to {new_size} bytes, it holds {}",
                self.path.display(),
                self.len
            )));
        }
        let len = self.len;
        let writer = self.writer.get_mut();
        writer.drain(len)?;
        writer.file.get_ref().set_len(new_size)?;
        writer.file.get_ref().sync_all()?;
        writer.flushed = new_size;
        self.len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reopen_sees_synced_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orders.records");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"frame-1").unwrap();
            backend.append(b"frame-2").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 14);
        assert_eq!(backend.read_at(7, 7).unwrap(), b"frame-2");
    }

    #[test]
    fn buffered_appends_are_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.records");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"head").unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        assert_eq!(backend.read_at(0, 4).unwrap(), b"head");
        assert_eq!(fs::metadata(&path).unwrap().len(), 4);
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("a.bin")).unwrap();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.read_at(1, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn truncate_cuts_buffered_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"good-torn").unwrap();
        backend.truncate(4).unwrap();
        assert_eq!(backend.append(b"!").unwrap(), 4);
        assert_eq!(backend.read_at(0, 5).unwrap(), b"good!");
        assert!(backend.truncate(9).is_err());

        backend.sync().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"good!");
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instance").join("bags").join("a.records");
        FileBackend::open(&path).unwrap();
        assert!(path.exists());
    }
}
