//! Append-only record log.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::record::frame::{read_frame, Frame, FrameRead};
use crate::record::{KeyExtractor, Record, RecordScan, RecordStore};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Where the latest frame of a record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    offset: u64,
    len: u64,
}

/// A [`RecordStore`] that appends every write as a checksummed frame.
///
/// Updates and removals append new frames; the primary map points at the
/// latest put frame of each key. Opening replays the log to rebuild the map
/// and cuts off a torn tail left by a crash mid-append.
pub struct LogRecordStore {
    backend: Mutex<Option<Box<dyn StorageBackend>>>,
    primary: RwLock<HashMap<String, Location>>,
}

impl LogRecordStore {
    /// Opens a record log over `backend`, replaying existing frames.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> StorageResult<Self> {
        let (primary, valid_end) = replay(backend.as_ref(), &|frame: &Frame, _| {
            Ok(frame.key.clone())
        })?;

        let size = backend.size()?;
        if valid_end < size {
            warn!(
                valid_end,
                size, "record log ends with a torn frame, truncating"
            );
            backend.truncate(valid_end)?;
            backend.sync()?;
        }
        debug!(records = primary.len(), "opened record log");

        Ok(Self {
            backend: Mutex::new(Some(backend)),
            primary: RwLock::new(primary),
        })
    }

    fn with_backend<T>(
        &self,
        f: impl FnOnce(&mut dyn StorageBackend) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut guard = self.backend.lock();
        match guard.as_mut() {
            Some(backend) => f(backend.as_mut()),
            None => Err(StorageError::Closed),
        }
    }

    fn read_location(&self, location: Location) -> StorageResult<Vec<u8>> {
        let bytes = self.with_backend(|b| b.read_at(location.offset, location.len as usize))?;
        Ok(Frame::decode(&bytes)?.payload)
    }

    /// Appends `frame` and updates the primary map while the backend is
    /// still held, so concurrent writers to one key apply in log order.
    fn append(
        &self,
        frame: &Frame,
        check: impl FnOnce(bool) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let encoded = frame.encode()?;
        let mut guard = self.backend.lock();
        let backend = guard.as_mut().ok_or(StorageError::Closed)?;

        let mut primary = self.primary.write();
        check(primary.contains_key(&frame.key))?;
        let offset = backend.append(&encoded)?;
        if frame.tombstone {
            primary.remove(&frame.key);
        } else {
            primary.insert(
                frame.key.clone(),
                Location {
                    offset,
                    len: encoded.len() as u64,
                },
            );
        }
        Ok(())
    }
}

/// Replays every frame, keying put frames by whatever `key_of` returns.
fn replay(
    backend: &dyn StorageBackend,
    key_of: &dyn Fn(&Frame, u64) -> StorageResult<String>,
) -> StorageResult<(HashMap<String, Location>, u64)> {
    let mut primary = HashMap::new();
    let mut offset = 0u64;

    loop {
        match read_frame(backend, offset)? {
            FrameRead::Frame(frame, len) => {
                if frame.tombstone {
                    primary.remove(&frame.key);
                } else {
                    let key = key_of(&frame, offset)?;
                    primary.insert(key, Location { offset, len });
                }
                offset += len;
            }
            FrameRead::TornTail => return Ok((primary, offset)),
        }
    }
}

impl RecordStore for LogRecordStore {
    fn is_open(&self) -> bool {
        self.backend.lock().is_some()
    }

    fn read_record(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let location = self.primary.read().get(key).copied();
        match location {
            Some(location) => self.read_location(location).map(Some),
            None => {
                if self.is_open() {
                    Ok(None)
                } else {
                    Err(StorageError::Closed)
                }
            }
        }
    }

    fn insert_record(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.append(&Frame::put(key, data), |exists| {
            if exists {
                Err(StorageError::RecordExists {
                    key: key.to_string(),
                })
            } else {
                Ok(())
            }
        })
    }

    fn update_record(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.append(&Frame::put(key, data), |exists| {
            if exists {
                Ok(())
            } else {
                Err(StorageError::RecordNotFound {
                    key: key.to_string(),
                })
            }
        })
    }

    fn remove_record(&self, key: &str) -> StorageResult<bool> {
        let mut removed = false;
        let result = self.append(&Frame::tombstone(key), |exists| {
            removed = exists;
            if exists {
                Ok(())
            } else {
                Err(StorageError::RecordNotFound {
                    key: key.to_string(),
                })
            }
        });
        match result {
            Ok(()) => Ok(removed),
            Err(StorageError::RecordNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_all_records(&self) -> StorageResult<RecordScan> {
        let mut locations: Vec<(String, Location)> = self
            .primary
            .read()
            .iter()
            .map(|(k, l)| (k.clone(), *l))
            .collect();
        locations.sort_by_key(|(_, l)| l.offset);

        let mut records = Vec::with_capacity(locations.len());
        for (key, location) in locations {
            records.push(Record {
                key,
                data: self.read_location(location)?,
            });
        }
        Ok(RecordScan::new(records))
    }

    fn verify(&self, extract_key: &KeyExtractor<'_>) -> StorageResult<u64> {
        let guard = self.backend.lock();
        let backend = guard.as_ref().ok_or(StorageError::Closed)?;

        let (rebuilt, _) = replay(backend.as_ref(), &|frame: &Frame, offset| {
            let key = extract_key(&frame.payload).map_err(|e| StorageError::KeyExtraction {
                offset,
                message: e.to_string(),
            })?;
            if key != frame.key {
                warn!(
                    frame_key = %frame.key,
                    extracted = %key,
                    offset,
                    "record stored under a stale key, repairing"
                );
            }
            Ok(key)
        })?;

        let live = rebuilt.len() as u64;
        *self.primary.write() = rebuilt;
        debug!(live, "verified primary key structure");
        Ok(live)
    }

    fn size(&self) -> StorageResult<u64> {
        if !self.is_open() {
            return Err(StorageError::Closed);
        }
        Ok(self.primary.read().len() as u64)
    }

    fn disk_size(&self) -> StorageResult<u64> {
        self.with_backend(|b| b.size())
    }

    fn flush(&self) -> StorageResult<()> {
        self.with_backend(|b| {
            b.flush()?;
            b.sync()
        })
    }

    fn close(&self) -> StorageResult<()> {
        if let Some(mut backend) = self.backend.lock().take() {
            backend.flush()?;
            backend.sync()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LogRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Writers take the backend before the primary map; never hold both here.
        let records = self.primary.read().len();
        let open = self.is_open();
        f.debug_struct("LogRecordStore")
            .field("records", &records)
            .field("open", &open)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    fn open(backend: &InMemoryBackend) -> LogRecordStore {
        LogRecordStore::open(Box::new(backend.clone())).unwrap()
    }

    #[test]
    fn insert_read_update_remove() {
        let store = open(&InMemoryBackend::new());

        store.insert_record("e1", b"v1").unwrap();
        assert_eq!(store.read_record("e1").unwrap().unwrap(), b"v1");

        store.update_record("e1", b"v2").unwrap();
        assert_eq!(store.read_record("e1").unwrap().unwrap(), b"v2");
        assert_eq!(store.size().unwrap(), 1);

        assert!(store.remove_record("e1").unwrap());
        assert!(store.read_record("e1").unwrap().is_none());
        assert!(!store.remove_record("e1").unwrap());
    }

    #[test]
    fn insert_existing_and_update_missing_fail() {
        let store = open(&InMemoryBackend::new());
        store.insert_record("e1", b"v1").unwrap();

        assert!(matches!(
            store.insert_record("e1", b"again"),
            Err(StorageError::RecordExists { .. })
        ));
        assert!(matches!(
            store.update_record("e2", b"nope"),
            Err(StorageError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn reopen_replays_latest_versions() {
        let backend = InMemoryBackend::new();
        {
            let store = open(&backend);
            store.insert_record("a", b"1").unwrap();
            store.insert_record("b", b"2").unwrap();
            store.update_record("a", b"3").unwrap();
            store.remove_record("b").unwrap();
        }

        let store = open(&backend);
        let records: Vec<Record> = store.read_all_records().unwrap().collect();
        assert_eq!(
            records,
            vec![Record {
                key: "a".into(),
                data: b"3".to_vec()
            }]
        );
        assert!(store.disk_size().unwrap() > 0);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let backend = InMemoryBackend::new();
        {
            let store = open(&backend);
            store.insert_record("a", b"1").unwrap();
        }
        let intact = backend.size().unwrap();
        let mut raw = backend.clone();
        let torn = Frame::put("b", b"2").encode().unwrap();
        raw.append(&torn[..torn.len() / 2]).unwrap();

        let store = open(&backend);
        assert_eq!(store.size().unwrap(), 1);
        assert_eq!(backend.size().unwrap(), intact);
    }

    #[test]
    fn verify_rekeys_by_extracted_id() {
        let store = open(&InMemoryBackend::new());
        store.insert_record("stale", b"fresh").unwrap();

        let live = store
            .verify(&|payload: &[u8]| Ok(String::from_utf8_lossy(payload).into_owned()))
            .unwrap();
        assert_eq!(live, 1);
        assert!(store.read_record("stale").unwrap().is_none());
        assert_eq!(store.read_record("fresh").unwrap().unwrap(), b"fresh");
    }

    #[test]
    fn verify_aborts_on_first_extraction_failure() {
        let store = open(&InMemoryBackend::new());
        store.insert_record("a", b"ok").unwrap();
        store.insert_record("b", b"bad").unwrap();

        let result = store.verify(&|payload: &[u8]| {
            if payload == b"bad" {
                Err(StorageError::corrupted("unparseable"))
            } else {
                Ok(String::from_utf8_lossy(payload).into_owned())
            }
        });
        assert!(matches!(result, Err(StorageError::KeyExtraction { .. })));
        assert_eq!(store.size().unwrap(), 2);
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = open(&InMemoryBackend::new());
        store.close().unwrap();
        assert!(!store.is_open());
        assert!(matches!(
            store.insert_record("a", b"1"),
            Err(StorageError::Closed)
        ));
        assert!(matches!(store.read_record("a"), Err(StorageError::Closed)));
    }

    #[test]
    fn debug_alongside_writers() {
        let store = std::sync::Arc::new(open(&InMemoryBackend::new()));
        let writer = {
            let store = std::sync::Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500 {
                    store.insert_record(&format!("k{i}"), b"v").unwrap();
                }
            })
        };
        for _ in 0..500 {
            assert!(format!("{store:?}").contains("open: true"));
        }
        writer.join().unwrap();
        assert!(format!("{store:?}").contains("records: 500"));
    }
}
