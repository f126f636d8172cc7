//! Record store factories.

use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use crate::record::{LogRecordStore, RecordStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

type StoreKey = (String, String);

/// Hands out the record store of a bag.
///
/// A factory is shared by every bag of the process. Loading the same
/// `(instance, bag)` twice returns the same store as long as it is open.
pub trait RecordStoreFactory: Send + Sync {
    /// Returns the open record store for `bag`, creating it when missing.
    fn load(&self, instance: &str, bag: &str) -> StorageResult<Arc<dyn RecordStore>>;

    /// Closes the store of `bag` and deletes its contents.
    fn remove(&self, instance: &str, bag: &str) -> StorageResult<()>;
}

fn cached(
    stores: &HashMap<StoreKey, Arc<LogRecordStore>>,
    key: &StoreKey,
) -> Option<Arc<dyn RecordStore>> {
    stores
        .get(key)
        .filter(|store| store.is_open())
        .map(|store| Arc::clone(store) as Arc<dyn RecordStore>)
}

/// Factory keeping every record log in memory.
///
/// The bytes of a bag outlive its store object: [`evict`](Self::evict)
/// drops the store without touching the bytes, so the next `load` replays
/// the log the way a process restart would.
#[derive(Debug, Default)]
pub struct InMemoryRecordStoreFactory {
    backends: Mutex<HashMap<StoreKey, InMemoryBackend>>,
    stores: Mutex<HashMap<StoreKey, Arc<LogRecordStore>>>,
}

impl InMemoryRecordStoreFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the loaded store of `bag` while keeping its bytes.
    pub fn evict(&self, instance: &str, bag: &str) {
        self.stores
            .lock()
            .remove(&(instance.to_string(), bag.to_string()));
    }

    /// Returns a handle on the raw bytes of `bag`, if it was ever loaded.
    #[must_use]
    pub fn backend(&self, instance: &str, bag: &str) -> Option<InMemoryBackend> {
        self.backends
            .lock()
            .get(&(instance.to_string(), bag.to_string()))
            .cloned()
    }
}

impl RecordStoreFactory for InMemoryRecordStoreFactory {
    fn load(&self, instance: &str, bag: &str) -> StorageResult<Arc<dyn RecordStore>> {
        let key = (instance.to_string(), bag.to_string());
        let mut stores = self.stores.lock();
        if let Some(store) = cached(&stores, &key) {
            return Ok(store);
        }

        let backend = self
            .backends
            .lock()
            .entry(key.clone())
            .or_default()
            .clone();
        let store = Arc::new(LogRecordStore::open(Box::new(backend))?);
        stores.insert(key, Arc::clone(&store));
        Ok(store)
    }

    fn remove(&self, instance: &str, bag: &str) -> StorageResult<()> {
        let key = (instance.to_string(), bag.to_string());
        if let Some(store) = self.stores.lock().remove(&key) {
            store.close()?;
        }
        self.backends.lock().remove(&key);
        Ok(())
    }
}

/// Factory storing each bag's record log as `<dir>/<bag>.records`.
///
/// One factory serves one instance directory.
#[derive(Debug)]
pub struct FileRecordStoreFactory {
    dir: PathBuf,
    stores: Mutex<HashMap<StoreKey, Arc<LogRecordStore>>>,
}

impl FileRecordStoreFactory {
    /// Creates a factory rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the record log of `bag`.
    #[must_use]
    pub fn path_for(&self, bag: &str) -> PathBuf {
        self.dir.join(format!("{bag}.records"))
    }

    /// Directory holding the record logs.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecordStoreFactory for FileRecordStoreFactory {
    fn load(&self, instance: &str, bag: &str) -> StorageResult<Arc<dyn RecordStore>> {
        let key = (instance.to_string(), bag.to_string());
        let mut stores = self.stores.lock();
        if let Some(store) = cached(&stores, &key) {
            return Ok(store);
        }

        let path = self.path_for(bag);
        debug!(path = %path.display(), "opening record log");
        let backend = FileBackend::open(&path)?;
        let store = Arc::new(LogRecordStore::open(Box::new(backend))?);
        stores.insert(key, Arc::clone(&store));
        Ok(store)
    }

    fn remove(&self, instance: &str, bag: &str) -> StorageResult<()> {
        let key = (instance.to_string(), bag.to_string());
        if let Some(store) = self.stores.lock().remove(&key) {
            store.close()?;
        }
        match std::fs::remove_file(self.path_for(bag)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
