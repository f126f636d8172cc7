//! Index lifecycle per bag.

use crate::error::{CoreError, CoreResult};
use crate::index::persistence::{load_index, persist_index};
use crate::index::{Index, IndexDefinition};
use crate::key::{KeyField, KeyInfo};
use crate::metadata::MetadataStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the indexes of every bag of an instance.
///
/// Shared across the process; it outlives any single bag.
pub trait IndexManager: Send + Sync {
    /// Indexes declared on `bag`, by name.
    fn get_indexes(&self, bag: &str) -> CoreResult<HashMap<String, Arc<Index>>>;

    /// Declares an index and persists its definition.
    ///
    /// Declaring an index that already exists with the same schema returns
    /// the existing one.
    fn create_index(
        &self,
        bag: &str,
        key_fields: &[KeyField],
        unique: bool,
        value_fields: &[KeyField],
    ) -> CoreResult<Arc<Index>>;

    /// Drops an index: its definition, its structure and its snapshot.
    fn remove_index(&self, bag: &str, name: &str) -> CoreResult<()>;

    /// Makes the current contents of every index of `bag` durable.
    fn flush(&self, bag: &str) -> CoreResult<()>;
}

/// [`IndexManager`] keeping indexes in memory, with optional snapshots.
///
/// Definitions come from the [`MetadataStore`]. When a snapshot directory is
/// configured, `flush` writes `<dir>/<bag>/<index>.idx` and a later session
/// loads it back if the previous shutdown was clean. Indexes that could not
/// be loaded stay stale until rebuilt.
pub struct DefaultIndexManager {
    instance_id: String,
    metadata: Arc<dyn MetadataStore>,
    snapshot_dir: Option<PathBuf>,
    bags: RwLock<HashMap<String, HashMap<String, Arc<Index>>>>,
}

impl DefaultIndexManager {
    /// Creates a manager without snapshots.
    pub fn new(instance_id: impl Into<String>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            instance_id: instance_id.into(),
            metadata,
            snapshot_dir: None,
            bags: RwLock::new(HashMap::new()),
        }
    }

    /// Enables snapshots under `dir`.
    #[must_use]
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    fn snapshot_path(&self, bag: &str, name: &str) -> Option<PathBuf> {
        self.snapshot_dir
            .as_ref()
            .map(|dir| dir.join(bag).join(format!("{name}.idx")))
    }

    /// Recreates the indexes of `bag` from persisted definitions.
    fn load_bag(&self, bag: &str) -> CoreResult<HashMap<String, Arc<Index>>> {
        let clean = self.metadata.is_last_shutdown_clean();
        let mut indexes = HashMap::new();

        for definition in self.metadata.indexes(&self.instance_id, bag) {
            let index = Index::from_definition(&definition)?;
            if clean {
                self.load_snapshot(bag, &index);
            }
            indexes.insert(definition.name.clone(), Arc::new(index));
        }
        debug!(bag, indexes = indexes.len(), "loaded index definitions");
        Ok(indexes)
    }

    fn load_snapshot(&self, bag: &str, index: &Index) {
        let Some(path) = self.snapshot_path(bag, index.name()) else {
            return;
        };
        let result = fs::read(&path)
            .map_err(CoreError::from)
            .and_then(|data| load_index(index, &data));
        match result {
            Ok(entries) => debug!(bag, index = index.name(), entries, "loaded index snapshot"),
            Err(e) => warn!(
                bag,
                index = index.name(),
                error = %e,
                "index snapshot unusable, index will be rebuilt"
            ),
        }
    }

    fn write_snapshot(&self, bag: &str, index: &Index) -> CoreResult<()> {
        let Some(path) = self.snapshot_path(bag, index.name()) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = persist_index(index)?;
        let temp_path = path.with_extension("idx.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn with_bag<T>(
        &self,
        bag: &str,
        f: impl FnOnce(&mut HashMap<String, Arc<Index>>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut bags = self.bags.write();
        if !bags.contains_key(bag) {
            let loaded = self.load_bag(bag)?;
            bags.insert(bag.to_string(), loaded);
        }
        match bags.get_mut(bag) {
            Some(indexes) => f(indexes),
            None => Err(CoreError::invalid_operation(format!(
                "indexes of bag {bag} not loaded"
            ))),
        }
    }
}

impl std::fmt::Debug for DefaultIndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultIndexManager")
            .field("instance_id", &self.instance_id)
            .field("snapshot_dir", &self.snapshot_dir)
            .finish_non_exhaustive()
    }
}

impl IndexManager for DefaultIndexManager {
    fn get_indexes(&self, bag: &str) -> CoreResult<HashMap<String, Arc<Index>>> {
        if let Some(indexes) = self.bags.read().get(bag) {
            return Ok(indexes.clone());
        }
        self.with_bag(bag, |indexes| Ok(indexes.clone()))
    }

    fn create_index(
        &self,
        bag: &str,
        key_fields: &[KeyField],
        unique: bool,
        value_fields: &[KeyField],
    ) -> CoreResult<Arc<Index>> {
        let key_info = KeyInfo::new(key_fields, value_fields)?;
        let name = key_info.key_name();
        let definition = IndexDefinition::new(name.clone(), &key_info, unique);

        self.with_bag(bag, |indexes| {
            if let Some(existing) = indexes.get(&name) {
                if existing.definition() == definition {
                    return Ok(Arc::clone(existing));
                }
                return Err(CoreError::invalid_operation(format!(
                    "index {name} already exists on bag {bag} with a different schema"
                )));
            }

            self.metadata
                .add_index(&self.instance_id, bag, definition.clone())?;
            let index = Arc::new(Index::new(name.clone(), key_info, unique));
            indexes.insert(name.clone(), Arc::clone(&index));
            info!(
                bag,
                index = %name,
                key = %definition.key_header,
                value = %definition.value_header,
                unique,
                "created index"
            );
            Ok(index)
        })
    }

    fn remove_index(&self, bag: &str, name: &str) -> CoreResult<()> {
        self.with_bag(bag, |indexes| {
            if indexes.remove(name).is_none() {
                return Err(CoreError::IndexNotFound {
                    name: name.to_string(),
                });
            }
            self.metadata.remove_index(&self.instance_id, bag, name)?;
            if let Some(path) = self.snapshot_path(bag, name) {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            info!(bag, index = name, "removed index");
            Ok(())
        })
    }

    fn flush(&self, bag: &str) -> CoreResult<()> {
        let indexes = self.get_indexes(bag)?;
        for index in indexes.values() {
            if index.is_stale() {
                continue;
            }
            self.write_snapshot(bag, index)?;
        }
        debug!(bag, indexes = indexes.len(), "flushed indexes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EntityId};
    use crate::metadata::InMemoryMetadataStore;
    use tempfile::tempdir;

    fn manager(metadata: Arc<InMemoryMetadataStore>) -> DefaultIndexManager {
        DefaultIndexManager::new("i", metadata)
    }

    #[test]
    fn create_persists_definition() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let manager = manager(Arc::clone(&metadata));

        let index = manager
            .create_index("people", &[KeyField::long("age")], false, &[])
            .unwrap();
        assert_eq!(index.name(), "age");
        assert!(metadata.contains_index("i", "people", &index.definition()));
        assert_eq!(manager.get_indexes("people").unwrap().len(), 1);
        assert!(manager.get_indexes("other").unwrap().is_empty());
    }

    #[test]
    fn create_twice_returns_existing() {
        let manager = manager(Arc::new(InMemoryMetadataStore::new()));
        let a = manager
            .create_index("people", &[KeyField::long("age")], false, &[])
            .unwrap();
        let b = manager
            .create_index("people", &[KeyField::long("age")], false, &[])
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(manager
            .create_index("people", &[KeyField::long("age")], true, &[])
            .is_err());
    }

    #[test]
    fn remove_drops_definition() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let manager = manager(Arc::clone(&metadata));
        manager
            .create_index("people", &[KeyField::long("age")], false, &[])
            .unwrap();

        manager.remove_index("people", "age").unwrap();
        assert!(metadata.indexes("i", "people").is_empty());
        assert!(matches!(
            manager.remove_index("people", "age"),
            Err(CoreError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn reload_without_snapshot_is_stale() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        manager(Arc::clone(&metadata))
            .create_index("people", &[KeyField::long("age")], false, &[])
            .unwrap();

        let reloaded = manager(Arc::new(metadata.restart()));
        let indexes = reloaded.get_indexes("people").unwrap();
        assert!(indexes["age"].is_stale());
    }

    #[test]
    fn snapshot_survives_clean_restart() {
        let dir = tempdir().unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let first = manager(Arc::clone(&metadata)).with_snapshot_dir(dir.path());
        let index = first
            .create_index("people", &[KeyField::long("age")], false, &[])
            .unwrap();
        index
            .rebuild(
                vec![Ok(Entity::with_id(EntityId::new("e1").unwrap()).with("age", 30))],
                true,
            )
            .unwrap();
        first.flush("people").unwrap();
        assert!(dir.path().join("people").join("age.idx").exists());
        metadata.mark_shutdown(true).unwrap();

        let second =
            manager(Arc::new(metadata.restart())).with_snapshot_dir(dir.path());
        let indexes = second.get_indexes("people").unwrap();
        assert!(!indexes["age"].is_stale());
        assert_eq!(indexes["age"].entries(), index.entries());
    }

    #[test]
    fn snapshot_ignored_after_unclean_shutdown() {
        let dir = tempdir().unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let first = manager(Arc::clone(&metadata)).with_snapshot_dir(dir.path());
        first
            .create_index("people", &[KeyField::long("age")], false, &[])
            .unwrap();
        first.flush("people").unwrap();
        metadata.mark_shutdown(false).unwrap();

        let second =
            manager(Arc::new(metadata.restart())).with_snapshot_dir(dir.path());
        assert!(second.get_indexes("people").unwrap()["age"].is_stale());
    }
}
