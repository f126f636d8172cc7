//! Instance metadata: clean-shutdown marker and index definitions.
//!
//! The marker read at startup says whether the previous session shut down
//! cleanly. Opening an instance clears the persisted marker; closing it
//! cleanly sets it again. The value observed at startup stays what
//! [`MetadataStore::is_last_shutdown_clean`] reports for the whole session.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexDefinition;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable metadata consulted when bags and indexes are opened.
pub trait MetadataStore: Send + Sync {
    /// Whether the session before this one ended with a clean shutdown.
    fn is_last_shutdown_clean(&self) -> bool;

    /// Persists the shutdown marker.
    fn mark_shutdown(&self, clean: bool) -> CoreResult<()>;

    /// Whether exactly this definition is persisted for `bag`.
    fn contains_index(&self, instance: &str, bag: &str, definition: &IndexDefinition) -> bool;

    /// Persists a definition, replacing one with the same name.
    fn add_index(&self, instance: &str, bag: &str, definition: IndexDefinition) -> CoreResult<()>;

    /// Drops the definition named `name`.
    fn remove_index(&self, instance: &str, bag: &str, name: &str) -> CoreResult<()>;

    /// Every definition persisted for `bag`, ordered by name.
    fn indexes(&self, instance: &str, bag: &str) -> Vec<IndexDefinition>;
}

/// Serialized metadata contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Manifest {
    clean_shutdown: bool,
    /// instance -> bag -> index name -> definition
    #[serde(default)]
    instances: BTreeMap<String, BTreeMap<String, BTreeMap<String, IndexDefinition>>>,
}

impl Manifest {
    fn bag(&self, instance: &str, bag: &str) -> Option<&BTreeMap<String, IndexDefinition>> {
        self.instances.get(instance)?.get(bag)
    }

    fn add(&mut self, instance: &str, bag: &str, definition: IndexDefinition) {
        self.instances
            .entry(instance.to_string())
            .or_default()
            .entry(bag.to_string())
            .or_default()
            .insert(definition.name.clone(), definition);
    }

    fn remove(&mut self, instance: &str, bag: &str, name: &str) {
        let Some(bags) = self.instances.get_mut(instance) else {
            return;
        };
        if let Some(indexes) = bags.get_mut(bag) {
            indexes.remove(name);
            if indexes.is_empty() {
                bags.remove(bag);
            }
        }
        if bags.is_empty() {
            self.instances.remove(instance);
        }
    }
}

/// Metadata kept in memory, for tests and ephemeral instances.
#[derive(Debug)]
pub struct InMemoryMetadataStore {
    last_shutdown_clean: bool,
    manifest: RwLock<Manifest>,
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetadataStore {
    /// A fresh store whose previous session counts as clean.
    #[must_use]
    pub fn new() -> Self {
        Self::with_last_shutdown(true)
    }

    /// A fresh store reporting `clean` for the previous session.
    #[must_use]
    pub fn with_last_shutdown(clean: bool) -> Self {
        Self {
            last_shutdown_clean: clean,
            manifest: RwLock::new(Manifest::default()),
        }
    }

    /// The store a new session would see: same definitions, and the marker
    /// last written by this session.
    #[must_use]
    pub fn restart(&self) -> Self {
        let manifest = self.manifest.read().clone();
        Self {
            last_shutdown_clean: manifest.clean_shutdown,
            manifest: RwLock::new(manifest),
        }
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn is_last_shutdown_clean(&self) -> bool {
        self.last_shutdown_clean
    }

    fn mark_shutdown(&self, clean: bool) -> CoreResult<()> {
        self.manifest.write().clean_shutdown = clean;
        Ok(())
    }

    fn contains_index(&self, instance: &str, bag: &str, definition: &IndexDefinition) -> bool {
        self.manifest
            .read()
            .bag(instance, bag)
            .and_then(|indexes| indexes.get(&definition.name))
            .is_some_and(|stored| stored == definition)
    }

    fn add_index(&self, instance: &str, bag: &str, definition: IndexDefinition) -> CoreResult<()> {
        self.manifest.write().add(instance, bag, definition);
        Ok(())
    }

    fn remove_index(&self, instance: &str, bag: &str, name: &str) -> CoreResult<()> {
        self.manifest.write().remove(instance, bag, name);
        Ok(())
    }

    fn indexes(&self, instance: &str, bag: &str) -> Vec<IndexDefinition> {
        self.manifest
            .read()
            .bag(instance, bag)
            .map(|indexes| indexes.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Metadata persisted as a JSON `MANIFEST` file.
///
/// Every change rewrites the file through a temporary file and a rename, so
/// a crash leaves either the old or the new manifest.
#[derive(Debug)]
pub struct ManifestMetadataStore {
    path: PathBuf,
    last_shutdown_clean: bool,
    manifest: RwLock<Manifest>,
}

impl ManifestMetadataStore {
    /// Loads the manifest at `path`.
    ///
    /// A missing manifest is a new instance, which counts as cleanly shut down.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let manifest = match fs::read(&path) {
            Ok(data) if data.is_empty() => Manifest {
                clean_shutdown: true,
                ..Manifest::default()
            },
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                CoreError::configuration(format!("unreadable manifest {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest {
                clean_shutdown: true,
                ..Manifest::default()
            },
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), clean = manifest.clean_shutdown, "loaded manifest");

        Ok(Self {
            path,
            last_shutdown_clean: manifest.clean_shutdown,
            manifest: RwLock::new(manifest),
        })
    }

    /// Path of the manifest file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, change: impl FnOnce(&mut Manifest)) -> CoreResult<()> {
        let mut manifest = self.manifest.write();
        let mut next = manifest.clone();
        change(&mut next);
        self.save(&next)?;
        *manifest = next;
        Ok(())
    }

    fn save(&self, manifest: &Manifest) -> CoreResult<()> {
        let data = serde_json::to_vec_pretty(manifest)
            .map_err(|e| CoreError::codec(format!("cannot encode manifest: {e}")))?;
        let temp_path = self.path.with_extension("tmp");

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        sync_parent(&self.path)
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> CoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> CoreResult<()> {
    Ok(())
}

impl MetadataStore for ManifestMetadataStore {
    fn is_last_shutdown_clean(&self) -> bool {
        self.last_shutdown_clean
    }

    fn mark_shutdown(&self, clean: bool) -> CoreResult<()> {
        self.update(|m| m.clean_shutdown = clean)
    }

    fn contains_index(&self, instance: &str, bag: &str, definition: &IndexDefinition) -> bool {
        self.manifest
            .read()
            .bag(instance, bag)
            .and_then(|indexes| indexes.get(&definition.name))
            .is_some_and(|stored| stored == definition)
    }

    fn add_index(&self, instance: &str, bag: &str, definition: IndexDefinition) -> CoreResult<()> {
        self.update(|m| m.add(instance, bag, definition))
    }

    fn remove_index(&self, instance: &str, bag: &str, name: &str) -> CoreResult<()> {
        self.update(|m| m.remove(instance, bag, name))
    }

    fn indexes(&self, instance: &str, bag: &str) -> Vec<IndexDefinition> {
        self.manifest
            .read()
            .bag(instance, bag)
            .map(|indexes| indexes.values().cloned().collect())
            .unwrap_or_default()
    }
}
