//! On-disk instances.
//!
//! An [`Instance`] wires the file-backed collaborators of every bag in one
//! directory: the `MANIFEST` metadata store, one record log per bag and the
//! index snapshots. Opening an instance clears the clean-shutdown marker;
//! only [`Instance::close`] sets it again, so a crash in between makes the
//! next open rebuild every index. After an unclean start the marker is only
//! set again once every bag has been opened, and therefore recovered.

use crate::bag::{Bag, BagServices};
use crate::config::BagConfig;
use crate::dir::{is_valid_bag_name, InstanceDir};
use crate::entity::UuidIdGenerator;
use crate::error::{CoreError, CoreResult};
use crate::index::DefaultIndexManager;
use crate::metadata::{ManifestMetadataStore, MetadataStore};
use crate::recovery::RecoveryCoordinator;
use bagstore_storage::FileRecordStoreFactory;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Id under which an on-disk instance records its index definitions.
pub const DEFAULT_INSTANCE: &str = "default";

/// A directory of bags.
pub struct Instance {
    dir: InstanceDir,
    config: BagConfig,
    metadata: Arc<ManifestMetadataStore>,
    services: BagServices,
    bags: Mutex<HashMap<String, Arc<Bag>>>,
    opened: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl Instance {
    /// Opens the instance at `path`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InstanceLocked`] if another process has it open
    /// - [`CoreError::Configuration`] if the directory or manifest is unusable
    pub fn open(path: &Path, config: BagConfig) -> CoreResult<Self> {
        let dir = InstanceDir::open(path, config.create_if_missing)?;
        let metadata = Arc::new(ManifestMetadataStore::open(dir.manifest_path())?);
        let clean = metadata.is_last_shutdown_clean();
        metadata.mark_shutdown(false)?;

        let indexes = DefaultIndexManager::new(DEFAULT_INSTANCE, metadata.clone())
            .with_snapshot_dir(dir.indexes_dir());
        let services = BagServices {
            records: Arc::new(FileRecordStoreFactory::new(dir.bags_dir())),
            indexes: Arc::new(indexes),
            metadata: metadata.clone(),
            ids: Arc::new(UuidIdGenerator),
        };
        info!(path = %path.display(), last_shutdown_clean = clean, "opened instance");

        Ok(Self {
            dir,
            config,
            metadata,
            services,
            bags: Mutex::new(HashMap::new()),
            opened: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Whether the session before this one ended with [`Instance::close`].
    #[must_use]
    pub fn was_last_shutdown_clean(&self) -> bool {
        self.metadata.is_last_shutdown_clean()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::invalid_operation("instance is closed"));
        }
        Ok(())
    }

    fn check_name(name: &str) -> CoreResult<()> {
        if is_valid_bag_name(name) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "invalid bag name {name:?}"
            )))
        }
    }

    /// Opens bag `name`, creating it when missing.
    ///
    /// The same bag object is returned until it is closed or removed.
    pub fn bag(&self, name: &str) -> CoreResult<Arc<Bag>> {
        self.ensure_open()?;
        Self::check_name(name)?;

        let mut bags = self.bags.lock();
        if let Some(bag) = bags.get(name).filter(|bag| !bag.is_closed()) {
            return Ok(Arc::clone(bag));
        }
        let bag = Arc::new(Bag::open(
            DEFAULT_INSTANCE,
            name,
            self.services.clone(),
            &self.config,
        )?);
        bags.insert(name.to_string(), Arc::clone(&bag));
        self.opened.lock().insert(name.to_string());
        Ok(bag)
    }

    /// Names of the bags stored in this instance.
    pub fn bag_names(&self) -> CoreResult<Vec<String>> {
        self.dir.bag_names()
    }

    /// Runs primary verification over the records of `name` without opening
    /// the bag. Returns the number of live records.
    pub fn verify_bag(&self, name: &str) -> CoreResult<u64> {
        self.ensure_open()?;
        Self::check_name(name)?;
        let store = self.services.records.load(DEFAULT_INSTANCE, name)?;
        RecoveryCoordinator::new(1)?.verify_primary(store.as_ref())
    }

    /// Deletes bag `name` with its records and indexes.
    pub fn remove_bag(&self, name: &str) -> CoreResult<()> {
        let bag = self.bag(name)?;
        bag.remove()?;
        self.bags.lock().remove(name);
        Ok(())
    }

    /// Closes every open bag and records a clean shutdown.
    ///
    /// When the previous session crashed, the shutdown only counts as clean
    /// if every bag on disk went through recovery in this session. Closing
    /// twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let bags: Vec<Arc<Bag>> = self.bags.lock().drain().map(|(_, bag)| bag).collect();
        for bag in bags {
            if !bag.is_closed() {
                bag.close()?;
            }
        }

        let pending: Vec<String> = if self.metadata.is_last_shutdown_clean() {
            Vec::new()
        } else {
            let opened = self.opened.lock();
            self.dir
                .bag_names()?
                .into_iter()
                .filter(|name| !opened.contains(name))
                .collect()
        };
        if pending.is_empty() {
            self.metadata.mark_shutdown(true)?;
            info!(path = %self.dir.path().display(), "closed instance");
        } else {
            warn!(
                path = %self.dir.path().display(),
                ?pending,
                "closed instance with unrecovered bags, next open recovers again"
            );
        }
        Ok(())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("path", &self.dir.path())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
