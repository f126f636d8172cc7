//! Bag orchestration.
//!
//! A [`Bag`] couples the record store of one named collection with the
//! indexes declared on it. Data-path operations run concurrently under the
//! shared side of the bag's [`BagLock`]; close, remove and flush take it
//! exclusively.
//!
//! Opening a bag decides whether its indexes can be trusted. After an
//! unclean shutdown, when the force-rebuild switch is set, or when an index
//! has no usable snapshot, the [`RecoveryCoordinator`] verifies the records
//! and rebuilds every index before the bag is handed out.

use crate::config::BagConfig;
use crate::entity::{decode_entity, Entity, EntityId, IdGenerator};
use crate::error::{CoreError, CoreResult};
use crate::index::{Index, IndexManager};
use crate::key::{KeyField, KeyInfo};
use crate::lock::BagLock;
use crate::metadata::MetadataStore;
use crate::operation::{
    DataOperation, InsertOperation, OperationContext, PersistOperation, RemoveOperation,
    UpdateOperation,
};
use crate::query::{self, QueryResult, SearchLimit, SearchQuery};
use crate::recovery::{RecoveryCoordinator, RecoveryReport};
use bagstore_storage::{RecordStore, RecordStoreFactory};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators a bag is built from.
///
/// All of them are shared across the process and outlive any single bag.
#[derive(Clone)]
pub struct BagServices {
    /// Hands out record stores.
    pub records: Arc<dyn RecordStoreFactory>,
    /// Owns index structures and definitions.
    pub indexes: Arc<dyn IndexManager>,
    /// Shutdown marker and index definitions.
    pub metadata: Arc<dyn MetadataStore>,
    /// Supplies ids for entities stored without one.
    pub ids: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for BagServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BagServices").finish_non_exhaustive()
    }
}

/// A named record collection with its secondary indexes.
pub struct Bag {
    instance: String,
    name: String,
    services: BagServices,
    store: Arc<dyn RecordStore>,
    lock: BagLock,
    recovery: RwLock<Option<RecoveryCoordinator>>,
    report: Option<RecoveryReport>,
}

impl Bag {
    /// Opens bag `name` of `instance`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Configuration`] when the record store cannot be opened
    /// - [`CoreError::RebuildFailed`] when recovery fails; the bag is not
    ///   returned in that case
    pub fn open(
        instance: impl Into<String>,
        name: impl Into<String>,
        services: BagServices,
        config: &BagConfig,
    ) -> CoreResult<Self> {
        let instance = instance.into();
        let name = name.into();

        let store = services.records.load(&instance, &name).map_err(|e| {
            CoreError::configuration(format!("cannot open record store of bag {name}: {e}"))
        })?;
        if !store.is_open() {
            return Err(CoreError::configuration(format!(
                "record store of bag {name} is closed"
            )));
        }

        let coordinator = RecoveryCoordinator::new(config.rebuild_workers)?;
        let indexes = sorted(services.indexes.get_indexes(&name)?);
        let clean = services.metadata.is_last_shutdown_clean();
        let stale = indexes.iter().filter(|i| i.is_stale()).count();

        let report = if !clean || config.force_rebuild || stale > 0 {
            info!(
                instance = %instance,
                bag = %name,
                clean,
                force = config.force_rebuild,
                stale,
                "recovering bag"
            );
            Some(coordinator.recover(store.as_ref(), &indexes, config.force_rebuild)?)
        } else {
            None
        };

        info!(
            instance = %instance,
            bag = %name,
            indexes = indexes.len(),
            recovered = report.is_some(),
            "opened bag"
        );
        Ok(Self {
            instance,
            name,
            services,
            store,
            lock: BagLock::new(),
            recovery: RwLock::new(Some(coordinator)),
            report,
        })
    }

    /// Bag name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning instance id.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// What recovery did when the bag was opened, if it ran.
    #[must_use]
    pub fn recovery_report(&self) -> Option<RecoveryReport> {
        self.report
    }

    /// Whether the bag was closed or removed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock.is_closed()
    }

    fn indexes(&self) -> CoreResult<Vec<Arc<Index>>> {
        Ok(sorted(self.services.indexes.get_indexes(&self.name)?))
    }

    fn run(&self, op: &dyn DataOperation, entity: &Entity) -> CoreResult<()> {
        let indexes = self.indexes()?;
        let ctx = OperationContext {
            store: self.store.as_ref(),
            indexes: &indexes,
        };
        op.apply(&ctx, entity)?;
        debug!(
            bag = %self.name,
            op = op.name(),
            id = ?entity.id().map(EntityId::as_str),
            "applied data operation"
        );
        Ok(())
    }

    fn with_id(&self, mut entity: Entity) -> Entity {
        if entity.id().is_none() {
            entity.set_id(self.services.ids.generate_new_id());
        }
        entity
    }

    fn required_id<'e>(&self, entity: &'e Entity, op: &str) -> CoreResult<&'e EntityId> {
        entity.id().ok_or_else(|| {
            CoreError::invalid_operation(format!("{op} in bag {} needs an entity id", self.name))
        })
    }

    // ========================================================================
    // Data path
    // ========================================================================

    /// Stores a new entity, assigning an id when it has none.
    ///
    /// Fails with [`CoreError::EntityExists`] when the id is taken.
    pub fn insert(&self, entity: Entity) -> CoreResult<Entity> {
        let _guard = self.lock.shared()?;
        let entity = self.with_id(entity);
        self.run(&InsertOperation, &entity)?;
        Ok(entity)
    }

    /// Stores an entity, replacing any previous version with the same id.
    pub fn persist(&self, entity: Entity) -> CoreResult<Entity> {
        let _guard = self.lock.shared()?;
        let entity = self.with_id(entity);
        self.run(&PersistOperation, &entity)?;
        Ok(entity)
    }

    /// Replaces an existing entity and updates every index incrementally.
    pub fn update(&self, entity: &Entity) -> CoreResult<()> {
        let _guard = self.lock.shared()?;
        self.required_id(entity, "update")?;
        self.run(&UpdateOperation, entity)
    }

    /// Removes an entity and every index entry derived from it.
    pub fn remove_entity(&self, entity: &Entity) -> CoreResult<()> {
        let _guard = self.lock.shared()?;
        self.required_id(entity, "remove")?;
        self.run(&RemoveOperation, entity)
    }

    /// Removes the entity stored under `id`.
    pub fn remove_by_id(&self, id: &str) -> CoreResult<()> {
        let _guard = self.lock.shared()?;
        let id = EntityId::new(id)?;
        self.run(&RemoveOperation, &Entity::with_id(id))
    }

    /// Reads the entity stored under `id`.
    pub fn get(&self, id: &str) -> CoreResult<Option<Entity>> {
        let _guard = self.lock.shared()?;
        if id.is_empty() {
            return Ok(None);
        }
        self.store
            .read_record(id)?
            .map(|data| decode_entity(&data))
            .transpose()
    }

    /// Entities in store order, at most `max` of them.
    pub fn list(&self, max: Option<usize>) -> CoreResult<Vec<Entity>> {
        let _guard = self.lock.shared()?;
        let records = self.store.read_all_records()?;
        let limit = max.unwrap_or(usize::MAX);
        records
            .take(limit)
            .map(|record| decode_entity(&record.data))
            .collect()
    }

    /// Finds the entities matching `query`, through an index when one fits.
    pub fn search(&self, query: &SearchQuery, limit: SearchLimit) -> CoreResult<QueryResult> {
        let _guard = self.lock.shared()?;
        query::search(self.store.as_ref(), &self.indexes()?, query, limit)
    }

    /// Number of live records.
    pub fn size(&self) -> CoreResult<u64> {
        let _guard = self.lock.shared()?;
        Ok(self.store.size()?)
    }

    /// Bytes the record store occupies.
    pub fn disk_size(&self) -> CoreResult<u64> {
        let _guard = self.lock.shared()?;
        Ok(self.store.disk_size()?)
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Declares an index over `key_fields` and populates it.
    ///
    /// Declaring an existing index returns it unchanged unless it is stale,
    /// in which case it is rebuilt. A new index whose initialization fails
    /// is dropped again. Writers block until the index is populated.
    pub fn ensure_index(
        &self,
        key_fields: &[KeyField],
        unique: bool,
        value_fields: &[KeyField],
    ) -> CoreResult<Arc<Index>> {
        // Initialization replaces the index wholesale, so writers must wait.
        let _guard = self.lock.exclusive()?;
        let name = KeyInfo::new(key_fields, value_fields)?.key_name();
        let existed = self
            .services
            .indexes
            .get_indexes(&self.name)?
            .contains_key(&name);

        let index =
            self.services
                .indexes
                .create_index(&self.name, key_fields, unique, value_fields)?;
        if existed && !index.is_stale() {
            return Ok(index);
        }

        let recovery = self.recovery.read();
        let coordinator = recovery.as_ref().ok_or(CoreError::BagClosed)?;
        let result = coordinator.initialize_index(
            self.store.as_ref(),
            self.services.metadata.as_ref(),
            &self.instance,
            &self.name,
            &index,
        );
        match result {
            Ok(entries) => {
                info!(bag = %self.name, index = %name, entries, "initialized index");
                Ok(index)
            }
            Err(e) => {
                if !existed {
                    if let Err(undo) = self.services.indexes.remove_index(&self.name, &name) {
                        warn!(bag = %self.name, index = %name, error = %undo, "could not drop failed index");
                    }
                }
                Err(e)
            }
        }
    }

    /// Drops the index named `name`.
    pub fn remove_index(&self, name: &str) -> CoreResult<()> {
        let _guard = self.lock.shared()?;
        self.services.indexes.remove_index(&self.name, name)
    }

    /// Names of the declared indexes, sorted.
    pub fn index_names(&self) -> CoreResult<Vec<String>> {
        let _guard = self.lock.shared()?;
        Ok(self
            .indexes()?
            .iter()
            .map(|index| index.name().to_string())
            .collect())
    }

    /// The index named `name`.
    pub fn index(&self, name: &str) -> CoreResult<Arc<Index>> {
        let _guard = self.lock.shared()?;
        self.services
            .indexes
            .get_indexes(&self.name)?
            .remove(name)
            .ok_or_else(|| CoreError::IndexNotFound {
                name: name.to_string(),
            })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Makes the records and every index durable.
    pub fn flush(&self) -> CoreResult<()> {
        let guard = self.lock.exclusive()?;
        self.store.flush()?;
        self.services.indexes.flush(&self.name)?;
        guard.release(false);
        debug!(bag = %self.name, "flushed bag");
        Ok(())
    }

    /// Flushes and closes the bag. Every later call fails with
    /// [`CoreError::BagClosed`].
    pub fn close(&self) -> CoreResult<()> {
        let guard = self.lock.exclusive()?;
        let result = self
            .store
            .flush()
            .map_err(CoreError::from)
            .and_then(|()| self.services.indexes.flush(&self.name))
            .and_then(|()| self.store.close().map_err(CoreError::from));
        self.recovery.write().take();
        guard.release(true);
        info!(bag = %self.name, "closed bag");
        result
    }

    /// Deletes the records and every index of the bag.
    pub fn remove(&self) -> CoreResult<()> {
        let guard = self.lock.exclusive()?;
        self.recovery.write().take();
        let result = self.remove_contents();
        guard.release(true);
        info!(bag = %self.name, "removed bag");
        result
    }

    fn remove_contents(&self) -> CoreResult<()> {
        for index in self.indexes()? {
            self.services.indexes.remove_index(&self.name, index.name())?;
        }
        self.services.records.remove(&self.instance, &self.name)?;
        Ok(())
    }
}

fn sorted(indexes: std::collections::HashMap<String, Arc<Index>>) -> Vec<Arc<Index>> {
    let mut indexes: Vec<Arc<Index>> = indexes.into_values().collect();
    indexes.sort_by(|a, b| a.name().cmp(b.name()));
    indexes
}

impl std::fmt::Debug for Bag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bag")
            .field("instance", &self.instance)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
