//! Data operations applying one entity to a record store and its indexes.
//!
//! Every operation derives the changes of all indexes before touching
//! anything. A derivation or uniqueness failure on one index aborts the whole
//! operation with the record store and every index unchanged.

use crate::diff::BagChanges;
use crate::entity::{decode_entity, encode_entity, Entity, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::index::Index;
use bagstore_storage::RecordStore;
use std::sync::Arc;
use tracing::debug;

/// What a data operation works against.
pub struct OperationContext<'a> {
    /// Primary record store of the bag.
    pub store: &'a dyn RecordStore,
    /// Every index of the bag.
    pub indexes: &'a [Arc<Index>],
}

impl OperationContext<'_> {
    fn current(&self, id: &EntityId) -> CoreResult<Option<Entity>> {
        self.store
            .read_record(id.as_str())?
            .map(|data| decode_entity(&data))
            .transpose()
    }

    fn changes(&self, old: Option<&Entity>, new: Option<&Entity>) -> CoreResult<BagChanges> {
        let changes = BagChanges::derive(self.indexes, old, new)?;
        changes.check()?;
        Ok(changes)
    }
}

/// Applies one entity to a bag.
pub trait DataOperation {
    /// Operation name, for logs.
    fn name(&self) -> &'static str;

    /// Applies `entity`, which must carry an id.
    fn apply(&self, ctx: &OperationContext<'_>, entity: &Entity) -> CoreResult<()>;
}

fn require_id(entity: &Entity) -> CoreResult<&EntityId> {
    entity
        .id()
        .ok_or_else(|| CoreError::invalid_operation("entity has no id"))
}

/// Stores a new entity; fails if its id is already taken.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertOperation;

impl DataOperation for InsertOperation {
    fn name(&self) -> &'static str {
        "insert"
    }

    fn apply(&self, ctx: &OperationContext<'_>, entity: &Entity) -> CoreResult<()> {
        let id = require_id(entity)?;
        if ctx.store.read_record(id.as_str())?.is_some() {
            return Err(CoreError::EntityExists { id: id.to_string() });
        }
        let changes = ctx.changes(None, Some(entity))?;
        ctx.store.insert_record(id.as_str(), &encode_entity(entity)?)?;
        changes.apply()
    }
}

/// Stores an entity, replacing any previous version.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistOperation;

impl DataOperation for PersistOperation {
    fn name(&self) -> &'static str {
        "persist"
    }

    fn apply(&self, ctx: &OperationContext<'_>, entity: &Entity) -> CoreResult<()> {
        let id = require_id(entity)?;
        let old = ctx.current(id)?;
        let changes = ctx.changes(old.as_ref(), Some(entity))?;
        let data = encode_entity(entity)?;
        if old.is_some() {
            ctx.store.update_record(id.as_str(), &data)?;
        } else {
            ctx.store.insert_record(id.as_str(), &data)?;
        }
        changes.apply()
    }
}

/// Replaces an existing entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOperation;

impl DataOperation for UpdateOperation {
    fn name(&self) -> &'static str {
        "update"
    }

    fn apply(&self, ctx: &OperationContext<'_>, entity: &Entity) -> CoreResult<()> {
        let id = require_id(entity)?;
        let old = ctx
            .current(id)?
            .ok_or_else(|| CoreError::EntityNotFound { id: id.to_string() })?;
        let changes = ctx.changes(Some(&old), Some(entity))?;
        ctx.store.update_record(id.as_str(), &encode_entity(entity)?)?;
        debug!(id = %id, indexes = ctx.indexes.len(), "updated entity");
        changes.apply()
    }
}

/// Removes an existing entity; only its id is looked at.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOperation;

impl DataOperation for RemoveOperation {
    fn name(&self) -> &'static str {
        "remove"
    }

    fn apply(&self, ctx: &OperationContext<'_>, entity: &Entity) -> CoreResult<()> {
        let id = require_id(entity)?;
        let old = ctx
            .current(id)?
            .ok_or_else(|| CoreError::EntityNotFound { id: id.to_string() })?;
        let changes = ctx.changes(Some(&old), None)?;
        ctx.store.remove_record(id.as_str())?;
        changes.apply()
    }
}
