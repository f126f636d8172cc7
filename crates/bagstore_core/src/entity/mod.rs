//! Entity model.
//!
//! An entity is a document: an optional id plus named fields. The id is
//! assigned by an [`IdGenerator`] when a document without one is inserted.

mod codec;
mod id;
mod value;

pub use codec::{decode_entity, encode_entity, extract_id};
pub use id::{EntityId, IdGenerator, UuidIdGenerator, MAX_ID_LEN};
pub use value::FieldValue;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name under which index schemas reference the entity id.
pub const ID_FIELD: &str = "__ID";

/// A document stored in a bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    id: Option<EntityId>,
    fields: BTreeMap<String, FieldValue>,
}

impl Entity {
    /// Creates an entity without id or fields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entity with the given id.
    #[must_use]
    pub fn with_id(id: EntityId) -> Self {
        Self {
            id: Some(id),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns whether `name` holds data.
    ///
    /// [`ID_FIELD`] is present whenever the entity has an id.
    #[must_use]
    pub fn is_present(&self, name: &str) -> bool {
        if name == ID_FIELD {
            return self.id.is_some();
        }
        self.fields.get(name).is_some_and(FieldValue::is_present)
    }

    /// Returns the id, if assigned.
    #[must_use]
    pub fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    /// Assigns the id.
    pub fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    /// Iterates fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}
