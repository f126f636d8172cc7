//! Entity identifier and id generation.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest accepted id, in bytes. Index entries reserve this much for the
/// reference back to the entity.
pub const MAX_ID_LEN: u16 = 64;

/// Identifier of an entity within a bag.
///
/// Entity IDs are:
/// - Non-empty strings of at most [`MAX_ID_LEN`] bytes
/// - Unique within a bag
/// - The primary key of the entity's record
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity ID, rejecting empty strings and ids longer than
    /// [`MAX_ID_LEN`] bytes.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::invalid_operation("entity id must not be empty"));
        }
        if id.len() > usize::from(MAX_ID_LEN) {
            return Err(CoreError::invalid_operation(format!(
                "entity id is {} bytes, limit is {MAX_ID_LEN}",
                id.len()
            )));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of process-wide unique entity ids.
pub trait IdGenerator: Send + Sync {
    /// Returns an id never handed out before.
    fn generate_new_id(&self) -> EntityId;
}

/// Generates random UUID v4 ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn generate_new_id(&self) -> EntityId {
        EntityId(Uuid::new_v4().to_string())
    }
}
