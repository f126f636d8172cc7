//! Persisted index metadata.

use crate::error::{CoreError, CoreResult};
use crate::key::KeyInfo;
use serde::{Deserialize, Serialize};

/// Structure backing an index.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// Ordered tree supporting range scans.
    BTree = 1,
}

impl TryFrom<u8> for IndexType {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(IndexType::BTree),
            _ => Err(CoreError::invalid_header(format!("unknown index type: {value}"))),
        }
    }
}

/// What gets written to the metadata store when an index is declared.
///
/// The header strings are enough to rebuild the exact [`KeyInfo`] on reload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name.
    pub name: String,
    /// Key header, see [`KeyInfo::key_as_header`].
    pub key_header: String,
    /// Value header, see [`KeyInfo::value_as_header`].
    pub value_header: String,
    /// Index structure.
    pub index_type: IndexType,
    /// Whether the index rejects two entities with the same key fields.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    /// Describes an index over `key_info`.
    #[must_use]
    pub fn new(name: impl Into<String>, key_info: &KeyInfo, unique: bool) -> Self {
        Self {
            name: name.into(),
            key_header: key_info.key_as_header(),
            value_header: key_info.value_as_header(),
            index_type: IndexType::BTree,
            unique,
        }
    }

    /// Parses the header strings back into a schema.
    pub fn key_info(&self) -> CoreResult<KeyInfo> {
        KeyInfo::from_headers(&self.key_header, &self.value_header)
    }
}
