//! Record byte form of entities (CBOR).

use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult};

/// Encodes an entity into the payload stored by the record store.
pub fn encode_entity(entity: &Entity) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(entity, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a stored payload.
pub fn decode_entity(data: &[u8]) -> CoreResult<Entity> {
    ciborium::from_reader(data).map_err(|e| CoreError::codec(e.to_string()))
}

/// Decodes a stored payload and returns its id.
///
/// Used to re-derive primary keys during verification; a payload without an
/// id is as unusable as one that fails to decode.
pub fn extract_id(data: &[u8]) -> CoreResult<EntityId> {
    decode_entity(data)?
        .id()
        .cloned()
        .ok_or_else(|| CoreError::codec("stored entity has no id"))
}
