//! Index schema.

use crate::entity::{Entity, EntityId, FieldValue, ID_FIELD, MAX_ID_LEN};
use crate::error::{CoreError, CoreResult};
use crate::key::header::{fields_as_header, is_valid_name, parse_factories, parse_fields};
use crate::key::{Key, KeyFactory, KeyField, KeyNameMapper, KeyNameMapperBuilder, KeyValue};
use std::collections::{BTreeSet, HashSet};

/// Describes how one index builds, encodes and orders its entries.
///
/// Entries hold the key fields followed by the value fields. Schemas built
/// with [`KeyInfo::new`] always end with the [`ID_FIELD`] value field, which
/// points back at the indexed entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    key_factory: KeyFactory,
    value_fields: Vec<KeyField>,
    mapper: KeyNameMapper,
}

impl KeyInfo {
    /// Creates a schema over `key_fields` carrying `value_fields`.
    pub fn new(key_fields: &[KeyField], value_fields: &[KeyField]) -> CoreResult<Self> {
        let mut values: Vec<KeyField> = value_fields
            .iter()
            .filter(|f| f.name() != ID_FIELD)
            .cloned()
            .collect();
        if !key_fields.iter().any(|f| f.name() == ID_FIELD) {
            values.push(KeyField::text(ID_FIELD, MAX_ID_LEN));
        }
        Self::from_parts(KeyFactory::for_fields(key_fields)?, values)
    }

    /// Reconstructs a schema from its persisted header strings.
    pub fn from_headers(key_header: &str, value_header: &str) -> CoreResult<Self> {
        let mut factories = parse_factories(key_header)?;
        let key_factory = match (factories.pop(), factories.is_empty()) {
            (Some(factory), true) => factory,
            _ => {
                return Err(CoreError::invalid_header(format!(
                    "expected exactly one key factory in {key_header:?}"
                )))
            }
        };
        Self::from_parts(key_factory, parse_fields(value_header)?)
    }

    fn from_parts(key_factory: KeyFactory, value_fields: Vec<KeyField>) -> CoreResult<Self> {
        let mut builder = KeyNameMapperBuilder::new();
        for field in key_factory.fields() {
            if !is_valid_name(field.name()) {
                return Err(CoreError::invalid_header(format!(
                    "invalid field name {:?}",
                    field.name()
                )));
            }
            builder = builder.key_field(field.name());
        }
        let mut builder = builder.mark_values();
        for field in &value_fields {
            if !is_valid_name(field.name()) {
                return Err(CoreError::invalid_header(format!(
                    "invalid field name {:?}",
                    field.name()
                )));
            }
            builder = builder.value_field(field.name());
        }

        Ok(Self {
            mapper: builder.build()?,
            key_factory,
            value_fields,
        })
    }

    /// Header string describing the key fields.
    #[must_use]
    pub fn key_as_header(&self) -> String {
        self.key_factory.as_header()
    }

    /// Header string describing the value fields.
    #[must_use]
    pub fn value_as_header(&self) -> String {
        fields_as_header(&self.value_fields)
    }

    /// Name derived from the key fields, e.g. `city_age`.
    #[must_use]
    pub fn key_name(&self) -> String {
        self.mapper.key_fields().join("_")
    }

    /// Key fields in order.
    #[must_use]
    pub fn key_fields(&self) -> &[KeyField] {
        self.key_factory.fields()
    }

    /// Value fields in order.
    #[must_use]
    pub fn value_fields(&self) -> &[KeyField] {
        &self.value_fields
    }

    /// Codec of the key part.
    #[must_use]
    pub fn key_factory(&self) -> &KeyFactory {
        &self.key_factory
    }

    /// Name to position mapping.
    #[must_use]
    pub fn mapper(&self) -> &KeyNameMapper {
        &self.mapper
    }

    /// Number of fields in an entry.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.mapper.len()
    }

    /// Encoded size of one entry.
    #[must_use]
    pub fn entry_size(&self) -> usize {
        self.key_factory.size() + self.value_fields.iter().map(KeyField::size).sum::<usize>()
    }

    fn fields(&self) -> impl Iterator<Item = &KeyField> {
        self.key_factory.fields().iter().chain(&self.value_fields)
    }

    fn entry(&self, mut children: Vec<Key>) -> Key {
        if self.arity() == 1 {
            if let Some(only) = children.pop() {
                return only;
            }
        }
        Key::Composite(children)
    }

    fn scalars<'k>(&self, key: &'k Key) -> CoreResult<Vec<&'k KeyValue>> {
        let shaped = match key {
            Key::Leaf(_) => self.arity() == 1,
            Key::Composite(children) => self.arity() > 1 && children.len() == self.arity(),
        };
        if !shaped {
            return Err(CoreError::invalid_key(format!(
                "key {key} does not have the {} fields of {}",
                self.arity(),
                self.key_name()
            )));
        }
        key.children()
            .iter()
            .map(|child| {
                child
                    .as_value()
                    .ok_or_else(|| CoreError::invalid_key(format!("nested composite in {key}")))
            })
            .collect()
    }

    /// Encodes an entry.
    pub fn encode(&self, key: &Key) -> CoreResult<Vec<u8>> {
        let scalars = self.scalars(key)?;
        let (key_part, value_part) = scalars.split_at(self.mapper.value_marker());

        let mut buf = Vec::with_capacity(self.entry_size());
        self.key_factory.encode(key_part, &mut buf)?;
        for (field, value) in self.value_fields.iter().zip(value_part) {
            field.encode(value, &mut buf)?;
        }
        Ok(buf)
    }

    /// Decodes the entry starting at `offset`.
    ///
    /// Value fields start right after the key part.
    pub fn decode(&self, data: &[u8], offset: usize) -> CoreResult<Key> {
        let mut children: Vec<Key> = self
            .key_factory
            .decode(data, offset)?
            .into_iter()
            .map(Key::Leaf)
            .collect();

        let mut pos = offset + self.key_factory.size();
        for field in &self.value_fields {
            children.push(Key::Leaf(field.decode(data, pos)?));
            pos += field.size();
        }
        Ok(self.entry(children))
    }

    /// Derives every entry `entity` contributes to this index.
    ///
    /// List fields contribute one entry per element, several list fields the
    /// cartesian product. Missing fields become null.
    pub fn entity_keys(&self, entity: &Entity) -> CoreResult<BTreeSet<Key>> {
        let mut combinations: Vec<Vec<Key>> = vec![Vec::with_capacity(self.arity())];
        for field in self.fields() {
            let candidates = candidates(field, entity)?;
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    candidates.iter().map(move |value| {
                        let mut next = prefix.clone();
                        next.push(Key::Leaf(value.clone()));
                        next
                    })
                })
                .collect();
        }
        Ok(combinations
            .into_iter()
            .map(|children| self.entry(children))
            .collect())
    }

    /// Whether `entity` has data for at least one key field.
    #[must_use]
    pub fn is_any_data_present(&self, entity: &Entity) -> bool {
        self.key_fields().iter().any(|f| entity.is_present(f.name()))
    }

    /// Scores how well this schema serves a search over `search_fields`.
    ///
    /// Key fields only count as a contiguous leading prefix; matching a key
    /// field after missing an earlier one scores 0. Value fields count
    /// anywhere. Returns `round((key_matches + value_matches) / |search| * 100)`.
    #[must_use]
    pub fn match_fields(&self, search_fields: &HashSet<String>) -> u8 {
        if search_fields.is_empty() {
            return 0;
        }

        let mut key_matches = 0usize;
        let mut missed = false;
        for name in self.mapper.key_fields() {
            if search_fields.contains(name) {
                if missed {
                    return 0;
                }
                key_matches += 1;
            } else {
                missed = true;
            }
        }
        let value_matches = self
            .mapper
            .value_fields()
            .iter()
            .filter(|name| search_fields.contains(*name))
            .count();

        let total = search_fields.len() as f64;
        let score = (key_matches as f64 / total + value_matches as f64 / total) * 100.0;
        score.round().min(100.0) as u8
    }

    /// Key-field children of an entry.
    #[must_use]
    pub fn key_part<'k>(&self, key: &'k Key) -> &'k [Key] {
        let children = key.children();
        &children[..self.mapper.value_marker().min(children.len())]
    }

    /// The entity an entry points at.
    #[must_use]
    pub fn reference(&self, key: &Key) -> Option<EntityId> {
        let position = self.mapper.index_of(ID_FIELD)?;
        match key.value_at(position)? {
            KeyValue::Text(id) => EntityId::new(id.as_str()).ok(),
            _ => None,
        }
    }

    /// Smallest possible entry whose first key field equals `value`.
    #[must_use]
    pub fn lower_bound(&self, value: KeyValue) -> Key {
        if self.arity() == 1 {
            Key::Leaf(value)
        } else {
            Key::Composite(vec![Key::Leaf(value)])
        }
    }

    /// Smallest possible entry starting with the key fields of `key`.
    #[must_use]
    pub fn prefix_bound(&self, key: &Key) -> Key {
        if self.arity() == 1 {
            key.clone()
        } else {
            Key::Composite(self.key_part(key).to_vec())
        }
    }
}

fn candidates(field: &KeyField, entity: &Entity) -> CoreResult<Vec<KeyValue>> {
    if field.name() == ID_FIELD {
        let id = entity
            .id()
            .ok_or_else(|| CoreError::invalid_key("entity has no id"))?;
        let value = KeyValue::Text(id.as_str().to_string());
        field.check(&value)?;
        return Ok(vec![value]);
    }

    match entity.get(field.name()) {
        None => Ok(vec![KeyValue::Null]),
        Some(FieldValue::List(items)) if items.is_empty() => Ok(vec![KeyValue::Null]),
        Some(FieldValue::List(items)) => items.iter().map(|v| field.to_key_value(v)).collect(),
        Some(value) => Ok(vec![field.to_key_value(value)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn fields(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_appends_reference_field() {
        let info = KeyInfo::new(&[KeyField::long("age")], &[]).unwrap();
        assert_eq!(info.key_as_header(), "age(long)");
        assert_eq!(info.value_as_header(), "__ID(string:64)");
        assert_eq!(info.arity(), 2);
        assert_eq!(info.mapper().value_marker(), 1);
        assert_eq!(info.key_name(), "age");
    }

    #[test]
    fn headers_reconstruct_schema() {
        let info = KeyInfo::new(
            &[KeyField::text("city", 32), KeyField::long("age")],
            &[KeyField::bool("active")],
        )
        .unwrap();
        let reloaded = KeyInfo::from_headers(&info.key_as_header(), &info.value_as_header()).unwrap();
        assert_eq!(reloaded, info);
        assert_eq!(info.key_name(), "city_age");
    }

    #[test]
    fn key_header_must_hold_one_factory() {
        assert!(matches!(
            KeyInfo::from_headers("a(long);b(long)", ""),
            Err(CoreError::InvalidHeader { .. })
        ));
        assert!(matches!(
            KeyInfo::from_headers("", ""),
            Err(CoreError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn single_field_schema_uses_leaf_entries() {
        let info = KeyInfo::from_headers("age(long)", "").unwrap();
        let entity = Entity::with_id(id("e1")).with("age", 30);
        let keys = info.entity_keys(&entity).unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec![Key::leaf(30)]);
        assert_eq!(info.reference(&Key::leaf(30)), None);
    }

    #[test]
    fn entity_keys_reference_the_entity() {
        let info = KeyInfo::new(&[KeyField::long("age")], &[]).unwrap();
        let entity = Entity::with_id(id("e1")).with("age", 30);
        let keys: Vec<Key> = info.entity_keys(&entity).unwrap().into_iter().collect();
        assert_eq!(keys, vec![Key::Composite(vec![Key::leaf(30), Key::leaf("e1")])]);
        assert_eq!(info.reference(&keys[0]), Some(id("e1")));
    }

    #[test]
    fn lists_expand_to_cartesian_product() {
        let info = KeyInfo::new(&[KeyField::text("tag", 8), KeyField::long("n")], &[]).unwrap();
        let entity = Entity::with_id(id("e1"))
            .with("tag", vec!["a", "b", "a"])
            .with("n", vec![1, 2]);
        assert_eq!(info.entity_keys(&entity).unwrap().len(), 4);
    }

    #[test]
    fn missing_fields_are_null() {
        let info = KeyInfo::new(&[KeyField::long("age")], &[]).unwrap();
        let entity = Entity::with_id(id("e1"));
        let keys: Vec<Key> = info.entity_keys(&entity).unwrap().into_iter().collect();
        assert_eq!(
            keys,
            vec![Key::Composite(vec![Key::Leaf(KeyValue::Null), Key::leaf("e1")])]
        );
        assert!(!info.is_any_data_present(&entity));
    }

    #[test]
    fn entity_without_id_cannot_be_keyed() {
        let info = KeyInfo::new(&[KeyField::long("age")], &[]).unwrap();
        assert!(matches!(
            info.entity_keys(&Entity::new().with("age", 1)),
            Err(CoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn encode_decode_at_offset() {
        let info = KeyInfo::new(
            &[KeyField::text("city", 16), KeyField::long("age")],
            &[KeyField::bool("active")],
        )
        .unwrap();
        let key = Key::Composite(vec![
            Key::leaf("Delft"),
            Key::leaf(41),
            Key::leaf(true),
            Key::leaf("e9"),
        ]);
        let mut data = vec![0u8; 3];
        data.extend(info.encode(&key).unwrap());
        assert_eq!(data.len(), 3 + info.entry_size());
        assert_eq!(info.decode(&data, 3).unwrap(), key);
    }

    #[test]
    fn misshapen_keys_rejected() {
        let info = KeyInfo::new(&[KeyField::long("age")], &[]).unwrap();
        assert!(info.encode(&Key::leaf(1)).is_err());
        assert!(info
            .encode(&Key::Composite(vec![Key::leaf(1)]))
            .is_err());
        assert!(info
            .encode(&Key::Composite(vec![Key::leaf("x"), Key::leaf("e1")]))
            .is_err());
    }

    #[test]
    fn match_scores() {
        let info = KeyInfo::new(
            &[KeyField::long("a"), KeyField::long("b")],
            &[KeyField::long("v")],
        )
        .unwrap();

        assert_eq!(info.match_fields(&fields(&["a", "b"])), 100);
        assert_eq!(info.match_fields(&fields(&["a"])), 100);
        assert_eq!(info.match_fields(&fields(&["b"])), 0);
        assert_eq!(info.match_fields(&fields(&[])), 0);
        assert_eq!(info.match_fields(&fields(&["a", "x", "y"])), 33);
        assert_eq!(info.match_fields(&fields(&["a", "x", "v"])), 67);
        assert_eq!(info.match_fields(&fields(&["x", "v"])), 50);
    }

    #[test]
    fn bounds() {
        let info = KeyInfo::new(&[KeyField::long("age")], &[]).unwrap();
        assert_eq!(
            info.lower_bound(KeyValue::Long(3)),
            Key::Composite(vec![Key::leaf(3)])
        );
        let entry = Key::Composite(vec![Key::leaf(3), Key::leaf("e1")]);
        assert_eq!(info.prefix_bound(&entry), Key::Composite(vec![Key::leaf(3)]));
        assert_eq!(info.key_part(&entry), &[Key::leaf(3)]);
    }
}
