//! Field name to key position mapping.

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::marker::PhantomData;

/// Builder stage accepting key fields.
#[derive(Debug)]
pub struct KeyFieldsStage;

/// Builder stage accepting value fields.
#[derive(Debug)]
pub struct ValueFieldsStage;

/// Builds a [`KeyNameMapper`].
///
/// Key fields come first; [`mark_values`](Self::mark_values) fixes the value
/// marker, after which only value fields can be added.
///
/// ```rust
/// use bagstore_core::key::KeyNameMapperBuilder;
///
/// let mapper = KeyNameMapperBuilder::new()
///     .key_field("city")
///     .key_field("age")
///     .mark_values()
///     .value_field("__ID")
///     .build()
///     .unwrap();
/// assert_eq!(mapper.value_marker(), 2);
/// assert_eq!(mapper.index_of("__ID"), Some(2));
/// ```
#[derive(Debug)]
pub struct KeyNameMapperBuilder<S> {
    names: Vec<String>,
    value_marker: usize,
    _stage: PhantomData<S>,
}

impl KeyNameMapperBuilder<KeyFieldsStage> {
    /// Starts an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            value_marker: 0,
            _stage: PhantomData,
        }
    }

    /// Appends a key field.
    #[must_use]
    pub fn key_field(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// Ends the key fields; later fields are value fields.
    #[must_use]
    pub fn mark_values(self) -> KeyNameMapperBuilder<ValueFieldsStage> {
        KeyNameMapperBuilder {
            value_marker: self.names.len(),
            names: self.names,
            _stage: PhantomData,
        }
    }

    /// Finishes a mapping without value fields.
    pub fn build(self) -> CoreResult<KeyNameMapper> {
        self.mark_values().build()
    }
}

impl Default for KeyNameMapperBuilder<KeyFieldsStage> {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyNameMapperBuilder<ValueFieldsStage> {
    /// Appends a value field.
    #[must_use]
    pub fn value_field(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// Finishes the mapping, rejecting duplicate names.
    pub fn build(self) -> CoreResult<KeyNameMapper> {
        let mut positions = HashMap::with_capacity(self.names.len());
        for (position, name) in self.names.iter().enumerate() {
            if positions.insert(name.clone(), position).is_some() {
                return Err(CoreError::invalid_header(format!(
                    "field {name} appears twice"
                )));
            }
        }
        Ok(KeyNameMapper {
            names: self.names,
            positions,
            value_marker: self.value_marker,
        })
    }
}

/// Immutable mapping between field names and positions in an index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNameMapper {
    names: Vec<String>,
    positions: HashMap<String, usize>,
    value_marker: usize,
}

impl KeyNameMapper {
    /// Position of `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Name of the field at `position`.
    #[must_use]
    pub fn field_at(&self, position: usize) -> Option<&str> {
        self.names.get(position).map(String::as_str)
    }

    /// Position of the first value field.
    #[must_use]
    pub fn value_marker(&self) -> usize {
        self.value_marker
    }

    /// Whether `name` is a value field.
    #[must_use]
    pub fn is_value_field(&self, name: &str) -> bool {
        self.index_of(name).is_some_and(|p| p >= self.value_marker)
    }

    /// Number of mapped fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no field is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Key field names in order.
    #[must_use]
    pub fn key_fields(&self) -> &[String] {
        &self.names[..self.value_marker]
    }

    /// Value field names in order.
    #[must_use]
    pub fn value_fields(&self) -> &[String] {
        &self.names[self.value_marker..]
    }
}
