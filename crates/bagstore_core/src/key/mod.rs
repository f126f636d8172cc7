//! Index key model.
//!
//! Every index entry is a [`Key`]: a single typed scalar, or an ordered
//! sequence of child keys when the index schema has more than one field.
//! A [`KeyInfo`] describes one index schema. It derives keys from entities,
//! encodes them to a fixed-size binary layout, and renders itself as a pair
//! of header strings that reconstruct the same schema on reload.
//!
//! ## Binary layout
//!
//! ```text
//! leaf slot:  | null flag (u8) | payload |
//!   long      payload = 8 bytes, big-endian, sign bit flipped
//!   bool      payload = 1 byte
//!   string:N  payload = u16 BE length + N bytes, zero padded
//!
//! composite:  | child count (u16 BE) | slot | slot | ... |
//! entry:      | key part | value slot | value slot | ... |
//! ```

mod field;
mod header;
mod info;
mod mapper;

pub use field::{KeyField, KeyType};
pub use header::KeyFactory;
pub use info::KeyInfo;
pub use mapper::{KeyFieldsStage, KeyNameMapper, KeyNameMapperBuilder, ValueFieldsStage};

use std::fmt;

/// Scalar stored in a leaf key.
///
/// Values of different types order `Null < Bool < Long < Text`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    /// Field missing from the entity.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Long(i64),
    /// UTF-8 text.
    Text(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

/// An index key.
///
/// Composite keys compare child by child; a composite that is a strict
/// prefix of another sorts first, which range scans use as a lower bound.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// One scalar.
    Leaf(KeyValue),
    /// Ordered children, one per schema field.
    Composite(Vec<Key>),
}

impl Key {
    /// Creates a leaf key.
    #[must_use]
    pub fn leaf(value: impl Into<KeyValue>) -> Self {
        Self::Leaf(value.into())
    }

    /// Returns the children of a composite, or the key itself for a leaf.
    #[must_use]
    pub fn children(&self) -> &[Key] {
        match self {
            Self::Leaf(_) => std::slice::from_ref(self),
            Self::Composite(children) => children,
        }
    }

    /// Returns the scalar of a leaf key.
    #[must_use]
    pub fn as_value(&self) -> Option<&KeyValue> {
        match self {
            Self::Leaf(value) => Some(value),
            Self::Composite(_) => None,
        }
    }

    /// Returns the scalar of the child at `position`.
    #[must_use]
    pub fn value_at(&self, position: usize) -> Option<&KeyValue> {
        self.children().get(position).and_then(Key::as_value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(value) => write!(f, "{value}"),
            Self::Composite(children) => {
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        Self::Long(i64::from(v))
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_ordering() {
        assert!(KeyValue::Null < KeyValue::Bool(false));
        assert!(KeyValue::Bool(true) < KeyValue::Long(i64::MIN));
        assert!(KeyValue::Long(-1) < KeyValue::Long(0));
        assert!(KeyValue::Long(i64::MAX) < KeyValue::Text(String::new()));
    }

    #[test]
    fn prefix_sorts_before_extensions() {
        let bound = Key::Composite(vec![Key::leaf(30)]);
        let entry = Key::Composite(vec![Key::leaf(30), Key::leaf("a")]);
        let smaller = Key::Composite(vec![Key::leaf(29), Key::leaf("z")]);
        assert!(smaller < bound);
        assert!(bound < entry);
    }

    #[test]
    fn children_of_leaf_is_itself() {
        let key = Key::leaf(7);
        assert_eq!(key.children(), &[Key::leaf(7)]);
        assert_eq!(key.value_at(0), Some(&KeyValue::Long(7)));
        assert_eq!(key.value_at(1), None);
    }

    #[test]
    fn display() {
        let key = Key::Composite(vec![Key::leaf(30), Key::leaf("e1"), Key::Leaf(KeyValue::Null)]);
        assert_eq!(key.to_string(), "(30, \"e1\", null)");
    }
}
