//! Single-field key factories.

use crate::entity::FieldValue;
use crate::error::{CoreError, CoreResult};
use crate::key::KeyValue;
use std::fmt;

const NULL_FLAG: u8 = 0;
const PRESENT_FLAG: u8 = 1;
const SIGN_BIT: u64 = 1 << 63;

/// Type of one key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Signed 64-bit integer.
    Long,
    /// Boolean.
    Bool,
    /// Text of at most `max` UTF-8 bytes.
    Text {
        /// Maximum encoded length in bytes.
        max: u16,
    },
}

impl KeyType {
    /// Encoded payload size, excluding the null flag.
    #[must_use]
    pub const fn payload_size(self) -> usize {
        match self {
            Self::Long => 8,
            Self::Bool => 1,
            Self::Text { max } => 2 + max as usize,
        }
    }

    /// Parses `long`, `bool` or `string:<max>`.
    pub fn parse(descriptor: &str) -> CoreResult<Self> {
        match descriptor {
            "long" => Ok(Self::Long),
            "bool" => Ok(Self::Bool),
            _ => {
                let max = descriptor
                    .strip_prefix("string:")
                    .and_then(|n| n.parse::<u16>().ok())
                    .filter(|&n| n > 0)
                    .ok_or_else(|| {
                        CoreError::invalid_header(format!("unknown key type: {descriptor}"))
                    })?;
                Ok(Self::Text { max })
            }
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => f.write_str("long"),
            Self::Bool => f.write_str("bool"),
            Self::Text { max } => write!(f, "string:{max}"),
        }
    }
}

/// A named, typed field of an index schema.
///
/// Each field encodes into one fixed-size leaf slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyField {
    name: String,
    key_type: KeyType,
}

impl KeyField {
    /// Creates a field of the given type.
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
        }
    }

    /// Creates a `long` field.
    pub fn long(name: impl Into<String>) -> Self {
        Self::new(name, KeyType::Long)
    }

    /// Creates a `bool` field.
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, KeyType::Bool)
    }

    /// Creates a `string:<max>` field.
    pub fn text(name: impl Into<String>, max: u16) -> Self {
        Self::new(name, KeyType::Text { max })
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field type.
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Size of the encoded slot.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.key_type.payload_size()
    }

    /// Renders the field as `name(type)`.
    #[must_use]
    pub fn as_header(&self) -> String {
        format!("{}({})", self.name, self.key_type)
    }

    /// Checks that `value` fits this field.
    pub fn check(&self, value: &KeyValue) -> CoreResult<()> {
        match (self.key_type, value) {
            (_, KeyValue::Null) | (KeyType::Long, KeyValue::Long(_)) => Ok(()),
            (KeyType::Bool, KeyValue::Bool(_)) => Ok(()),
            (KeyType::Text { max }, KeyValue::Text(s)) => {
                if s.len() > usize::from(max) {
                    Err(CoreError::invalid_key(format!(
                        "value for {} is {} bytes, limit is {max}",
                        self.name,
                        s.len()
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Err(CoreError::invalid_key(format!(
                "{value} does not fit {} field {}",
                self.key_type, self.name
            ))),
        }
    }

    /// Converts an entity field value into a key scalar.
    ///
    /// Lists are expanded by the caller; a list reaching this point is a
    /// nested list and is rejected.
    pub fn to_key_value(&self, value: &FieldValue) -> CoreResult<KeyValue> {
        let converted = match value {
            FieldValue::Null => KeyValue::Null,
            FieldValue::Bool(v) => KeyValue::Bool(*v),
            FieldValue::Integer(v) => KeyValue::Long(*v),
            FieldValue::Text(v) => KeyValue::Text(v.clone()),
            FieldValue::List(_) => {
                return Err(CoreError::invalid_key(format!(
                    "nested list in field {}",
                    self.name
                )))
            }
        };
        self.check(&converted)?;
        Ok(converted)
    }

    /// Appends the slot for `value` to `buf`.
    pub fn encode(&self, value: &KeyValue, buf: &mut Vec<u8>) -> CoreResult<()> {
        self.check(value)?;
        let start = buf.len();
        match value {
            KeyValue::Null => {
                buf.push(NULL_FLAG);
                buf.resize(start + self.size(), 0);
            }
            KeyValue::Long(v) => {
                buf.push(PRESENT_FLAG);
                buf.extend_from_slice(&((*v as u64) ^ SIGN_BIT).to_be_bytes());
            }
            KeyValue::Bool(v) => {
                buf.push(PRESENT_FLAG);
                buf.push(u8::from(*v));
            }
            KeyValue::Text(s) => {
                buf.push(PRESENT_FLAG);
                // check() bounds the length by a u16
                buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
                buf.extend_from_slice(s.as_bytes());
                buf.resize(start + self.size(), 0);
            }
        }
        Ok(())
    }

    /// Reads the slot starting at `offset`.
    pub fn decode(&self, data: &[u8], offset: usize) -> CoreResult<KeyValue> {
        let slot = data
            .get(offset..offset + self.size())
            .ok_or_else(|| CoreError::invalid_key(format!("truncated slot for {}", self.name)))?;
        match slot[0] {
            NULL_FLAG => return Ok(KeyValue::Null),
            PRESENT_FLAG => {}
            flag => {
                return Err(CoreError::invalid_key(format!(
                    "invalid null flag {flag:#04x} for {}",
                    self.name
                )))
            }
        }

        let payload = &slot[1..];
        match self.key_type {
            KeyType::Long => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(payload);
                Ok(KeyValue::Long((u64::from_be_bytes(bytes) ^ SIGN_BIT) as i64))
            }
            KeyType::Bool => Ok(KeyValue::Bool(payload[0] != 0)),
            KeyType::Text { max } => {
                let len = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
                if len > usize::from(max) {
                    return Err(CoreError::invalid_key(format!(
                        "stored length {len} exceeds limit {max} for {}",
                        self.name
                    )));
                }
                let text = std::str::from_utf8(&payload[2..2 + len]).map_err(|_| {
                    CoreError::invalid_key(format!("stored text for {} is not UTF-8", self.name))
                })?;
                Ok(KeyValue::Text(text.to_string()))
            }
        }
    }
}
