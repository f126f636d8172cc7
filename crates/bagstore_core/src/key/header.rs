//! Key factories and their header strings.
//!
//! ```text
//! single:     age(long)
//! composite:  composite(city(string:32);age(long))
//! values:     __ID(string:64)            (';'-separated, "" when none)
//! ```

use crate::error::{CoreError, CoreResult};
use crate::key::{KeyField, KeyType, KeyValue};

const COMPOSITE: &str = "composite";

/// Codec for the key part of an index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFactory {
    /// One key field, encoded as a bare leaf slot.
    Single(KeyField),
    /// Several key fields behind a child count.
    Composite(Vec<KeyField>),
}

impl KeyFactory {
    /// Builds the factory for `fields`: single for one field, composite
    /// otherwise.
    pub fn for_fields(fields: &[KeyField]) -> CoreResult<Self> {
        match fields {
            [] => Err(CoreError::invalid_header("an index needs at least one key field")),
            [field] => Ok(Self::Single(field.clone())),
            _ => {
                if fields.len() > usize::from(u16::MAX) {
                    return Err(CoreError::invalid_header("too many key fields"));
                }
                Ok(Self::Composite(fields.to_vec()))
            }
        }
    }

    /// Key fields in order.
    #[must_use]
    pub fn fields(&self) -> &[KeyField] {
        match self {
            Self::Single(field) => std::slice::from_ref(field),
            Self::Composite(fields) => fields,
        }
    }

    /// Encoded size of the key part.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Single(field) => field.size(),
            Self::Composite(fields) => 2 + fields.iter().map(KeyField::size).sum::<usize>(),
        }
    }

    /// Appends the key part for `values` to `buf`.
    pub fn encode(&self, values: &[&KeyValue], buf: &mut Vec<u8>) -> CoreResult<()> {
        let fields = self.fields();
        if values.len() != fields.len() {
            return Err(CoreError::invalid_key(format!(
                "expected {} key values, got {}",
                fields.len(),
                values.len()
            )));
        }
        if let Self::Composite(_) = self {
            // for_fields() bounds the count by a u16
            buf.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        }
        for (field, value) in fields.iter().zip(values) {
            field.encode(value, buf)?;
        }
        Ok(())
    }

    /// Reads the key part starting at `offset`.
    pub fn decode(&self, data: &[u8], offset: usize) -> CoreResult<Vec<KeyValue>> {
        let mut pos = offset;
        if let Self::Composite(fields) = self {
            let count = data
                .get(pos..pos + 2)
                .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
                .ok_or_else(|| CoreError::invalid_key("truncated composite key"))?;
            if count != fields.len() {
                return Err(CoreError::invalid_key(format!(
                    "composite key has {count} children, schema has {}",
                    fields.len()
                )));
            }
            pos += 2;
        }

        let mut values = Vec::with_capacity(self.fields().len());
        for field in self.fields() {
            values.push(field.decode(data, pos)?);
            pos += field.size();
        }
        Ok(values)
    }

    /// Renders the header string.
    #[must_use]
    pub fn as_header(&self) -> String {
        match self {
            Self::Single(field) => field.as_header(),
            Self::Composite(fields) => format!("{COMPOSITE}({})", fields_as_header(fields)),
        }
    }
}

/// Renders `fields` as a `;`-separated header.
pub(crate) fn fields_as_header(fields: &[KeyField]) -> String {
    fields
        .iter()
        .map(KeyField::as_header)
        .collect::<Vec<_>>()
        .join(";")
}

/// Parses a key header into factories.
///
/// A well-formed key header holds exactly one factory; callers check that.
pub(crate) fn parse_factories(header: &str) -> CoreResult<Vec<KeyFactory>> {
    split_top_level(header)?
        .into_iter()
        .map(parse_factory)
        .collect()
}

/// Parses a value header: a `;`-separated list of single fields.
pub(crate) fn parse_fields(header: &str) -> CoreResult<Vec<KeyField>> {
    split_top_level(header)?
        .into_iter()
        .map(parse_field)
        .collect()
}

fn parse_factory(part: &str) -> CoreResult<KeyFactory> {
    let (name, inner) = split_call(part)?;
    if name == COMPOSITE && inner.contains('(') {
        let fields = parse_fields(inner)?;
        if fields.len() < 2 {
            return Err(CoreError::invalid_header(format!(
                "composite needs at least two fields: {part}"
            )));
        }
        KeyFactory::for_fields(&fields)
    } else {
        parse_field(part).map(KeyFactory::Single)
    }
}

fn parse_field(part: &str) -> CoreResult<KeyField> {
    let (name, inner) = split_call(part)?;
    Ok(KeyField::new(name, KeyType::parse(inner)?))
}

/// Splits `name(inner)`.
fn split_call(part: &str) -> CoreResult<(&str, &str)> {
    let malformed = || CoreError::invalid_header(format!("malformed factory: {part:?}"));
    let open = part.find('(').ok_or_else(malformed)?;
    let name = part[..open].trim();
    let inner = part[open + 1..].strip_suffix(')').ok_or_else(malformed)?;
    if !is_valid_name(name) {
        return Err(malformed());
    }
    Ok((name, inner))
}

/// Splits on `;` outside parentheses. An empty header yields no parts.
fn split_top_level(header: &str) -> CoreResult<Vec<&str>> {
    let header = header.trim();
    if header.is_empty() {
        return Ok(Vec::new());
    }

    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in header.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    CoreError::invalid_header(format!("unbalanced parentheses: {header:?}"))
                })?;
            }
            ';' if depth == 0 => {
                parts.push(header[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(CoreError::invalid_header(format!(
            "unbalanced parentheses: {header:?}"
        )));
    }
    parts.push(header[start..].trim());
    Ok(parts)
}

/// Field names may not contain header syntax.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['(', ')', ';', ':']) && name.trim() == name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_header() {
        let factories = parse_factories("age(long)").unwrap();
        assert_eq!(factories, vec![KeyFactory::Single(KeyField::long("age"))]);
        assert_eq!(factories[0].as_header(), "age(long)");
    }

    #[test]
    fn composite_header() {
        let header = "composite(city(string:32);age(long))";
        let factories = parse_factories(header).unwrap();
        assert_eq!(
            factories,
            vec![KeyFactory::Composite(vec![
                KeyField::text("city", 32),
                KeyField::long("age")
            ])]
        );
        assert_eq!(factories[0].as_header(), header);
        assert_eq!(factories[0].size(), 2 + (1 + 2 + 32) + (1 + 8));
    }

    #[test]
    fn field_named_composite_is_single() {
        let factories = parse_factories("composite(bool)").unwrap();
        assert_eq!(factories, vec![KeyFactory::Single(KeyField::bool("composite"))]);
    }

    #[test]
    fn value_headers() {
        assert!(parse_fields("").unwrap().is_empty());
        assert_eq!(
            parse_fields("a(long);__ID(string:64)").unwrap(),
            vec![KeyField::long("a"), KeyField::text("__ID", 64)]
        );
    }

    #[test]
    fn malformed_headers() {
        for header in [
            "age",
            "age(long",
            "(long)",
            "age(long))",
            "age(float)",
            "composite(a(long)",
            "composite(a(long))",
            "a(long);;b(long)",
        ] {
            assert!(
                matches!(parse_factories(header), Err(CoreError::InvalidHeader { .. })),
                "{header} should be rejected"
            );
        }
    }

    #[test]
    fn composite_round_trip_through_bytes() {
        let factory =
            KeyFactory::for_fields(&[KeyField::text("city", 16), KeyField::long("age")]).unwrap();
        let city = KeyValue::from("Utrecht");
        let age = KeyValue::Long(-4);
        let mut buf = Vec::new();
        factory.encode(&[&city, &age], &mut buf).unwrap();
        assert_eq!(buf.len(), factory.size());
        assert_eq!(factory.decode(&buf, 0).unwrap(), vec![city, age]);
    }
}
