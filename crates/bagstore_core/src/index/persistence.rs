//! Index snapshots.
//!
//! A snapshot lets a cleanly shut down bag skip the rebuild on the next
//! open. Snapshots are an optimization, never the source of truth: a
//! missing, corrupt or mismatching snapshot leaves the index stale and the
//! bag rebuilds it from its records.
//!
//! ## Format
//!
//! ```text
//! magic        "BIDX"
//! version      u8
//! index_type   u8
//! unique       u8
//! name         u16 BE length + bytes
//! key header   u16 BE length + bytes
//! value header u16 BE length + bytes
//! entry_size   u32 BE
//! entry_count  u64 BE
//! entries      entry_count * entry_size bytes, in key order
//! crc32        u32 BE over everything before it
//! ```

use crate::error::{CoreError, CoreResult};
use crate::index::{Index, IndexDefinition, IndexType};
use crate::key::Key;
use bagstore_storage::crc32;
use std::collections::BTreeSet;

/// Magic bytes for index snapshots: "BIDX"
const INDEX_MAGIC: [u8; 4] = *b"BIDX";

/// Current snapshot format version.
const INDEX_VERSION: u8 = 1;

/// Header of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Definition of the snapshotted index.
    pub definition: IndexDefinition,
    /// Size of one encoded entry.
    pub entry_size: u32,
    /// Number of entries.
    pub entry_count: u64,
}

fn corrupt(message: impl Into<String>) -> CoreError {
    CoreError::codec(format!("index snapshot: {}", message.into()))
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> CoreResult<()> {
    let len = u16::try_from(s.len()).map_err(|_| corrupt(format!("string too long: {s}")))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> CoreResult<&'a [u8]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| corrupt(format!("truncated {what}")))?;
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self, what: &str) -> CoreResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> CoreResult<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> CoreResult<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &str) -> CoreResult<u64> {
        let b = self.take(8, what)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_be_bytes(bytes))
    }

    fn string(&mut self, what: &str) -> CoreResult<String> {
        let len = usize::from(self.u16(what)?);
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| corrupt(format!("{what} is not UTF-8")))
    }
}

/// Serializes the contents of `index`.
pub fn persist_index(index: &Index) -> CoreResult<Vec<u8>> {
    let definition = index.definition();
    let key_info = index.key_info();
    let entries = index.entries();
    let entry_size = u32::try_from(key_info.entry_size())
        .map_err(|_| corrupt("entry size exceeds u32"))?;

    let mut buf = Vec::with_capacity(64 + entries.len() * key_info.entry_size());
    buf.extend_from_slice(&INDEX_MAGIC);
    buf.push(INDEX_VERSION);
    buf.push(definition.index_type as u8);
    buf.push(u8::from(definition.unique));
    put_str(&mut buf, &definition.name)?;
    put_str(&mut buf, &definition.key_header)?;
    put_str(&mut buf, &definition.value_header)?;
    buf.extend_from_slice(&entry_size.to_be_bytes());
    buf.extend_from_slice(&(entries.len() as u64).to_be_bytes());
    for key in &entries {
        buf.extend(key_info.encode(key)?);
    }

    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    Ok(buf)
}

fn read_header(reader: &mut Reader<'_>) -> CoreResult<SnapshotHeader> {
    if reader.take(4, "magic")? != INDEX_MAGIC {
        return Err(corrupt("invalid magic"));
    }
    let version = reader.u8("version")?;
    if version != INDEX_VERSION {
        return Err(corrupt(format!("unsupported version {version}")));
    }
    let index_type = IndexType::try_from(reader.u8("index type")?)?;
    let unique = reader.u8("unique flag")? != 0;
    let name = reader.string("name")?;
    let key_header = reader.string("key header")?;
    let value_header = reader.string("value header")?;
    let entry_size = reader.u32("entry size")?;
    let entry_count = reader.u64("entry count")?;

    Ok(SnapshotHeader {
        definition: IndexDefinition {
            name,
            key_header,
            value_header,
            index_type,
            unique,
        },
        entry_size,
        entry_count,
    })
}

fn checked_body(data: &[u8]) -> CoreResult<&[u8]> {
    if data.len() < 4 {
        return Err(corrupt("shorter than its checksum"));
    }
    let (body, tail) = data.split_at(data.len() - 4);
    let stored = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let computed = crc32(body);
    if stored != computed {
        return Err(corrupt(format!(
            "checksum mismatch: stored {stored:08x}, computed {computed:08x}"
        )));
    }
    Ok(body)
}

/// Reads the header of a snapshot without decoding its entries.
pub fn read_snapshot_header(data: &[u8]) -> CoreResult<SnapshotHeader> {
    let body = checked_body(data)?;
    read_header(&mut Reader { data: body, pos: 0 })
}

/// Loads a snapshot into `index`.
///
/// Fails without touching `index` when the snapshot was taken from a
/// different definition or is damaged.
pub fn load_index(index: &Index, data: &[u8]) -> CoreResult<usize> {
    let body = checked_body(data)?;
    let mut reader = Reader { data: body, pos: 0 };
    let header = read_header(&mut reader)?;

    if header.definition != index.definition() {
        return Err(corrupt(format!(
            "snapshot describes {:?}, index is {:?}",
            header.definition,
            index.definition()
        )));
    }
    let key_info = index.key_info();
    if header.entry_size as usize != key_info.entry_size() {
        return Err(corrupt("entry size mismatch"));
    }

    let mut keys: BTreeSet<Key> = BTreeSet::new();
    for _ in 0..header.entry_count {
        let bytes = reader.take(key_info.entry_size(), "entry")?;
        keys.insert(key_info.decode(bytes, 0)?);
    }
    if reader.pos != body.len() {
        return Err(corrupt("trailing bytes after entries"));
    }

    let count = keys.len();
    index.restore(keys);
    Ok(count)
}
