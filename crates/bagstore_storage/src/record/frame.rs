//! Record frame layout.
//!
//! ```text
//! +-----------+-------+---------+-----------+---------+--------+
//! | len (u32) | flags | key_len | key bytes | payload | crc32  |
//! |    LE     |  u8   | u16 LE  |           |         | u32 LE |
//! +-----------+-------+---------+-----------+---------+--------+
//! ```
//!
//! `len` covers the whole frame including itself and the checksum. The
//! checksum covers every byte before it.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

const FLAG_TOMBSTONE: u8 = 0x01;

/// len (4) + flags (1) + key_len (2)
pub(crate) const HEADER_SIZE: usize = 7;
pub(crate) const CRC_SIZE: usize = 4;

/// One entry of the record log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub key: String,
    pub tombstone: bool,
    pub payload: Vec<u8>,
}

/// Outcome of reading the frame at some offset.
pub(crate) enum FrameRead {
    /// A valid frame and its encoded length.
    Frame(Frame, u64),
    /// The log ends with an incomplete or unchecked frame.
    TornTail,
}

impl Frame {
    pub fn put(key: &str, payload: &[u8]) -> Self {
        Self {
            key: key.to_string(),
            tombstone: false,
            payload: payload.to_vec(),
        }
    }

    pub fn tombstone(key: &str) -> Self {
        Self {
            key: key.to_string(),
            tombstone: true,
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let key = self.key.as_bytes();
        let key_len = u16::try_from(key.len()).map_err(|_| {
            StorageError::invalid_input(format!("record key too long: {} bytes", key.len()))
        })?;
        let total = HEADER_SIZE + key.len() + self.payload.len() + CRC_SIZE;
        let total_u32 = u32::try_from(total).map_err(|_| {
            StorageError::invalid_input(format!("record too large: {} bytes", total))
        })?;

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&total_u32.to_le_bytes());
        buf.push(if self.tombstone { FLAG_TOMBSTONE } else { 0 });
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&self.payload);
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> StorageResult<Self> {
        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(StorageError::corrupted("frame shorter than its header"));
        }
        let body_end = data.len() - CRC_SIZE;
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let computed = crc32(&data[..body_end]);
        if stored != computed {
            return Err(StorageError::corrupted(format!(
                "checksum mismatch: stored {:08x}, computed {:08x}",
                stored, computed
            )));
        }

        let flags = data[4];
        let key_len = u16::from_le_bytes([data[5], data[6]]) as usize;
        let key_end = HEADER_SIZE + key_len;
        if key_end > body_end {
            return Err(StorageError::corrupted("key length exceeds frame"));
        }
        let key = std::str::from_utf8(&data[HEADER_SIZE..key_end])
            .map_err(|_| StorageError::corrupted("record key is not UTF-8"))?
            .to_string();

        Ok(Self {
            key,
            tombstone: flags & FLAG_TOMBSTONE != 0,
            payload: data[key_end..body_end].to_vec(),
        })
    }
}

/// Reads the frame starting at `offset`.
///
/// A frame that runs past the end of the backend, the last frame failing
/// its checksum, or a zero-filled remainder is reported as a torn tail. A
/// bad frame followed by more data is corruption.
pub(crate) fn read_frame(backend: &dyn StorageBackend, offset: u64) -> StorageResult<FrameRead> {
    let size = backend.size()?;
    if offset + 4 > size {
        return Ok(FrameRead::TornTail);
    }
    let len_bytes = backend.read_at(offset, 4)?;
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as u64;
    if len < (HEADER_SIZE + CRC_SIZE) as u64 {
        if is_zero_filled(backend, offset, size)? {
            return Ok(FrameRead::TornTail);
        }
        return Err(StorageError::corrupted(format!(
            "invalid frame length {} at offset {}",
            len, offset
        )));
    }
    if offset + len > size {
        return Ok(FrameRead::TornTail);
    }

    let data = backend.read_at(offset, len as usize)?;
    match Frame::decode(&data) {
        Ok(frame) => Ok(FrameRead::Frame(frame, len)),
        Err(_) if offset + len == size => Ok(FrameRead::TornTail),
        Err(e) => Err(e),
    }
}

/// Whether every byte from `offset` to `size` is zero.
fn is_zero_filled(backend: &dyn StorageBackend, offset: u64, size: u64) -> StorageResult<bool> {
    const CHUNK: u64 = 4096;
    let mut at = offset;
    while at < size {
        let len = CHUNK.min(size - at);
        if backend.read_at(at, len as usize)?.iter().any(|&b| b != 0) {
            return Ok(false);
        }
        at += len;
    }
    Ok(true)
}

/// CRC-32 (IEEE, reflected) over `data`.
///
/// Used for record frames and index snapshots.
pub fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut n = 0;
        while n < 256 {
            let mut c = n as u32;
            let mut k = 0;
            while k < 8 {
                c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
                k += 1;
            }
            table[n] = c;
            n += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn put_frame_decodes() {
        let frame = Frame::put("e1", b"{payload}");
        let bytes = frame.encode().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn flipped_byte_is_detected() {
        let mut bytes = Frame::tombstone("e1").encode().unwrap();
        bytes[8] ^= 0xFF;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn half_written_last_frame_is_torn() {
        let mut backend = InMemoryBackend::new();
        let first = Frame::put("a", b"1").encode().unwrap();
        let second = Frame::put("b", b"2").encode().unwrap();
        backend.append(&first).unwrap();
        backend.append(&second[..second.len() - 3]).unwrap();

        assert!(matches!(
            read_frame(&backend, 0).unwrap(),
            FrameRead::Frame(_, _)
        ));
        assert!(matches!(
            read_frame(&backend, first.len() as u64).unwrap(),
            FrameRead::TornTail
        ));
    }

    #[test]
    fn zero_filled_tail_is_torn() {
        let mut backend = InMemoryBackend::new();
        let first = Frame::put("a", b"1").encode().unwrap();
        backend.append(&first).unwrap();
        backend.append(&[0u8; 64]).unwrap();

        assert!(matches!(
            read_frame(&backend, first.len() as u64).unwrap(),
            FrameRead::TornTail
        ));
    }

    #[test]
    fn short_length_before_data_is_corrupt() {
        let mut backend = InMemoryBackend::new();
        backend.append(&[3, 0, 0, 0]).unwrap();
        backend.append(&Frame::put("a", b"1").encode().unwrap()).unwrap();

        assert!(matches!(
            read_frame(&backend, 0),
            Err(StorageError::Corrupted(_))
        ));
    }
}
