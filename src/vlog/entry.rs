//! Value log entry framing
//!
//! ```text
//! ┌─────────┬──────────┬─────────┬─────────┬─────────────┬─────┬───────┐
//! │ CRC (4) │ Flags(1) │ Pad (3) │ KeyLen  │ ValLen (4)  │ Ver │ Key   │ Value
//! │         │          │         │   (4)   │             │ (8) │       │
//! └─────────┴──────────┴─────────┴─────────┴─────────────┴─────┴───────┘
//! ```
//! The CRC covers everything after the padding (lengths, version, key,
//! value). The flags byte sits outside the CRC so a tombstone can be set in
//! place without rewriting the entry.

use bytes::{Bytes, BytesMut};

use crate::arena::ArenaFile;
use crate::error::{ArborError, Result};
use crate::io::{le_u32, le_u64};

/// Entry header size in bytes
pub const ENTRY_HEADER_SIZE: u64 = 24;

/// Offset of the flags byte inside the entry header
pub const FLAGS_OFFSET: u64 = 4;

/// Flag bit: the entry is reclaimable
pub const FLAG_TOMBSTONE: u8 = 0x01;

/// Location of a value in the log, as stored in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef {
    /// Absolute offset of the entry in the data file
    pub offset: u64,
    /// Value length in bytes
    pub len: u32,
    /// Version assigned when the value was written
    pub version: u64,
}

impl ValueRef {
    /// Size of the whole entry this reference points at
    pub fn entry_size(&self, key_len: usize) -> u64 {
        entry_size(key_len, self.len as usize)
    }
}

/// Total framed size of an entry
pub fn entry_size(key_len: usize, value_len: usize) -> u64 {
    ENTRY_HEADER_SIZE + key_len as u64 + value_len as u64
}

/// Encode an entry into a single buffer ready to be written
pub fn encode_entry(key: &[u8], value: &[u8], version: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entry_size(key.len(), value.len()) as usize);
    buf.extend_from_slice(&[0u8; 8]); // crc + flags + pad, filled below
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);

    let crc = crc32fast::hash(&buf[8..]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Decoded entry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub crc: u32,
    pub flags: u8,
    pub key_len: u32,
    pub value_len: u32,
    pub version: u64,
}

impl EntryHeader {
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            crc: le_u32(buf, 0),
            flags: buf[FLAGS_OFFSET as usize],
            key_len: le_u32(buf, 8),
            value_len: le_u32(buf, 12),
            version: le_u64(buf, 16),
        }
    }

    pub fn size(&self) -> u64 {
        entry_size(self.key_len as usize, self.value_len as usize)
    }

    pub fn is_tombstoned(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    /// A zero key length marks the end of written entries
    pub fn is_terminator(&self) -> bool {
        self.key_len == 0
    }
}

/// Read the value `vref` points at, checking key, lengths and CRC.
pub fn read_value(file: &ArenaFile, vref: ValueRef, key: &[u8]) -> Result<Bytes> {
    let size = vref.entry_size(key.len()) as usize;
    let mut buf = BytesMut::zeroed(size);
    file.read_at(vref.offset, &mut buf)?;

    let header = EntryHeader::parse(&buf);
    if header.key_len as usize != key.len() || header.value_len != vref.len {
        return Err(ArborError::corruption(vref.offset, "entry length mismatch"));
    }
    if header.version != vref.version {
        return Err(ArborError::corruption(vref.offset, "entry version mismatch"));
    }
    if crc32fast::hash(&buf[8..]) != header.crc {
        return Err(ArborError::corruption(vref.offset, "entry checksum mismatch"));
    }

    let key_start = ENTRY_HEADER_SIZE as usize;
    let value_start = key_start + key.len();
    if &buf[key_start..value_start] != key {
        return Err(ArborError::corruption(vref.offset, "entry key mismatch"));
    }

    Ok(buf.freeze().slice(value_start..))
}

/// Read and verify a whole entry (key and value) at `offset`.
///
/// `limit` is the end of the segment holding the entry; a header claiming
/// more bytes than that is rejected before anything is allocated.
pub fn read_entry(file: &ArenaFile, offset: u64, limit: u64) -> Result<(EntryHeader, Bytes, Bytes)> {
    let mut head = [0u8; ENTRY_HEADER_SIZE as usize];
    file.read_at(offset, &mut head)?;
    let header = EntryHeader::parse(&head);
    if header.is_terminator() {
        return Err(ArborError::corruption(offset, "no entry at offset"));
    }
    if offset.saturating_add(header.size()) > limit {
        return Err(ArborError::corruption(offset, "entry runs past its segment"));
    }

    let mut buf = BytesMut::zeroed(header.size() as usize);
    file.read_at(offset, &mut buf)?;
    if crc32fast::hash(&buf[8..]) != header.crc {
        return Err(ArborError::corruption(offset, "entry checksum mismatch"));
    }

    let buf = buf.freeze();
    let key_start = ENTRY_HEADER_SIZE as usize;
    let value_start = key_start + header.key_len as usize;
    Ok((header, buf.slice(key_start..value_start), buf.slice(value_start..)))
}
