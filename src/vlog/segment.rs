//! Value log segments
//!
//! A segment is one arena region (one or more value blocks) filled by
//! appending entries after a small header.
//!
//! ## Header (32 bytes)
//! ```text
//! ┌───────────┬─────────┬──────────┬───────────────┬─────────┬─────────┐
//! │ Magic (4) │ Pad (4) │ Seq (8)  │ Capacity (8)  │ CRC (4) │ Pad (4) │
//! └───────────┴─────────┴──────────┴───────────────┴─────────┴─────────┘
//! ```
//! A freed segment has its header zeroed, so a block-by-block scan only
//! finds segments that are still allocated.

use crate::arena::Region;
use crate::io::{le_u32, le_u64};

/// Magic bytes identifying a value log segment
pub const SEGMENT_MAGIC: &[u8; 4] = b"AKVS";

/// Segment header size
pub const SEGMENT_HEADER_SIZE: u64 = 32;

/// Encode a segment header
pub fn encode_header(seq: u64, capacity: u64) -> [u8; SEGMENT_HEADER_SIZE as usize] {
    let mut buf = [0u8; SEGMENT_HEADER_SIZE as usize];
    buf[0..4].copy_from_slice(SEGMENT_MAGIC);
    buf[8..16].copy_from_slice(&seq.to_le_bytes());
    buf[16..24].copy_from_slice(&capacity.to_le_bytes());
    let crc = crc32fast::hash(&buf[0..24]);
    buf[24..28].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Decode a segment header; `None` for free or damaged blocks
pub fn decode_header(buf: &[u8]) -> Option<(u64, u64)> {
    if buf.len() < SEGMENT_HEADER_SIZE as usize || &buf[0..4] != SEGMENT_MAGIC {
        return None;
    }
    if crc32fast::hash(&buf[0..24]) != le_u32(buf, 24) {
        return None;
    }
    Some((le_u64(buf, 8), le_u64(buf, 16)))
}

/// In-memory accounting for one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Allocation order; collection goes oldest first
    pub seq: u64,
    /// Arena region holding the segment
    pub region: Region,
    /// Bytes written so far, header included
    pub used: u64,
    /// Bytes of entries still referenced by live index entries
    pub live_bytes: u64,
    /// Bytes of overwritten or deleted entries
    pub dead_bytes: u64,
}

impl Segment {
    pub fn new(seq: u64, region: Region) -> Self {
        Self {
            seq,
            region,
            used: SEGMENT_HEADER_SIZE,
            live_bytes: 0,
            dead_bytes: 0,
        }
    }

    /// Free space left for appends
    pub fn remaining(&self) -> u64 {
        self.region.len - self.used
    }

    /// Absolute offset of the next append
    pub fn tail(&self) -> u64 {
        self.region.offset + self.used
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.region.offset && offset < self.region.offset + self.used
    }
}
