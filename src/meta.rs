//! Store metadata
//!
//! The metadata file holds two fixed-size header slots. Commits alternate
//! between them, so a torn write can only damage the slot being written and
//! the previous commit stays readable.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────┐
//! │ Slot 0 (256 bytes)           │ Slot 1 (256 bytes)           │
//! │ bincode(MetaHeader) | CRC32  │ bincode(MetaHeader) | CRC32  │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//! The slot with the highest valid sequence is the committed state.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};
use crate::io::{le_u32, read_exact_at, write_all_at};

/// Magic bytes identifying an ArborKV metadata slot
pub const META_MAGIC: [u8; 8] = *b"AKVMETA\0";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Size of one header slot
pub const SLOT_SIZE: usize = 256;

/// Persisted store metadata (one committed state)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaHeader {
    pub magic: [u8; 8],
    pub format_version: u32,
    /// Commit sequence; picks the slot and orders the two slots
    pub sequence: u64,
    /// Packed pointer to the index root node
    pub root: u64,
    /// Last entry version handed out
    pub version: u64,
    /// Live keys
    pub entry_count: u64,
    /// Deleted entries still present in the index
    pub dead_entries: u64,
    /// Bumped before any region is returned to a free list
    pub reclaim_generation: u64,
    pub index_high_water: u64,
    pub data_high_water: u64,
    pub value_block_size: u64,
    pub next_segment_seq: u64,
}

impl MetaHeader {
    /// Header for a freshly created store
    pub fn new(root: u64, index_high_water: u64, value_block_size: u64) -> Self {
        Self {
            magic: META_MAGIC,
            format_version: FORMAT_VERSION,
            sequence: 1,
            root,
            version: 0,
            entry_count: 0,
            dead_entries: 0,
            reclaim_generation: 0,
            index_high_water,
            data_high_water: 0,
            value_block_size,
            next_segment_seq: 1,
        }
    }

    /// Encode into a slot buffer: bincode body followed by its CRC32
    pub fn to_slot(&self) -> Result<[u8; SLOT_SIZE]> {
        let body = bincode::serialize(self)?;
        if body.len() + 4 > SLOT_SIZE {
            return Err(ArborError::Serialization(format!(
                "metadata header too large: {} bytes",
                body.len()
            )));
        }

        let mut slot = [0u8; SLOT_SIZE];
        slot[..body.len()].copy_from_slice(&body);
        let crc = crc32fast::hash(&body);
        slot[body.len()..body.len() + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(slot)
    }

    /// Decode and verify one slot; `None` if the slot is empty or damaged
    pub fn from_slot(slot: &[u8]) -> Option<Self> {
        let header: MetaHeader = bincode::deserialize(slot).ok()?;
        let body_len = bincode::serialized_size(&header).ok()? as usize;
        if body_len + 4 > slot.len() {
            return None;
        }
        let stored = le_u32(slot, body_len);
        if crc32fast::hash(&slot[..body_len]) != stored || header.magic != META_MAGIC {
            return None;
        }
        Some(header)
    }
}

/// The dual-slot metadata file
#[derive(Debug)]
pub struct MetaFile {
    path: PathBuf,
    file: File,
}

impl MetaFile {
    /// Create a new metadata file holding `header` in its first slot
    pub fn create(path: &Path, header: &MetaHeader) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((SLOT_SIZE * 2) as u64)?;

        let meta = Self {
            path: path.to_path_buf(),
            file,
        };
        meta.write(header)?;
        meta.sync()?;
        Ok(meta)
    }

    /// Open an existing metadata file
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the committed header (highest valid sequence)
    pub fn read_latest(&self) -> Result<MetaHeader> {
        let mut buf = [0u8; SLOT_SIZE * 2];
        read_exact_at(&self.file, &mut buf, 0).map_err(|e| {
            ArborError::CorruptStore(format!("metadata file truncated: {}", e))
        })?;

        let a = MetaHeader::from_slot(&buf[..SLOT_SIZE]);
        let b = MetaHeader::from_slot(&buf[SLOT_SIZE..]);

        let header = match (a, b) {
            (Some(a), Some(b)) => {
                if a.sequence >= b.sequence {
                    a
                } else {
                    b
                }
            }
            (Some(h), None) | (None, Some(h)) => h,
            (None, None) => {
                return Err(ArborError::CorruptStore(
                    "no valid metadata slot".to_string(),
                ))
            }
        };

        if header.format_version != FORMAT_VERSION {
            return Err(ArborError::CorruptStore(format!(
                "unsupported format version {} (expected {})",
                header.format_version, FORMAT_VERSION
            )));
        }
        Ok(header)
    }

    /// Write `header` into the slot selected by its sequence
    pub fn write(&self, header: &MetaHeader) -> Result<()> {
        let slot = header.to_slot()?;
        let offset = (header.sequence % 2) * SLOT_SIZE as u64;
        write_all_at(&self.file, &slot, offset)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
