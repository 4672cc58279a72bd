//! Index node encoding
//!
//! ## Node Format
//! ```text
//! ┌─────────┬──────────┬─────────┬──────────────┬───────────────┬─────────┐
//! │ CRC (4) │ Flags(1) │ Pad (1) │ LabelLen (2) │ ChildCount(2) │ Pad (2) │
//! ├─────────┴──────────┴─────────┴──────────────┴───────────────┴─────────┤
//! │ Slot (20, only if HAS_VALUE): Offset (8) | Len (4) | Version (8)      │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │ Label                                                                 │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │ Children: [Byte (1) | NodePtr (8)] x ChildCount, sorted by byte       │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//! The CRC covers everything after itself.

use crate::arena::{ArenaFile, Region};
use crate::error::{ArborError, Result};
use crate::io::{le_u16, le_u32, le_u64};
use crate::vlog::ValueRef;

/// Allocation granule of the index arena
pub const INDEX_GRANULE: u64 = 64;

/// Fixed node header size
pub const NODE_HEADER_SIZE: usize = 12;

/// Encoded size of a value slot
pub const SLOT_SIZE: usize = 20;

/// Encoded size of one child entry
pub const CHILD_SIZE: usize = 9;

const FLAG_HAS_VALUE: u8 = 0x01;
const FLAG_LIVE: u8 = 0x02;

const OFFSET_BITS: u32 = 48;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Pointer to an index node: granule index (48 bits) | granule count (16 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodePtr(u64);

impl NodePtr {
    pub const NULL: NodePtr = NodePtr(0);

    pub fn from_raw(raw: u64) -> Self {
        NodePtr(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Pack an index arena region
    pub fn from_region(region: Region) -> Result<Self> {
        let granules = region.len / INDEX_GRANULE;
        let start = region.offset / INDEX_GRANULE;
        if granules == 0 || granules > u16::MAX as u64 || start > OFFSET_MASK {
            return Err(ArborError::IndexFull);
        }
        Ok(NodePtr((granules << OFFSET_BITS) | start))
    }

    /// The region this pointer covers
    pub fn region(&self) -> Region {
        let start = self.0 & OFFSET_MASK;
        let granules = self.0 >> OFFSET_BITS;
        Region::new(start * INDEX_GRANULE, granules * INDEX_GRANULE)
    }
}

/// Value slot held by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub vref: ValueRef,
    /// Cleared on delete; the slot stays until the collector prunes it
    pub live: bool,
}

impl Slot {
    pub fn live(vref: ValueRef) -> Self {
        Self { vref, live: true }
    }
}

/// Decoded index node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    /// Compressed edge label; a child's label starts with its child byte
    pub label: Vec<u8>,
    pub slot: Option<Slot>,
    /// Sorted by byte
    pub children: Vec<(u8, NodePtr)>,
}

impl Node {
    pub fn new(label: Vec<u8>) -> Self {
        Self {
            label,
            slot: None,
            children: Vec::new(),
        }
    }

    pub fn leaf(label: Vec<u8>, slot: Slot) -> Self {
        Self {
            label,
            slot: Some(slot),
            children: Vec::new(),
        }
    }

    pub fn child(&self, byte: u8) -> Option<NodePtr> {
        self.children
            .binary_search_by_key(&byte, |(b, _)| *b)
            .ok()
            .map(|i| self.children[i].1)
    }

    pub fn set_child(&mut self, byte: u8, ptr: NodePtr) {
        match self.children.binary_search_by_key(&byte, |(b, _)| *b) {
            Ok(i) => self.children[i].1 = ptr,
            Err(i) => self.children.insert(i, (byte, ptr)),
        }
    }

    pub fn remove_child(&mut self, byte: u8) {
        if let Ok(i) = self.children.binary_search_by_key(&byte, |(b, _)| *b) {
            self.children.remove(i);
        }
    }

    pub fn encoded_size(&self) -> usize {
        NODE_HEADER_SIZE
            + if self.slot.is_some() { SLOT_SIZE } else { 0 }
            + self.label.len()
            + self.children.len() * CHILD_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        let mut flags = 0u8;
        if let Some(slot) = &self.slot {
            flags |= FLAG_HAS_VALUE;
            if slot.live {
                flags |= FLAG_LIVE;
            }
        }

        buf.extend_from_slice(&[0u8; 4]);
        buf.push(flags);
        buf.push(0);
        buf.extend_from_slice(&(self.label.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(self.children.len() as u16).to_le_bytes());
        buf.extend_from_slice(&[0u8; 2]);

        if let Some(slot) = &self.slot {
            buf.extend_from_slice(&slot.vref.offset.to_le_bytes());
            buf.extend_from_slice(&slot.vref.len.to_le_bytes());
            buf.extend_from_slice(&slot.vref.version.to_le_bytes());
        }
        buf.extend_from_slice(&self.label);
        for (byte, ptr) in &self.children {
            buf.push(*byte);
            buf.extend_from_slice(&ptr.raw().to_le_bytes());
        }

        let crc = crc32fast::hash(&buf[4..]);
        buf[0..4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode a node from its region bytes (`at` is only used in errors)
    pub fn decode(buf: &[u8], at: u64) -> Result<Self> {
        if buf.len() < NODE_HEADER_SIZE {
            return Err(ArborError::corruption(at, "index node truncated"));
        }
        let flags = buf[4];
        let label_len = le_u16(buf, 6) as usize;
        let child_count = le_u16(buf, 8) as usize;
        let has_value = flags & FLAG_HAS_VALUE != 0;

        let size = NODE_HEADER_SIZE
            + if has_value { SLOT_SIZE } else { 0 }
            + label_len
            + child_count * CHILD_SIZE;
        if size > buf.len() {
            return Err(ArborError::corruption(at, "index node length out of bounds"));
        }
        if crc32fast::hash(&buf[4..size]) != le_u32(buf, 0) {
            return Err(ArborError::corruption(at, "index node checksum mismatch"));
        }

        let mut pos = NODE_HEADER_SIZE;
        let slot = if has_value {
            let vref = ValueRef {
                offset: le_u64(buf, pos),
                len: le_u32(buf, pos + 8),
                version: le_u64(buf, pos + 12),
            };
            pos += SLOT_SIZE;
            Some(Slot {
                vref,
                live: flags & FLAG_LIVE != 0,
            })
        } else {
            None
        };

        let label = buf[pos..pos + label_len].to_vec();
        pos += label_len;

        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            children.push((buf[pos], NodePtr::from_raw(le_u64(buf, pos + 1))));
            pos += CHILD_SIZE;
        }

        Ok(Self {
            label,
            slot,
            children,
        })
    }

    /// Read the node `ptr` points at
    pub fn read(file: &ArenaFile, ptr: NodePtr) -> Result<Self> {
        if ptr.is_null() {
            return Err(ArborError::corruption(0, "null index node pointer"));
        }
        let region = ptr.region();
        let mut buf = vec![0u8; region.len as usize];
        file.read_at(region.offset, &mut buf)?;
        Self::decode(&buf, region.offset)
    }
}
