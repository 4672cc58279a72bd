//! Value Log Module
//!
//! Append-only storage for values, carved into segments allocated from the
//! data arena.
//!
//! ## Responsibilities
//! - Append `key + value` entries with a checksummed header
//! - Verify checksums on every read (`DataCorruption` on mismatch)
//! - Mark overwritten / deleted entries as tombstones (no compaction here)
//! - Track live and dead bytes per segment for the collector
//!
//! ## Layout
//! ```text
//! data.akv
//! ┌──────────────── segment (n blocks) ────────────────┐┌── segment ──┐
//! │ Header │ Entry │ Entry │ ... │ 0-terminator │ free ││ ...         │
//! └────────────────────────────────────────────────────┘└─────────────┘
//! ```
//! Offsets handed out by `append` only ever move forward inside a segment,
//! and live bytes are never overwritten in place.

mod entry;
mod segment;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

pub use entry::{
    encode_entry, entry_size, read_entry, read_value, EntryHeader, ValueRef, ENTRY_HEADER_SIZE,
    FLAGS_OFFSET, FLAG_TOMBSTONE,
};
pub use segment::{decode_header, encode_header, Segment, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC};

use crate::arena::{Arena, ArenaFile, Region};
use crate::error::{ArborError, Result};

/// One entry found while scanning a segment
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    pub offset: u64,
    pub header: EntryHeader,
    pub key: Bytes,
}

/// Writer-side value log state
#[derive(Debug)]
pub struct ValueLog {
    arena: Arena,
    /// Segments keyed by region offset
    segments: BTreeMap<u64, Segment>,
    /// Segment currently receiving appends
    active: Option<u64>,
    next_seq: u64,
}

impl ValueLog {
    /// Empty value log over a fresh data arena
    pub fn new(arena: Arena, next_seq: u64) -> Self {
        Self {
            arena,
            segments: BTreeMap::new(),
            active: None,
            next_seq: next_seq.max(1),
        }
    }

    /// Rebuild segment accounting from the data file.
    ///
    /// Scans block by block for valid segment headers below `high_water`,
    /// then walks each segment's entries to find how much of it is used.
    /// Live bytes start at zero; the caller adds them back with
    /// [`ValueLog::account_live`] while walking the index.
    pub fn rebuild(file: Arc<ArenaFile>, block: u64, high_water: u64, next_seq: u64) -> Result<Self> {
        let mut segments = BTreeMap::new();
        let mut max_seq = 0u64;
        let mut offset = 0u64;
        let limit = high_water.min(file.len());

        while offset + SEGMENT_HEADER_SIZE <= limit {
            let mut head = [0u8; SEGMENT_HEADER_SIZE as usize];
            file.read_at(offset, &mut head)?;

            match decode_header(&head) {
                Some((seq, capacity)) if capacity >= block && capacity % block == 0 && offset + capacity <= limit => {
                    let mut segment = Segment::new(seq, Region::new(offset, capacity));
                    segment.used = Self::scan_used(&file, &segment)?;
                    segment.dead_bytes = segment.used - SEGMENT_HEADER_SIZE;
                    max_seq = max_seq.max(seq);
                    segments.insert(offset, segment);
                    offset += capacity;
                }
                _ => offset += block,
            }
        }

        let used: Vec<Region> = segments.values().map(|s| s.region).collect();
        let arena = Arena::rebuild(file, block, high_water, used)?;

        tracing::debug!(
            segments = segments.len(),
            high_water,
            "rebuilt value log segment table"
        );

        Ok(Self {
            arena,
            segments,
            active: None,
            next_seq: next_seq.max(max_seq + 1),
        })
    }

    /// Count an entry as live during rebuild
    pub fn account_live(&mut self, offset: u64, size: u64) -> Result<()> {
        let segment = self
            .segment_for_mut(offset)
            .ok_or_else(|| ArborError::CorruptStore(format!("value ref {} outside any segment", offset)))?;
        segment.live_bytes += size;
        segment.dead_bytes = segment.dead_bytes.saturating_sub(size);
        Ok(())
    }

    /// Append an entry and return its reference
    pub fn append(&mut self, key: &[u8], value: &[u8], version: u64) -> Result<ValueRef> {
        if value.len() > u32::MAX as usize {
            return Err(ArborError::InvalidArgument(format!(
                "value of {} bytes exceeds the 4 GiB limit",
                value.len()
            )));
        }

        let mut buf = encode_entry(key, value, version);
        let size = buf.len() as u64;
        let segment_offset = self.segment_with_room(size)?;
        let file = Arc::clone(self.arena.file());

        let segment = self
            .segments
            .get_mut(&segment_offset)
            .ok_or_else(|| ArborError::CorruptStore("active segment missing".to_string()))?;

        // Zero the next header slot so scans stop after this entry
        if segment.remaining() >= size + ENTRY_HEADER_SIZE {
            buf.extend_from_slice(&[0u8; ENTRY_HEADER_SIZE as usize]);
        }

        let offset = segment.tail();
        file.write_at(offset, &buf)?;
        segment.used += size;
        segment.live_bytes += size;

        Ok(ValueRef {
            offset,
            len: value.len() as u32,
            version,
        })
    }

    /// Mark the entry at `vref` reclaimable; does not compact
    pub fn tombstone(&mut self, vref: ValueRef, key_len: usize) -> Result<()> {
        let size = vref.entry_size(key_len);
        let file = Arc::clone(self.arena.file());
        file.write_at(vref.offset + FLAGS_OFFSET, &[FLAG_TOMBSTONE])?;

        if let Some(segment) = self.segment_for_mut(vref.offset) {
            segment.live_bytes = segment.live_bytes.saturating_sub(size);
            segment.dead_bytes += size;
        }
        Ok(())
    }

    /// Entries written to a segment, in log order
    pub fn scan(&self, segment_offset: u64) -> Result<Vec<ScannedEntry>> {
        let segment = self
            .segments
            .get(&segment_offset)
            .ok_or_else(|| ArborError::InvalidArgument(format!("no segment at {}", segment_offset)))?;
        let file = self.arena.file();

        let mut entries = Vec::new();
        let mut pos = segment.region.offset + SEGMENT_HEADER_SIZE;
        let end = segment.region.offset + segment.used;
        while pos + ENTRY_HEADER_SIZE <= end {
            let (header, key, _value) = read_entry(file, pos, end)?;
            entries.push(ScannedEntry {
                offset: pos,
                header,
                key,
            });
            pos += header.size();
        }
        Ok(entries)
    }

    /// Stop appending to the active segment
    pub fn seal_active(&mut self) {
        if let Some(offset) = self.active.take() {
            tracing::trace!(segment = offset, "sealed value log segment");
        }
    }

    /// Detach a segment from the table; its region is returned to the
    /// arena later with [`ValueLog::release`]
    pub fn retire(&mut self, segment_offset: u64) -> Option<Segment> {
        if self.active == Some(segment_offset) {
            self.active = None;
        }
        self.segments.remove(&segment_offset)
    }

    /// Invalidate a retired segment's header and free its region
    pub fn release(&mut self, region: Region) -> Result<()> {
        self.arena
            .file()
            .write_at(region.offset, &[0u8; SEGMENT_HEADER_SIZE as usize])?;
        self.arena.free(region)
    }

    /// Segments oldest first, as `(offset, segment)`
    pub fn segments_by_age(&self) -> Vec<(u64, Segment)> {
        let mut list: Vec<(u64, Segment)> = self
            .segments
            .iter()
            .map(|(&offset, segment)| (offset, segment.clone()))
            .collect();
        list.sort_by_key(|(_, segment)| segment.seq);
        list
    }

    pub fn segment(&self, offset: u64) -> Option<&Segment> {
        self.segments.get(&offset)
    }

    pub fn segment_for(&self, offset: u64) -> Option<&Segment> {
        self.segments
            .range(..=offset)
            .next_back()
            .map(|(_, segment)| segment)
            .filter(|segment| segment.contains(offset))
    }

    pub fn active_segment(&self) -> Option<u64> {
        self.active
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Dead bytes across all segments
    pub fn dead_bytes(&self) -> u64 {
        self.segments.values().map(|s| s.dead_bytes).sum()
    }

    pub fn live_bytes(&self) -> u64 {
        self.segments.values().map(|s| s.live_bytes).sum()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn file(&self) -> &Arc<ArenaFile> {
        self.arena.file()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn segment_for_mut(&mut self, offset: u64) -> Option<&mut Segment> {
        self.segments
            .range_mut(..=offset)
            .next_back()
            .map(|(_, segment)| segment)
            .filter(|segment| segment.contains(offset))
    }

    /// Offset of a segment that can take `size` more bytes, opening one if
    /// needed. Oversized entries get a dedicated multi-block segment.
    fn segment_with_room(&mut self, size: u64) -> Result<u64> {
        if let Some(active) = self.active {
            if let Some(segment) = self.segments.get(&active) {
                if segment.remaining() >= size {
                    return Ok(active);
                }
            }
        }

        let block = self.arena.granule();
        let needed = SEGMENT_HEADER_SIZE + size;
        let capacity = ((needed + block - 1) / block) * block;
        let region = self.arena.allocate(capacity)?;
        let file = Arc::clone(self.arena.file());

        // Interior blocks of a multi-block segment must not look like
        // segment headers to a rebuild scan
        let mut interior = region.offset + block;
        while interior < region.end() {
            file.write_at(interior, &[0u8; SEGMENT_HEADER_SIZE as usize])?;
            interior += block;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let mut head = encode_header(seq, region.len).to_vec();
        head.extend_from_slice(&[0u8; ENTRY_HEADER_SIZE as usize]);
        file.write_at(region.offset, &head)?;

        self.segments.insert(region.offset, Segment::new(seq, region));
        // A multi-block segment holds a single oversized entry and never
        // becomes the append target
        if capacity == block {
            self.active = Some(region.offset);
        }

        tracing::trace!(segment = region.offset, seq, capacity, "opened value log segment");
        Ok(region.offset)
    }

    /// Bytes used by a segment on disk, found by walking its entries
    fn scan_used(file: &ArenaFile, segment: &Segment) -> Result<u64> {
        let start = segment.region.offset;
        let end = segment.region.end();
        let mut pos = start + SEGMENT_HEADER_SIZE;

        while pos + ENTRY_HEADER_SIZE <= end {
            let mut head = [0u8; ENTRY_HEADER_SIZE as usize];
            file.read_at(pos, &mut head)?;
            let header = EntryHeader::parse(&head);
            if header.is_terminator() || pos + header.size() > end {
                break;
            }
            // A torn append at crash time ends the readable part
            if read_entry(file, pos, end).is_err() {
                break;
            }
            pos += header.size();
        }
        Ok(pos - start)
    }
}
