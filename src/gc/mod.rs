//! Garbage Collection Module
//!
//! Reclaims space left behind by overwrites and deletes while the store
//! stays open for reads.
//!
//! ## Pass Outline
//! ```text
//! plan      pick candidates oldest-first until max_reclaim_size
//!   │       (deferred regions + deleted index slots count as one unit)
//!   ▼
//! compact   per segment: relocate live entries to the log tail,
//!   │       drop deleted slots, publish, retire the segment
//!   ▼
//! prune     drop remaining deleted slots, merge chains, publish
//!   ▼
//! release   free retired regions older than the oldest reader, never
//!           more than max_reclaim_size bytes
//! ```
//! The writer mutex is held per segment and per step, never for the whole
//! pass, so a pass can be interrupted between segments and resumed by the
//! next call.

mod background;
mod collector;

pub(crate) use background::BackgroundCollector;
pub(crate) use collector::collect;

/// Summary of one collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Bytes returned to the arena free lists
    pub reclaimed_bytes: u64,
    pub segments_compacted: usize,
    pub entries_relocated: u64,
    /// Deleted index slots removed
    pub entries_pruned: u64,
    pub index_bytes_released: u64,
    pub data_bytes_released: u64,
    /// Retired regions left pending, held back by active readers or by
    /// the pass maximum
    pub deferred_regions: usize,
}
