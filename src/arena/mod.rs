//! Storage Arena Module
//!
//! Allocates fixed-granule regions inside a growable backing file.
//!
//! ## Responsibilities
//! - Hand out regions of at least the requested size
//! - Reuse freed regions (best fit) before growing the file
//! - Grow the file in configured increments, never byte by byte
//! - Rebuild the free list from the set of regions still in use
//!
//! ## Layout
//! ```text
//! granule 0        granule n                       high water      file len
//! ┌────────┬───────┬────────┬───────────────────────┬──────────────┐
//! │ in use │ free  │ in use │ ...                   │ grown, unused│
//! └────────┴───────┴────────┴───────────────────────┴──────────────┘
//! ```
//!
//! Callers must only free a region once no reader can still reference it;
//! the garbage collector enforces that with reader epochs.

mod extent;
mod file;

use std::sync::Arc;

pub use extent::{Extent, ExtentMap};
pub use file::{ArenaFile, ArenaKind};

use crate::error::{ArborError, Result};

/// A contiguous allocated span, in bytes, aligned to the arena granule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region {
    pub offset: u64,
    pub len: u64,
}

impl Region {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// Region id: index of the first granule
    pub fn id(&self, granule: u64) -> u64 {
        self.offset / granule
    }
}

/// Allocator state for one arena (owned by the writer)
#[derive(Debug)]
pub struct Arena {
    file: Arc<ArenaFile>,
    granule: u64,
    free: ExtentMap,
    /// First granule never handed out
    high_water: u64,
}

impl Arena {
    /// Fresh arena with nothing allocated
    pub fn new(file: Arc<ArenaFile>, granule: u64) -> Self {
        Self {
            file,
            granule,
            free: ExtentMap::new(),
            high_water: 0,
        }
    }

    /// Rebuild allocator state from the regions still referenced.
    ///
    /// Every granule below `high_water` not covered by `used` becomes free.
    pub fn rebuild(
        file: Arc<ArenaFile>,
        granule: u64,
        high_water_bytes: u64,
        mut used: Vec<Region>,
    ) -> Result<Self> {
        let high_water = high_water_bytes / granule;
        used.sort_unstable();

        let mut free = ExtentMap::new();
        let mut cursor = 0u64;
        for region in &used {
            let start = region.offset / granule;
            let end = (region.end() + granule - 1) / granule;
            if start < cursor || end > high_water {
                return Err(ArborError::CorruptStore(format!(
                    "{} arena region {:?} overlaps or exceeds high water {}",
                    file.kind().name(),
                    region,
                    high_water_bytes
                )));
            }
            if start > cursor {
                free.insert(Extent::new(cursor, start - cursor));
            }
            cursor = end;
        }

        let mut arena = Self {
            file,
            granule,
            free,
            high_water: cursor.max(high_water),
        };
        if cursor < high_water {
            arena.free.insert(Extent::new(cursor, high_water - cursor));
        }
        arena.trim_tail();
        Ok(arena)
    }

    /// Allocate a region of at least `size` bytes
    pub fn allocate(&mut self, size: u64) -> Result<Region> {
        let granules = self.granules_for(size);

        if let Some(start) = self.free.take_best_fit(granules) {
            return Ok(self.region(start, granules));
        }

        let start = self.high_water;
        let end = start + granules;
        self.file.ensure_len(end * self.granule)?;
        self.high_water = end;
        Ok(self.region(start, granules))
    }

    /// Return a region to the free list
    pub fn free(&mut self, region: Region) -> Result<()> {
        let start = region.offset / self.granule;
        let granules = self.granules_for(region.len);
        if region.offset % self.granule != 0 || start + granules > self.high_water {
            return Err(ArborError::InvalidArgument(format!(
                "{} region {:?} is not an allocated region",
                self.file.kind().name(),
                region
            )));
        }
        if !self.free.insert(Extent::new(start, granules)) {
            return Err(ArborError::InvalidArgument(format!(
                "{} region {:?} freed twice",
                self.file.kind().name(),
                region
            )));
        }
        self.trim_tail();
        Ok(())
    }

    pub fn granule(&self) -> u64 {
        self.granule
    }

    pub fn file(&self) -> &Arc<ArenaFile> {
        &self.file
    }

    /// Bytes below the high-water mark
    pub fn high_water_bytes(&self) -> u64 {
        self.high_water * self.granule
    }

    /// Free bytes below the high-water mark
    pub fn free_bytes(&self) -> u64 {
        self.free.free_granules() * self.granule
    }

    /// Bytes currently handed out
    pub fn used_bytes(&self) -> u64 {
        self.high_water_bytes() - self.free_bytes()
    }

    /// Free extents, for diagnostics and tests
    pub fn free_extents(&self) -> Vec<Extent> {
        self.free.iter().collect()
    }

    fn granules_for(&self, size: u64) -> u64 {
        ((size + self.granule - 1) / self.granule).max(1)
    }

    fn region(&self, start: u64, granules: u64) -> Region {
        Region::new(start * self.granule, granules * self.granule)
    }

    /// Give trailing free space back to the bump pointer
    fn trim_tail(&mut self) {
        while let Some(extent) = self.free.pop_tail(self.high_water) {
            self.high_water = extent.start;
        }
    }
}
