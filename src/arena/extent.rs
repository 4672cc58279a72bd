//! Free extent tracking
//!
//! Free space is kept as a map of contiguous granule ranges keyed by start.
//! Allocation is best-fit; frees coalesce with both neighbours.

use std::collections::BTreeMap;

/// A contiguous run of free granules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// First granule
    pub start: u64,
    /// Number of granules
    pub length: u64,
}

impl Extent {
    pub fn new(start: u64, length: u64) -> Self {
        Extent { start, length }
    }

    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    /// True if the two extents share at least one granule
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Free list for one arena, in granules
#[derive(Debug, Default, Clone)]
pub struct ExtentMap {
    free: BTreeMap<u64, u64>,
    free_granules: u64,
}

impl ExtentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total free granules
    pub fn free_granules(&self) -> u64 {
        self.free_granules
    }

    /// Number of disjoint free extents
    pub fn extent_count(&self) -> usize {
        self.free.len()
    }

    /// Iterate free extents in address order
    pub fn iter(&self) -> impl Iterator<Item = Extent> + '_ {
        self.free.iter().map(|(&start, &length)| Extent::new(start, length))
    }

    /// Take `length` granules from the smallest extent that fits.
    ///
    /// Allocates from the front of the chosen extent and keeps the
    /// remainder free.
    pub fn take_best_fit(&mut self, length: u64) -> Option<u64> {
        let (start, extent_len) = self
            .free
            .iter()
            .filter(|(_, &len)| len >= length)
            .min_by_key(|(&start, &len)| (len, start))
            .map(|(&s, &l)| (s, l))?;

        self.free.remove(&start);
        if extent_len > length {
            self.free.insert(start + length, extent_len - length);
        }
        self.free_granules -= length;
        Some(start)
    }

    /// Return an extent to the free list, merging with adjacent extents.
    ///
    /// Returns `false` (and changes nothing) if any granule is already free.
    pub fn insert(&mut self, extent: Extent) -> bool {
        if extent.length == 0 {
            return true;
        }

        let prev = self
            .free
            .range(..=extent.start)
            .next_back()
            .map(|(&s, &l)| Extent::new(s, l));
        let next = self
            .free
            .range(extent.start..)
            .next()
            .map(|(&s, &l)| Extent::new(s, l));

        if prev.map_or(false, |p| p.overlaps(&extent)) || next.map_or(false, |n| n.overlaps(&extent)) {
            return false;
        }

        let mut merged = extent;
        if let Some(p) = prev {
            if p.end() == merged.start {
                self.free.remove(&p.start);
                merged = Extent::new(p.start, p.length + merged.length);
            }
        }
        if let Some(n) = next {
            if merged.end() == n.start {
                self.free.remove(&n.start);
                merged.length += n.length;
            }
        }

        self.free.insert(merged.start, merged.length);
        self.free_granules += extent.length;
        true
    }

    /// Remove and return the extent ending exactly at `end`, if any.
    ///
    /// Used to give trailing free space back to the bump pointer.
    pub fn pop_tail(&mut self, end: u64) -> Option<Extent> {
        let (&start, &length) = self.free.range(..end).next_back()?;
        if start + length != end {
            return None;
        }
        self.free.remove(&start);
        self.free_granules -= length;
        Some(Extent::new(start, length))
    }
}
