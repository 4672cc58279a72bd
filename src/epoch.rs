//! Epoch-based reclamation
//!
//! Readers pin the current epoch in a slot of a fixed registry before they
//! load the published root, and clear it when done. The writer publishes a
//! new root first and advances the global epoch second, retiring replaced
//! regions with the epoch that was current before the advance.
//!
//! A region retired at epoch `e` may be freed once every pinned slot holds
//! an epoch greater than `e`: any reader that could still reach the region
//! pinned at or before `e`.
//!
//! ```text
//! global: 7        slots: [ 5 | - | 7 | - | ... ]
//!                           ^ oldest active reader = 5
//! pending: { 4: [r1, r2], 5: [r3], 6: [r4] }   →  r1, r2 freeable
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

use crate::arena::{ArenaKind, Region};

const EMPTY: u64 = u64::MAX;

/// Global epoch counter plus the per-reader registry
#[derive(Debug)]
pub struct EpochManager {
    global: AtomicU64,
    slots: Box<[CachePadded<AtomicU64>]>,
}

impl EpochManager {
    pub fn new(max_readers: usize, start: u64) -> Self {
        let slots = (0..max_readers.max(1))
            .map(|_| CachePadded::new(AtomicU64::new(EMPTY)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            global: AtomicU64::new(start),
            slots,
        }
    }

    pub fn current(&self) -> u64 {
        self.global.load(Ordering::SeqCst)
    }

    /// Advance the global epoch; returns the epoch replaced regions retire at
    pub fn advance(&self) -> u64 {
        self.global.fetch_add(1, Ordering::SeqCst)
    }

    /// Pin the current epoch, spinning while every slot is taken
    pub fn pin(self: &Arc<Self>) -> ReaderGuard {
        loop {
            if let Some(guard) = self.try_pin() {
                return guard;
            }
            std::thread::yield_now();
        }
    }

    /// Pin the current epoch; `None` if the registry is full
    pub fn try_pin(self: &Arc<Self>) -> Option<ReaderGuard> {
        let mut epoch = self.current();
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .compare_exchange(EMPTY, epoch, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            // The writer may have advanced between the load and the store
            loop {
                let now = self.current();
                if now == epoch {
                    break;
                }
                epoch = now;
                slot.store(epoch, Ordering::SeqCst);
            }

            return Some(ReaderGuard {
                manager: Arc::clone(self),
                slot: index,
                epoch,
            });
        }
        None
    }

    /// Oldest epoch still pinned by a reader
    pub fn oldest_active(&self) -> Option<u64> {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .filter(|&epoch| epoch != EMPTY)
            .min()
    }

    pub fn active_readers(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed) != EMPTY)
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// A pinned reader epoch; released on drop
#[derive(Debug)]
pub struct ReaderGuard {
    manager: Arc<EpochManager>,
    slot: usize,
    epoch: u64,
}

impl ReaderGuard {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.manager.slots[self.slot].store(EMPTY, Ordering::SeqCst);
    }
}

/// A region waiting for readers to move past its retire epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retired {
    pub kind: ArenaKind,
    pub region: Region,
}

/// Regions retired by published mutations, keyed by retire epoch
#[derive(Debug, Default)]
pub struct PendingFrees {
    by_epoch: BTreeMap<u64, Vec<Retired>>,
}

impl PendingFrees {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record regions that became unreachable at `epoch`
    pub fn record(&mut self, epoch: u64, kind: ArenaKind, regions: impl IntoIterator<Item = Region>) {
        let mut regions = regions
            .into_iter()
            .map(|region| Retired { kind, region })
            .peekable();
        if regions.peek().is_some() {
            self.by_epoch.entry(epoch).or_default().extend(regions);
        }
    }

    /// Remove and return every region retired before `oldest_reader`.
    /// With no active reader everything is freeable.
    pub fn drain_freeable(&mut self, oldest_reader: Option<u64>) -> Vec<Retired> {
        let cutoff = oldest_reader.unwrap_or(EMPTY);
        let keep = self.by_epoch.split_off(&cutoff);
        let freeable = std::mem::replace(&mut self.by_epoch, keep);
        freeable.into_values().flatten().collect()
    }

    /// Like [`PendingFrees::drain_freeable`], but hands out at most `budget`
    /// bytes, oldest retire epoch first. Regions that do not fit stay pending.
    pub fn drain_within(&mut self, oldest_reader: Option<u64>, budget: u64) -> Vec<Retired> {
        let cutoff = oldest_reader.unwrap_or(EMPTY);
        let mut taken = Vec::new();
        let mut total = 0u64;
        for regions in self.by_epoch.range_mut(..cutoff).map(|(_, regions)| regions) {
            regions.retain(|retired| {
                let len = retired.region.len;
                if total.saturating_add(len) > budget {
                    return true;
                }
                total += len;
                taken.push(*retired);
                false
            });
        }
        self.by_epoch.retain(|_, regions| !regions.is_empty());
        taken
    }

    /// Bytes `drain_within` would hand out with no reader pinned
    pub fn bytes_within(&self, budget: u64) -> u64 {
        let mut total = 0u64;
        for retired in self.by_epoch.values().flatten() {
            if total.saturating_add(retired.region.len) <= budget {
                total += retired.region.len;
            }
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.by_epoch.is_empty()
    }

    /// Number of regions still pending
    pub fn len(&self) -> usize {
        self.by_epoch.values().map(Vec::len).sum()
    }

    /// Bytes pending in one arena
    pub fn bytes(&self, kind: ArenaKind) -> u64 {
        self.by_epoch
            .values()
            .flatten()
            .filter(|retired| retired.kind == kind)
            .map(|retired| retired.region.len)
            .sum()
    }
}
