//! Tests for epoch-based reclamation
//!
//! These tests verify:
//! - Pinning records the current epoch and releases on drop
//! - The oldest pinned epoch holds back retired regions
//! - Concurrent readers never lose their slot

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use arborkv::arena::{ArenaKind, Region};
use arborkv::epoch::{EpochManager, PendingFrees};

// =============================================================================
// Pinning Tests
// =============================================================================

#[test]
fn test_pin_tracks_current_epoch() {
    let epochs = Arc::new(EpochManager::new(8, 10));
    assert_eq!(epochs.current(), 10);

    let first = epochs.pin();
    assert_eq!(first.epoch(), 10);

    assert_eq!(epochs.advance(), 10);
    assert_eq!(epochs.advance(), 11);
    let second = epochs.pin();
    assert_eq!(second.epoch(), 12);

    assert_eq!(epochs.active_readers(), 2);
    assert_eq!(epochs.oldest_active(), Some(10));
}

#[test]
fn test_guard_drop_releases_slot() {
    let epochs = Arc::new(EpochManager::new(2, 0));
    {
        let _a = epochs.pin();
        let _b = epochs.pin();
        assert!(epochs.try_pin().is_none());
    }
    assert_eq!(epochs.active_readers(), 0);
    assert!(epochs.try_pin().is_some());
}

#[test]
fn test_zero_capacity_still_has_one_slot() {
    let epochs = Arc::new(EpochManager::new(0, 0));
    assert_eq!(epochs.capacity(), 1);
    let _guard = epochs.pin();
    assert!(epochs.try_pin().is_none());
}

// =============================================================================
// Pending Free Tests
// =============================================================================

#[test]
fn test_pending_frees_wait_for_reader() {
    let epochs = Arc::new(EpochManager::new(4, 1));
    let mut pending = PendingFrees::new();

    let reader = epochs.pin();
    let retire_epoch = epochs.advance();
    pending.record(retire_epoch, ArenaKind::Index, [Region::new(0, 64), Region::new(64, 128)]);
    assert_eq!(pending.len(), 2);
    assert_eq!(pending.bytes(ArenaKind::Index), 192);
    assert_eq!(pending.bytes(ArenaKind::Data), 0);

    // The reader pinned before the advance may still reach both regions
    assert!(pending.drain_freeable(epochs.oldest_active()).is_empty());

    drop(reader);
    let freed = pending.drain_freeable(epochs.oldest_active());
    assert_eq!(freed.len(), 2);
    assert!(pending.is_empty());
}

#[test]
fn test_reader_after_advance_does_not_block() {
    let epochs = Arc::new(EpochManager::new(4, 1));
    let mut pending = PendingFrees::new();

    let retire_epoch = epochs.advance();
    pending.record(retire_epoch, ArenaKind::Data, [Region::new(4096, 4096)]);

    let _late_reader = epochs.pin();
    let freed = pending.drain_freeable(epochs.oldest_active());
    assert_eq!(freed.len(), 1);
    assert_eq!(freed[0].region, Region::new(4096, 4096));
}

#[test]
fn test_drain_keeps_newer_epochs() {
    let mut pending = PendingFrees::new();
    for epoch in 1..=5u64 {
        pending.record(epoch, ArenaKind::Index, [Region::new(epoch * 64, 64)]);
    }
    pending.record(6, ArenaKind::Index, std::iter::empty());

    let freed = pending.drain_freeable(Some(3));
    let offsets: Vec<u64> = freed.iter().map(|r| r.region.offset).collect();
    assert_eq!(offsets, vec![64, 128]);
    assert_eq!(pending.len(), 3);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_pins() {
    let epochs = Arc::new(EpochManager::new(16, 0));
    let stop = Arc::new(AtomicBool::new(false));

    let advancer = {
        let epochs = Arc::clone(&epochs);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                epochs.advance();
                thread::yield_now();
            }
        })
    };

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let epochs = Arc::clone(&epochs);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    let guard = epochs.pin();
                    // A pinned epoch never runs ahead of the global one
                    assert!(guard.epoch() <= epochs.current());
                    assert!(epochs.oldest_active().unwrap() <= guard.epoch());
                }
            })
        })
        .collect();

    for reader in readers {
        reader.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    advancer.join().unwrap();

    assert_eq!(epochs.active_readers(), 0);
}
