//! Tests for the storage arena
//!
//! These tests verify:
//! - Allocation rounds up to whole granules
//! - The backing file grows by whole increments
//! - Freed regions are reused best-fit before growing
//! - Double frees and exhaustion are reported
//! - Free lists can be rebuilt from the regions in use

use std::sync::Arc;

use arborkv::arena::{Arena, ArenaFile, ArenaKind, Region};
use arborkv::ArborError;
use tempfile::TempDir;

const GRANULE: u64 = 4096;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_arena(kind: ArenaKind, growth: u64, max_size: u64) -> (TempDir, Arena) {
    let temp_dir = TempDir::new().unwrap();
    let file = ArenaFile::open(&temp_dir.path().join("arena.akv"), kind, growth, max_size, true).unwrap();
    (temp_dir, Arena::new(Arc::new(file), GRANULE))
}

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_allocate_rounds_to_granules() {
    let (_temp, mut arena) = setup_arena(ArenaKind::Data, 8192, 1 << 20);

    let first = arena.allocate(100).unwrap();
    assert_eq!(first, Region::new(0, GRANULE));

    let second = arena.allocate(5000).unwrap();
    assert_eq!(second, Region::new(GRANULE, 2 * GRANULE));
    assert_eq!(arena.used_bytes(), 3 * GRANULE);
}

#[test]
fn test_file_grows_by_increments() {
    let (_temp, mut arena) = setup_arena(ArenaKind::Data, 8192, 1 << 20);

    arena.allocate(GRANULE).unwrap();
    assert_eq!(arena.file().len(), 8192);

    arena.allocate(GRANULE).unwrap();
    assert_eq!(arena.file().len(), 8192);

    arena.allocate(GRANULE).unwrap();
    assert_eq!(arena.file().len(), 16384);
}

#[test]
fn test_freed_region_is_reused() {
    let (_temp, mut arena) = setup_arena(ArenaKind::Data, 8192, 1 << 20);

    let a = arena.allocate(GRANULE).unwrap();
    let _b = arena.allocate(GRANULE).unwrap();
    arena.free(a).unwrap();
    assert_eq!(arena.free_bytes(), GRANULE);

    let c = arena.allocate(GRANULE).unwrap();
    assert_eq!(c.offset, a.offset);
    assert_eq!(arena.free_bytes(), 0);
}

#[test]
fn test_best_fit_reuse() {
    let (_temp, mut arena) = setup_arena(ArenaKind::Data, 1 << 16, 1 << 20);

    let _a = arena.allocate(GRANULE).unwrap();
    let b = arena.allocate(3 * GRANULE).unwrap();
    let _c = arena.allocate(GRANULE).unwrap();
    let d = arena.allocate(2 * GRANULE).unwrap();
    let _e = arena.allocate(GRANULE).unwrap();

    arena.free(b).unwrap();
    arena.free(d).unwrap();

    // The two-granule hole is the tightest fit
    let reused = arena.allocate(2 * GRANULE).unwrap();
    assert_eq!(reused.offset, d.offset);
}

#[test]
fn test_adjacent_frees_coalesce() {
    let (_temp, mut arena) = setup_arena(ArenaKind::Data, 1 << 16, 1 << 20);

    let a = arena.allocate(GRANULE).unwrap();
    let b = arena.allocate(GRANULE).unwrap();
    let _guard = arena.allocate(GRANULE).unwrap();

    arena.free(a).unwrap();
    arena.free(b).unwrap();
    assert_eq!(arena.free_extents().len(), 1);

    let joined = arena.allocate(2 * GRANULE).unwrap();
    assert_eq!(joined.offset, 0);
}

#[test]
fn test_freeing_tail_lowers_high_water() {
    let (_temp, mut arena) = setup_arena(ArenaKind::Data, 1 << 16, 1 << 20);

    let _a = arena.allocate(GRANULE).unwrap();
    let b = arena.allocate(2 * GRANULE).unwrap();
    assert_eq!(arena.high_water_bytes(), 3 * GRANULE);

    arena.free(b).unwrap();
    assert_eq!(arena.high_water_bytes(), GRANULE);
    assert_eq!(arena.free_bytes(), 0);
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_double_free_rejected() {
    let (_temp, mut arena) = setup_arena(ArenaKind::Data, 1 << 16, 1 << 20);

    let a = arena.allocate(GRANULE).unwrap();
    let _b = arena.allocate(GRANULE).unwrap();
    arena.free(a).unwrap();

    assert!(matches!(arena.free(a), Err(ArborError::InvalidArgument(_))));
}

#[test]
fn test_data_arena_exhaustion() {
    let (_temp, mut arena) = setup_arena(ArenaKind::Data, 8192, 16384);

    for _ in 0..4 {
        arena.allocate(GRANULE).unwrap();
    }
    assert!(matches!(
        arena.allocate(GRANULE),
        Err(ArborError::ArenaExhausted { arena: "data", .. })
    ));
}

#[test]
fn test_index_arena_exhaustion_is_index_full() {
    let (_temp, mut arena) = setup_arena(ArenaKind::Index, 8192, 8192);

    arena.allocate(2 * GRANULE).unwrap();
    assert!(matches!(arena.allocate(GRANULE), Err(ArborError::IndexFull)));
}

// =============================================================================
// Rebuild Tests
// =============================================================================

#[test]
fn test_rebuild_from_used_regions() {
    let (_temp, arena) = setup_arena(ArenaKind::Data, 1 << 16, 1 << 20);
    let file = Arc::clone(arena.file());
    file.ensure_len(5 * GRANULE).unwrap();

    let used = vec![Region::new(2 * GRANULE, GRANULE), Region::new(0, GRANULE)];
    let mut rebuilt = Arena::rebuild(file, GRANULE, 5 * GRANULE, used).unwrap();

    // Granule 1 is a hole, granules 3..5 were trailing and trimmed
    assert_eq!(rebuilt.high_water_bytes(), 3 * GRANULE);
    assert_eq!(rebuilt.free_bytes(), GRANULE);
    assert_eq!(rebuilt.allocate(GRANULE).unwrap().offset, GRANULE);
}

#[test]
fn test_rebuild_rejects_overlap() {
    let (_temp, arena) = setup_arena(ArenaKind::Index, 1 << 16, 1 << 20);
    let file = Arc::clone(arena.file());

    let used = vec![Region::new(0, 2 * GRANULE), Region::new(GRANULE, GRANULE)];
    assert!(matches!(
        Arena::rebuild(file, GRANULE, 4 * GRANULE, used),
        Err(ArborError::CorruptStore(_))
    ));
}
