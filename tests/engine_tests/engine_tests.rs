//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations
//! - Prefix lookups and ordered iteration
//! - Persistence across reopen and the exclusive writer lock
//! - Reader-mode handles
//! - Concurrent access patterns
//! - Engine lifecycle (open/close)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arborkv::config::{BackgroundGcConfig, Config, SyncStrategy};
use arborkv::engine::Engine;
use arborkv::{ArborError, GcError};
use bytes::Bytes;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(path: &std::path::Path) -> Config {
    Config::builder()
        .data_dir(path)
        .sync_strategy(SyncStrategy::EveryWrite) // Sync every write for test reliability
        .value_block_size(64 * 1024)
        .data_growth(256 * 1024)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(temp_dir.path())).unwrap();
    (temp_dir, engine)
}

fn reader_for(path: &std::path::Path) -> Engine {
    let config = Config::builder().data_dir(path).writer_mode(false).build();
    Engine::open(config).unwrap()
}

fn collect_pairs(iter: arborkv::EngineIter) -> Vec<(Bytes, Bytes)> {
    iter.map(|entry| entry.unwrap()).collect()
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_open_creates_store_files() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let _engine = Engine::open(config_for(&data_dir)).unwrap();

    assert!(data_dir.join("meta.akv").exists());
    assert!(data_dir.join("index.akv").exists());
    assert!(data_dir.join("data.akv").exists());
    assert!(data_dir.join(".writer.lock").exists());
}

#[test]
fn test_engine_open_missing_without_create() {
    let temp_dir = TempDir::new().unwrap();

    let config = Config::builder()
        .data_dir(temp_dir.path().join("absent"))
        .create_if_missing(false)
        .build();
    assert!(matches!(Engine::open(config), Err(ArborError::StoreUnavailable(_))));

    // Directory exists but holds no store
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .create_if_missing(false)
        .build();
    assert!(matches!(Engine::open(config), Err(ArborError::StoreUnavailable(_))));
}

#[test]
fn test_engine_second_writer_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let first = Engine::open(config_for(temp_dir.path())).unwrap();

    let second = Engine::open(config_for(temp_dir.path()));
    assert!(matches!(second, Err(ArborError::StoreUnavailable(_))));

    first.close().unwrap();
    let third = Engine::open(config_for(temp_dir.path())).unwrap();
    assert!(third.is_writer());
}

#[test]
fn test_engine_close_is_idempotent() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"key", b"value").unwrap();

    engine.close().unwrap();
    engine.close().unwrap();
    assert!(!engine.is_open());
    assert!(matches!(engine.put(b"key", b"other"), Err(ArborError::StoreUnavailable(_))));
    assert!(matches!(engine.iter(), Err(ArborError::StoreUnavailable(_))));
}

#[test]
fn test_engine_corrupt_metadata() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(temp_dir.path())).unwrap();
        engine.put(b"key", b"value").unwrap();
    }

    std::fs::write(temp_dir.path().join("meta.akv"), vec![0xEEu8; 512]).unwrap();
    assert!(matches!(
        Engine::open(config_for(temp_dir.path())),
        Err(ArborError::CorruptStore(_))
    ));
}

#[test]
fn test_engine_open_path_convenience() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open_path(temp_dir.path()).unwrap();

    engine.put(b"key", b"value").unwrap();
    assert_eq!(engine.data_dir(), temp_dir.path());
    assert_eq!(engine.config().value_block_size, 4 * 1024 * 1024);
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_put_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"hello", b"world").unwrap();
    let result = engine.get(b"hello").unwrap();

    assert_eq!(result, Some(Bytes::from_static(b"world")));
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"hello", b"world").unwrap();

    assert_eq!(engine.get(b"nonexistent").unwrap(), None);
    assert_eq!(engine.get(b"hell").unwrap(), None);
    assert_eq!(engine.get(b"hello!").unwrap(), None);
}

#[test]
fn test_engine_put_overwrite() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"value1").unwrap();
    engine.put(b"key", b"a much longer second value").unwrap();

    assert_eq!(
        engine.get(b"key").unwrap(),
        Some(Bytes::from_static(b"a much longer second value"))
    );
    assert_eq!(engine.count().unwrap(), 1);
    assert!(engine.stats().unwrap().dead_value_bytes > 0);
}

#[test]
fn test_engine_delete() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"value").unwrap();
    engine.delete(b"key").unwrap();

    assert_eq!(engine.get(b"key").unwrap(), None);
    assert_eq!(engine.count().unwrap(), 0);
    assert_eq!(engine.stats().unwrap().dead_entries, 1);

    // Deleted keys can come back
    engine.put(b"key", b"again").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(Bytes::from_static(b"again")));
    assert_eq!(engine.count().unwrap(), 1);
    assert_eq!(engine.stats().unwrap().dead_entries, 0);
}

#[test]
fn test_engine_delete_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    assert!(matches!(engine.delete(b"nonexistent"), Err(ArborError::NotFound)));
}

#[test]
fn test_engine_versions_increase() {
    let (_temp, engine) = setup_temp_engine();

    let start = engine.snapshot().version;
    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.put(b"a", b"3").unwrap();
    assert_eq!(engine.snapshot().version, start + 3);

    // Deletes do not consume a version
    engine.delete(b"b").unwrap();
    assert_eq!(engine.snapshot().version, start + 3);
}

#[test]
fn test_engine_invalid_keys() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).max_key_len(8).build();
    let engine = Engine::open(config).unwrap();

    assert!(matches!(engine.put(b"", b"v"), Err(ArborError::InvalidKey(_))));
    assert!(matches!(engine.put(b"123456789", b"v"), Err(ArborError::InvalidKey(_))));
    assert!(matches!(engine.delete(b""), Err(ArborError::InvalidKey(_))));
    engine.put(b"12345678", b"v").unwrap();
}

// =============================================================================
// Prefix and Iteration Tests
// =============================================================================

#[test]
fn test_engine_find_longest_prefix() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"/api", b"root").unwrap();
    engine.put(b"/api/users", b"users").unwrap();
    engine.put(b"/api/users/admin", b"admin").unwrap();

    let (prefix, value) = engine.find_longest_prefix(b"/api/users/42").unwrap().unwrap();
    assert_eq!(prefix.as_ref(), b"/api/users");
    assert_eq!(value.as_ref(), b"users");

    let (prefix, _) = engine.find_longest_prefix(b"/api/v2").unwrap().unwrap();
    assert_eq!(prefix.as_ref(), b"/api");

    assert_eq!(engine.find_longest_prefix(b"/other").unwrap(), None);

    engine.delete(b"/api/users").unwrap();
    let (prefix, _) = engine.find_longest_prefix(b"/api/users/42").unwrap().unwrap();
    assert_eq!(prefix.as_ref(), b"/api");
}

#[test]
fn test_engine_iter_in_key_order() {
    let (_temp, engine) = setup_temp_engine();

    for key in ["delta", "alpha", "charlie", "bravo", "alphabet"] {
        engine.put(key.as_bytes(), key.to_uppercase().as_bytes()).unwrap();
    }
    engine.delete(b"charlie").unwrap();

    let pairs = collect_pairs(engine.iter().unwrap());
    let keys: Vec<&[u8]> = pairs.iter().map(|(k, _)| k.as_ref()).collect();
    assert_eq!(keys, vec![&b"alpha"[..], b"alphabet", b"bravo", b"delta"]);
    assert_eq!(pairs[1].1.as_ref(), b"ALPHABET");

    let pairs = collect_pairs(engine.iter_prefix(b"alph").unwrap());
    assert_eq!(pairs.len(), 2);
    assert!(collect_pairs(engine.iter_prefix(b"zulu").unwrap()).is_empty());
}

#[test]
fn test_engine_iter_sees_creation_snapshot() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"a", b"1").unwrap();

    let iter = engine.iter().unwrap();
    engine.put(b"b", b"2").unwrap();

    assert_eq!(collect_pairs(iter).len(), 1);
    assert_eq!(collect_pairs(engine.iter().unwrap()).len(), 2);
}

#[test]
fn test_engine_remove_all() {
    let (_temp, engine) = setup_temp_engine();

    for i in 0..20 {
        engine.put(format!("key{}", i).as_bytes(), b"value").unwrap();
    }
    engine.delete(b"key3").unwrap();

    assert_eq!(engine.remove_all().unwrap(), 19);
    assert_eq!(engine.count().unwrap(), 0);
    assert_eq!(engine.get(b"key1").unwrap(), None);
    assert!(collect_pairs(engine.iter().unwrap()).is_empty());

    engine.put(b"fresh", b"start").unwrap();
    assert_eq!(engine.count().unwrap(), 1);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_engine_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(temp_dir.path())).unwrap();
        for i in 0..100 {
            engine
                .put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
                .unwrap();
        }
        engine.delete(b"key7").unwrap();
        engine.put(b"key8", b"changed").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(config_for(temp_dir.path())).unwrap();
    assert_eq!(engine.count().unwrap(), 99);
    assert_eq!(engine.get(b"key7").unwrap(), None);
    assert_eq!(engine.get(b"key8").unwrap(), Some(Bytes::from_static(b"changed")));
    for i in (0..100).filter(|&i| i != 7 && i != 8) {
        let expected = format!("value{}", i);
        assert_eq!(engine.get(format!("key{}", i).as_bytes()).unwrap().unwrap().as_ref(), expected.as_bytes());
    }

    let stats = engine.stats().unwrap();
    assert_eq!(stats.dead_entries, 1);
    assert!(stats.dead_value_bytes > 0);
}

#[test]
fn test_engine_reopen_bumps_generation() {
    let temp_dir = TempDir::new().unwrap();
    let first = {
        let engine = Engine::open(config_for(temp_dir.path())).unwrap();
        engine.snapshot().reclaim_generation
    };

    let engine = Engine::open(config_for(temp_dir.path())).unwrap();
    assert!(engine.snapshot().reclaim_generation > first);
}

#[test]
fn test_engine_block_size_fixed_at_creation() {
    let temp_dir = TempDir::new().unwrap();
    {
        let _engine = Engine::open(config_for(temp_dir.path())).unwrap();
    }

    let config = Config::builder()
        .data_dir(temp_dir.path())
        .value_block_size(128 * 1024)
        .data_growth(512 * 1024)
        .build();
    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.config().value_block_size, 64 * 1024);
    assert_eq!(engine.stats().unwrap().value_block_size, 64 * 1024);
}

#[test]
fn test_engine_writes_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(temp_dir.path())).unwrap();
        engine.put(b"first", b"1").unwrap();
    }
    {
        let engine = Engine::open(config_for(temp_dir.path())).unwrap();
        engine.put(b"second", b"2").unwrap();
        engine.put(b"first", b"one").unwrap();
    }

    let engine = Engine::open(config_for(temp_dir.path())).unwrap();
    assert_eq!(engine.get(b"first").unwrap(), Some(Bytes::from_static(b"one")));
    assert_eq!(engine.get(b"second").unwrap(), Some(Bytes::from_static(b"2")));
    assert_eq!(engine.count().unwrap(), 2);
}

// =============================================================================
// Reader Mode Tests
// =============================================================================

#[test]
fn test_reader_sees_writer_commits() {
    let (temp, engine) = setup_temp_engine();
    engine.put(b"key", b"v1").unwrap();

    let reader = reader_for(temp.path());
    assert!(!reader.is_writer());
    assert_eq!(reader.get(b"key").unwrap(), Some(Bytes::from_static(b"v1")));

    engine.put(b"key", b"v2").unwrap();
    engine.put(b"other", b"x").unwrap();
    assert_eq!(reader.get(b"key").unwrap(), Some(Bytes::from_static(b"v2")));
    assert_eq!(reader.count().unwrap(), 2);
    assert_eq!(collect_pairs(reader.iter().unwrap()).len(), 2);
}

#[test]
fn test_reader_cannot_write() {
    let (temp, engine) = setup_temp_engine();
    engine.put(b"key", b"value").unwrap();

    let reader = reader_for(temp.path());
    assert!(matches!(reader.put(b"key", b"x"), Err(ArborError::StoreUnavailable(_))));
    assert!(matches!(reader.delete(b"key"), Err(ArborError::StoreUnavailable(_))));
    assert!(matches!(reader.remove_all(), Err(ArborError::StoreUnavailable(_))));
}

#[test]
fn test_reader_needs_existing_store() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).writer_mode(false).build();
    assert!(matches!(Engine::open(config), Err(ArborError::StoreUnavailable(_))));
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_engine_concurrent_reads() {
    let (_temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);

    // Pre-populate data
    for i in 0..100 {
        engine
            .put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
            .unwrap();
    }

    // Spawn multiple reader threads
    let mut handles = vec![];
    for _ in 0..4 {
        let engine_clone = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                let key = format!("key{}", i);
                let expected = format!("value{}", i);
                let result = engine_clone.get(key.as_bytes()).unwrap();
                assert_eq!(result, Some(Bytes::from(expected)));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_engine_reads_during_writes_and_collection() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .sync_strategy(SyncStrategy::OnClose)
        .value_block_size(16 * 1024)
        .data_growth(64 * 1024)
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());

    for i in 0..50 {
        engine.put(format!("key{}", i).as_bytes(), b"old").unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = vec![];
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                for i in 0..50 {
                    let value = engine.get(format!("key{}", i).as_bytes()).unwrap().unwrap();
                    assert!(value.as_ref() == b"old" || value.as_ref() == b"new");
                }
            }
        }));
    }

    for round in 0..10 {
        let value: &[u8] = if round % 2 == 0 { b"new" } else { b"old" };
        for i in 0..50 {
            engine.put(format!("key{}", i).as_bytes(), value).unwrap();
        }
        let _ = engine.collect(1, u64::MAX);
    }

    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(engine.count().unwrap(), 50);
}

#[test]
fn test_readers_during_deletes_and_collection() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .sync_strategy(SyncStrategy::OnClose)
        .value_block_size(16 * 1024)
        .data_growth(64 * 1024)
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());

    fn original(i: usize) -> Vec<u8> {
        format!("value{}_{}", i, "x".repeat(64)).into_bytes()
    }
    for i in 0..60 {
        engine.put(format!("key{}", i).as_bytes(), &original(i)).unwrap();
    }

    // A lookup sees the value it was written with, or nothing
    fn check_all(read: impl Fn(&[u8]) -> arborkv::Result<Option<Bytes>>) {
        for i in 0..60 {
            match read(format!("key{}", i).as_bytes()) {
                Ok(Some(value)) => assert_eq!(value.as_ref(), original(i).as_slice()),
                Ok(None) => {}
                Err(e) => panic!("lookup of key{} failed: {}", i, e),
            }
        }
    }

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = vec![];
    for _ in 0..2 {
        let engine = Arc::clone(&engine);
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                check_all(|key| engine.get(key));
            }
        }));
    }
    for _ in 0..2 {
        let reader_config = Config::builder()
            .data_dir(temp_dir.path())
            .writer_mode(false)
            .reader_retry_limit(1000)
            .build();
        let reader = Engine::open(reader_config).unwrap();
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                check_all(|key| reader.get(key));
            }
        }));
    }

    for round in 0..30 {
        for i in 0..60 {
            engine.put(format!("key{}", i).as_bytes(), &original(i)).unwrap();
        }
        for i in (round % 2..60).step_by(2) {
            engine.delete(format!("key{}", i).as_bytes()).unwrap();
        }
        match engine.collect(1, u64::MAX) {
            Ok(_) | Err(ArborError::Gc(GcError::ThresholdUnreachable { .. })) => {}
            Err(e) => panic!("collection failed: {}", e),
        }
    }

    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(engine.count().unwrap(), 30);
}

// =============================================================================
// Backup Tests
// =============================================================================

#[test]
fn test_backup_reopens_with_same_contents() {
    let (temp, engine) = setup_temp_engine();
    for i in 0..50 {
        engine
            .put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
            .unwrap();
    }
    for i in 0..10 {
        engine.delete(format!("key{}", i).as_bytes()).unwrap();
    }

    let backup_dir = temp.path().join("backup");
    engine.backup(&backup_dir).unwrap();

    // Later writes stay out of the copy
    engine.put(b"after_backup", b"x").unwrap();
    engine.put(b"key20", b"changed").unwrap();

    let copy = Engine::open(config_for(&backup_dir)).unwrap();
    assert_eq!(copy.count().unwrap(), 40);
    assert_eq!(copy.get(b"after_backup").unwrap(), None);
    for i in 0..50 {
        let found = copy.get(format!("key{}", i).as_bytes()).unwrap();
        if i < 10 {
            assert_eq!(found, None);
        } else {
            assert_eq!(found, Some(Bytes::from(format!("value{}", i))));
        }
    }

    // The copy is a full store of its own
    copy.put(b"in_copy", b"y").unwrap();
    copy.collect(1, u64::MAX).unwrap();
    assert_eq!(copy.get(b"key20").unwrap(), Some(Bytes::from_static(b"value20")));
    assert_eq!(engine.get(b"in_copy").unwrap(), None);
}

#[test]
fn test_backup_refuses_existing_store() {
    let (temp, engine) = setup_temp_engine();
    engine.put(b"k", b"v").unwrap();

    let backup_dir = temp.path().join("backup");
    engine.backup(&backup_dir).unwrap();
    assert!(matches!(engine.backup(&backup_dir), Err(ArborError::InvalidArgument(_))));
    assert!(matches!(engine.backup(temp.path()), Err(ArborError::InvalidArgument(_))));
}

#[test]
fn test_backup_needs_the_writer() {
    let (temp, engine) = setup_temp_engine();
    engine.put(b"k", b"v").unwrap();

    let reader = reader_for(temp.path());
    let result = reader.backup(&temp.path().join("backup"));
    assert!(matches!(result, Err(ArborError::StoreUnavailable(_))));

    engine.close().unwrap();
    assert!(matches!(
        engine.backup(&temp.path().join("backup")),
        Err(ArborError::StoreUnavailable(_))
    ));
}

#[test]
fn test_engine_concurrent_writes() {
    let (_temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);

    // Spawn multiple writer threads
    let mut handles = vec![];
    for t in 0..4 {
        let engine_clone = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                let key = format!("thread{}_key{}", t, i);
                let value = format!("thread{}_value{}", t, i);
                engine_clone.put(key.as_bytes(), value.as_bytes()).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // Verify all writes succeeded
    for t in 0..4 {
        for i in 0..25 {
            let key = format!("thread{}_key{}", t, i);
            let expected = format!("thread{}_value{}", t, i);
            let result = engine.get(key.as_bytes()).unwrap();
            assert_eq!(result, Some(Bytes::from(expected)));
        }
    }
    assert_eq!(engine.count().unwrap(), 100);
}

// =============================================================================
// Edge Cases
// =============================================================================

#[test]
fn test_engine_empty_value() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(Bytes::new()));
}

#[test]
fn test_engine_large_value() {
    let (_temp, engine) = setup_temp_engine();

    let large_value = vec![0xAB; 100_000]; // larger than one value block
    engine.put(b"large_key", &large_value).unwrap();
    engine.put(b"small_key", b"small").unwrap();

    let result = engine.get(b"large_key").unwrap().unwrap();
    assert_eq!(result.as_ref(), large_value.as_slice());
    assert_eq!(engine.get(b"small_key").unwrap(), Some(Bytes::from_static(b"small")));
}

#[test]
fn test_engine_binary_data() {
    let (_temp, engine) = setup_temp_engine();

    // Binary key and value with null bytes
    let key = b"\x00\x01\x02\xFF\xFE";
    let value = b"\xFF\x00\xAB\xCD\x00";

    engine.put(key, value).unwrap();
    assert_eq!(engine.get(key).unwrap(), Some(Bytes::copy_from_slice(value)));
}

// =============================================================================
// Background Collection Tests
// =============================================================================

#[test]
fn test_background_collector_prunes_deletes() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = config_for(temp_dir.path());
    config.background_gc = Some(BackgroundGcConfig {
        interval: Duration::from_millis(10),
        min_reclaim_size: 1,
        max_reclaim_size: u64::MAX,
    });
    let engine = Engine::open(config).unwrap();

    for i in 0..100 {
        engine.put(format!("bg_{:03}", i).as_bytes(), b"value").unwrap();
    }
    for i in (0..100).step_by(2) {
        engine.delete(format!("bg_{:03}", i).as_bytes()).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.stats().unwrap().dead_entries > 0 {
        assert!(Instant::now() < deadline, "background collector never ran");
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(engine.count().unwrap(), 50);
    assert_eq!(engine.get(b"bg_001").unwrap(), Some(Bytes::from_static(b"value")));
    assert_eq!(engine.get(b"bg_000").unwrap(), None);

    engine.close().unwrap();
    assert!(!engine.is_open());
}
