//! Engine Module
//!
//! The store handle that owns and coordinates all components.
//!
//! ## Responsibilities
//! - Open / create the store files, take the writer lock, recover state
//! - Serialize mutations through the writer mutex and publish each one
//!   with a root pointer swap
//! - Serve lookups without blocking on the writer
//! - Hand retired regions to the collector via pending frees

use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};

use crate::arena::{Arena, ArenaFile, ArenaKind, Region};
use crate::config::{Config, SyncStrategy};
use crate::epoch::{EpochManager, PendingFrees, ReaderGuard};
use crate::error::{ArborError, Result};
use crate::gc::{self, BackgroundCollector, GcReport};
use crate::index::{Index, IndexIter, IndexWriter, Node, NodePtr, INDEX_GRANULE};
use crate::meta::{MetaFile, MetaHeader};
use crate::vlog::{read_value, ValueLog, ValueRef};

/// Committed state readers traverse from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub root: NodePtr,
    pub version: u64,
    pub entry_count: u64,
    pub reclaim_generation: u64,
}

impl Snapshot {
    pub(crate) fn from_header(header: &MetaHeader) -> Self {
        Self {
            root: NodePtr::from_raw(header.root),
            version: header.version,
            entry_count: header.entry_count,
            reclaim_generation: header.reclaim_generation,
        }
    }
}

/// Point-in-time counters, see [`Engine::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entry_count: u64,
    pub dead_entries: u64,
    pub version: u64,
    pub reclaim_generation: u64,
    pub value_block_size: u64,
    pub index_file_bytes: u64,
    pub index_used_bytes: u64,
    pub index_free_bytes: u64,
    pub data_file_bytes: u64,
    pub data_used_bytes: u64,
    pub data_free_bytes: u64,
    pub segment_count: usize,
    pub live_value_bytes: u64,
    pub dead_value_bytes: u64,
    pub pending_regions: usize,
    pub pending_bytes: u64,
    pub epoch: u64,
    pub active_readers: usize,
}

/// Mutable state owned by the single writer
pub(crate) struct WriterState {
    pub(crate) index_arena: Arena,
    pub(crate) vlog: ValueLog,
    /// Header of the last commit, updated in place before each write
    pub(crate) header: MetaHeader,
    pub(crate) pending: PendingFrees,
    unsynced: usize,
}

/// State shared by the engine, its iterators and the background collector
pub(crate) struct EngineInner {
    pub(crate) config: Config,
    pub(crate) index: Index,
    pub(crate) data: Arc<ArenaFile>,
    pub(crate) meta: MetaFile,
    pub(crate) snapshot: ArcSwap<Snapshot>,
    pub(crate) epochs: Arc<EpochManager>,
    /// `None` for reader-mode handles
    pub(crate) writer: Option<Mutex<WriterState>>,
    pub(crate) gc_running: AtomicBool,
    open: AtomicBool,
    writer_lock: Mutex<Option<File>>,
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (put/delete/remove_all/collect): serialized by the writer
///   mutex. Every mutation writes fresh index nodes, commits the header and
///   then swaps the published [`Snapshot`].
///
/// - **Reads** (get/iter/find_longest_prefix): never take the writer mutex.
///   In writer mode a reader pins an epoch before loading the snapshot, so
///   nothing it can reach is freed while it runs. Reader-mode handles (other
///   processes) read the committed header instead and retry when the
///   reclaim generation moved during the lookup.
pub struct Engine {
    inner: Arc<EngineInner>,
    background: Mutex<Option<BackgroundCollector>>,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const META_FILENAME: &'static str = "meta.akv";
    const INDEX_FILENAME: &'static str = "index.akv";
    const DATA_FILENAME: &'static str = "data.akv";
    const LOCK_FILENAME: &'static str = ".writer.lock";

    /// Open or create a store with the given config
    ///
    /// Writer mode:
    /// 1. Take the exclusive writer lock (fails fast with `StoreUnavailable`)
    /// 2. Create the files, or read the committed header and rebuild the
    ///    allocator and segment state from the index
    /// 3. Bump the reclaim generation so readers of older roots retry
    ///
    /// Reader mode only opens existing files and never touches the lock.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let engine = if config.writer_mode {
            Self::open_writer(config)?
        } else {
            Self::open_reader(config)?
        };

        if let (Some(gc_config), true) = (engine.inner.config.background_gc, engine.inner.writer.is_some()) {
            let collector = BackgroundCollector::spawn(Arc::clone(&engine.inner), gc_config)?;
            *engine.background.lock() = Some(collector);
        }
        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        config.data_dir = path.to_path_buf();
        Self::open(config)
    }

    fn open_writer(mut config: Config) -> Result<Self> {
        let dir = config.data_dir.clone();
        if !dir.exists() {
            if !config.create_if_missing {
                return Err(ArborError::StoreUnavailable(format!("{} does not exist", dir.display())));
            }
            fs::create_dir_all(&dir)?;
        }

        let lock = Self::acquire_writer_lock(&dir)?;
        let meta_path = dir.join(Self::META_FILENAME);
        let index_path = dir.join(Self::INDEX_FILENAME);
        let data_path = dir.join(Self::DATA_FILENAME);

        let (meta, mut state, index_file, data_file) = if meta_path.exists() {
            let meta = MetaFile::open(&meta_path, true)?;
            let header = meta.read_latest()?;
            if header.value_block_size != config.value_block_size {
                tracing::warn!(
                    configured = config.value_block_size,
                    stored = header.value_block_size,
                    "value block size is fixed at creation, using the stored one"
                );
                config.value_block_size = header.value_block_size;
            }
            if !index_path.exists() || !data_path.exists() {
                return Err(ArborError::CorruptStore("index or data file missing".to_string()));
            }

            let index_file = Arc::new(ArenaFile::open(
                &index_path,
                ArenaKind::Index,
                config.index_growth,
                config.max_index_size,
                true,
            )?);
            let data_file = Arc::new(ArenaFile::open(
                &data_path,
                ArenaKind::Data,
                config.data_growth.max(header.value_block_size),
                config.max_data_size,
                true,
            )?);
            let state = Self::recover(header, &index_file, &data_file)?;
            (meta, state, index_file, data_file)
        } else {
            if !config.create_if_missing {
                return Err(ArborError::StoreUnavailable(format!("no store at {}", dir.display())));
            }
            Self::create(&config, &meta_path, &index_path, &data_path)?
        };

        // Invalidate any lookup that started against the previous session
        state.header.reclaim_generation += 1;
        state.header.sequence += 1;
        meta.write(&state.header)?;
        meta.sync()?;

        tracing::info!(
            path = %dir.display(),
            entries = state.header.entry_count,
            version = state.header.version,
            generation = state.header.reclaim_generation,
            "opened store in writer mode"
        );

        let snapshot = Snapshot::from_header(&state.header);
        Ok(Self::assemble(
            config,
            index_file,
            data_file,
            meta,
            snapshot,
            Some(state),
            Some(lock),
        ))
    }

    fn open_reader(mut config: Config) -> Result<Self> {
        let dir = config.data_dir.clone();
        let meta_path = dir.join(Self::META_FILENAME);
        if !meta_path.exists() {
            return Err(ArborError::StoreUnavailable(format!("no store at {}", dir.display())));
        }

        let meta = MetaFile::open(&meta_path, false)?;
        let header = meta.read_latest()?;
        config.value_block_size = header.value_block_size;

        let open = |name: &str, kind, growth, max| -> Result<Arc<ArenaFile>> {
            let path = dir.join(name);
            if !path.exists() {
                return Err(ArborError::CorruptStore(format!("{} missing", name)));
            }
            Ok(Arc::new(ArenaFile::open(&path, kind, growth, max, false)?))
        };
        let index_file = open(Self::INDEX_FILENAME, ArenaKind::Index, config.index_growth, config.max_index_size)?;
        let data_file = open(Self::DATA_FILENAME, ArenaKind::Data, config.data_growth, config.max_data_size)?;

        tracing::info!(path = %dir.display(), entries = header.entry_count, "opened store in reader mode");

        let snapshot = Snapshot::from_header(&header);
        Ok(Self::assemble(config, index_file, data_file, meta, snapshot, None, None))
    }

    fn assemble(
        config: Config,
        index_file: Arc<ArenaFile>,
        data_file: Arc<ArenaFile>,
        meta: MetaFile,
        snapshot: Snapshot,
        writer: Option<WriterState>,
        lock: Option<File>,
    ) -> Self {
        let epochs = Arc::new(EpochManager::new(config.max_readers, 1));
        let inner = EngineInner {
            index: Index::new(index_file),
            data: data_file,
            meta,
            snapshot: ArcSwap::from_pointee(snapshot),
            epochs,
            writer: writer.map(Mutex::new),
            gc_running: AtomicBool::new(false),
            open: AtomicBool::new(true),
            writer_lock: Mutex::new(lock),
            config,
        };
        Self {
            inner: Arc::new(inner),
            background: Mutex::new(None),
        }
    }

    fn acquire_writer_lock(dir: &Path) -> Result<File> {
        let path = dir.join(Self::LOCK_FILENAME);
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            ArborError::StoreUnavailable(format!("{} is locked by another writer", dir.display()))
        })?;
        Ok(file)
    }

    /// Lay out a brand new store
    fn create(
        config: &Config,
        meta_path: &Path,
        index_path: &Path,
        data_path: &Path,
    ) -> Result<(MetaFile, WriterState, Arc<ArenaFile>, Arc<ArenaFile>)> {
        for stale in [index_path, data_path] {
            if stale.exists() {
                fs::remove_file(stale)?;
            }
        }

        let index_file = Arc::new(ArenaFile::open(
            index_path,
            ArenaKind::Index,
            config.index_growth,
            config.max_index_size,
            true,
        )?);
        let data_file = Arc::new(ArenaFile::open(
            data_path,
            ArenaKind::Data,
            config.data_growth,
            config.max_data_size,
            true,
        )?);

        let mut index_arena = Arena::new(Arc::clone(&index_file), INDEX_GRANULE);
        let root = IndexWriter::new(&mut index_arena).create_root()?;
        index_file.sync()?;

        let header = MetaHeader::new(root.raw(), index_arena.high_water_bytes(), config.value_block_size);
        let meta = MetaFile::create(meta_path, &header)?;

        tracing::info!(
            path = %config.data_dir.display(),
            block_size = config.value_block_size,
            "created new store"
        );

        let state = WriterState {
            index_arena,
            vlog: ValueLog::new(Arena::new(Arc::clone(&data_file), config.value_block_size), 1),
            header,
            pending: PendingFrees::new(),
            unsynced: 0,
        };
        Ok((meta, state, index_file, data_file))
    }

    /// Rebuild writer state from the committed header.
    ///
    /// Free lists are not persisted: every index node reachable from the
    /// root is in use, everything else below the high-water mark is free.
    /// Segment live bytes come from the live slots found on the way.
    fn recover(mut header: MetaHeader, index_file: &Arc<ArenaFile>, data_file: &Arc<ArenaFile>) -> Result<WriterState> {
        let root = NodePtr::from_raw(header.root);
        let index = Index::new(Arc::clone(index_file));
        Node::read(index_file, root).map_err(|e| ArborError::CorruptStore(format!("index root unreadable: {}", e)))?;

        let mut used = Vec::new();
        let mut live = Vec::new();
        let mut dead_entries = 0u64;
        index
            .walk(root, |ptr, node, key| {
                used.push(ptr.region());
                match node.slot {
                    Some(slot) if slot.live => live.push((key.len(), slot.vref)),
                    Some(_) => dead_entries += 1,
                    None => {}
                }
                Ok(())
            })
            .map_err(|e| ArborError::CorruptStore(format!("index walk failed: {}", e)))?;

        let index_arena = Arena::rebuild(Arc::clone(index_file), INDEX_GRANULE, header.index_high_water, used)?;
        let mut vlog = ValueLog::rebuild(
            Arc::clone(data_file),
            header.value_block_size,
            header.data_high_water,
            header.next_segment_seq,
        )?;
        for (key_len, vref) in &live {
            vlog.account_live(vref.offset, vref.entry_size(*key_len))?;
        }

        if header.entry_count != live.len() as u64 || header.dead_entries != dead_entries {
            tracing::warn!(
                stored = header.entry_count,
                found = live.len(),
                "entry counters disagree with the index, using the index"
            );
            header.entry_count = live.len() as u64;
            header.dead_entries = dead_entries;
        }

        tracing::info!(
            entries = live.len(),
            dead_entries,
            segments = vlog.segment_count(),
            index_free = index_arena.free_bytes(),
            "recovered store state"
        );

        Ok(WriterState {
            index_arena,
            vlog,
            header,
            pending: PendingFrees::new(),
            unsynced: 0,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get the value stored for `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_open()?;
        self.check_key(key)?;
        let inner = &self.inner;
        inner.read_consistent(|snapshot| match inner.index.lookup(snapshot.root, key)? {
            Some(vref) => read_value(&inner.data, vref, key).map(Some),
            None => Ok(None),
        })
    }

    /// The live entry whose key is the longest prefix of `key`
    pub fn find_longest_prefix(&self, key: &[u8]) -> Result<Option<(Bytes, Bytes)>> {
        self.check_open()?;
        self.check_key(key)?;
        let inner = &self.inner;
        inner.read_consistent(|snapshot| match inner.index.find_longest_prefix(snapshot.root, key)? {
            Some((len, vref)) => {
                let prefix = &key[..len];
                let value = read_value(&inner.data, vref, prefix)?;
                Ok(Some((Bytes::copy_from_slice(prefix), value)))
            }
            None => Ok(None),
        })
    }

    /// Iterate over all live entries in key order
    pub fn iter(&self) -> Result<EngineIter> {
        self.iter_prefix(&[])
    }

    /// Iterate over live entries whose key starts with `prefix`, in key order.
    ///
    /// The iterator sees the snapshot current when it was created.
    pub fn iter_prefix(&self, prefix: &[u8]) -> Result<EngineIter> {
        self.check_open()?;
        let inner = &self.inner;

        let (guard, snapshot, generation) = if inner.writer.is_some() {
            let guard = inner.epochs.pin();
            let snapshot = **inner.snapshot.load();
            (Some(guard), snapshot, None)
        } else {
            let header = inner.meta.read_latest()?;
            (None, Snapshot::from_header(&header), Some(header.reclaim_generation))
        };

        Ok(EngineIter {
            entries: inner.index.iter_prefix(snapshot.root, prefix),
            inner: Arc::clone(inner),
            generation,
            _guard: guard,
        })
    }

    /// Number of live keys
    pub fn count(&self) -> Result<u64> {
        self.check_open()?;
        if self.inner.writer.is_some() {
            Ok(self.inner.snapshot.load().entry_count)
        } else {
            Ok(self.inner.meta.read_latest()?.entry_count)
        }
    }

    /// Current counters
    pub fn stats(&self) -> Result<StoreStats> {
        self.check_open()?;
        let inner = &self.inner;
        let mut stats = StoreStats {
            index_file_bytes: inner.index.file().len(),
            data_file_bytes: inner.data.len(),
            epoch: inner.epochs.current(),
            active_readers: inner.epochs.active_readers(),
            ..StoreStats::default()
        };

        match &inner.writer {
            Some(writer) => {
                let state = writer.lock();
                let header = &state.header;
                stats.entry_count = header.entry_count;
                stats.dead_entries = header.dead_entries;
                stats.version = header.version;
                stats.reclaim_generation = header.reclaim_generation;
                stats.value_block_size = header.value_block_size;
                stats.index_used_bytes = state.index_arena.used_bytes();
                stats.index_free_bytes = state.index_arena.free_bytes();
                stats.data_used_bytes = state.vlog.arena().used_bytes();
                stats.data_free_bytes = state.vlog.arena().free_bytes();
                stats.segment_count = state.vlog.segment_count();
                stats.live_value_bytes = state.vlog.live_bytes();
                stats.dead_value_bytes = state.vlog.dead_bytes();
                stats.pending_regions = state.pending.len();
                stats.pending_bytes = state.pending.bytes(ArenaKind::Index) + state.pending.bytes(ArenaKind::Data);
            }
            None => {
                let header = inner.meta.read_latest()?;
                stats.entry_count = header.entry_count;
                stats.dead_entries = header.dead_entries;
                stats.version = header.version;
                stats.reclaim_generation = header.reclaim_generation;
                stats.value_block_size = header.value_block_size;
                stats.index_used_bytes = header.index_high_water;
                stats.data_used_bytes = header.data_high_water;
            }
        }
        Ok(stats)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire the writer mutex
    /// 2. Skip if the key already holds exactly this value
    /// 3. Append the entry to the value log
    /// 4. Rewrite the index path and publish the new root
    /// 5. Tombstone the value the key held before
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.check_key(key)?;
        let inner = &self.inner;
        let mut state = inner.lock_writer()?;
        let root = NodePtr::from_raw(state.header.root);

        if let Some(vref) = inner.index.lookup(root, key)? {
            if vref.len as usize == value.len() {
                if let Ok(existing) = read_value(&inner.data, vref, key) {
                    if existing.as_ref() == value {
                        tracing::trace!(key_len = key.len(), "identical value, put skipped");
                        return Ok(());
                    }
                }
            }
        }

        let version = state.header.version + 1;
        let vref = state.vlog.append(key, value, version)?;

        let WriterState {
            index_arena, vlog, header, ..
        } = &mut *state;
        let mut writer = IndexWriter::new(index_arena);
        let inserted = match writer.insert(root, key, vref) {
            Ok(inserted) => inserted,
            Err(e) => {
                vlog.tombstone(vref, key.len())?;
                return Err(e);
            }
        };
        let retired = writer.into_retired();

        match inserted.previous {
            Some(previous) if previous.live => vlog.tombstone(previous.vref, key.len())?,
            Some(_) => {
                header.dead_entries = header.dead_entries.saturating_sub(1);
                header.entry_count += 1;
            }
            None => header.entry_count += 1,
        }
        header.version = version;

        let new_root = inserted.root.unwrap_or(root);
        inner.publish(&mut state, new_root, retired, false)?;
        Ok(())
    }

    /// Delete a key
    ///
    /// Clears the liveness flag in the index and tombstones the value;
    /// space comes back with the next collection pass.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_open()?;
        self.check_key(key)?;
        let inner = &self.inner;
        let mut state = inner.lock_writer()?;
        let root = NodePtr::from_raw(state.header.root);

        let mut writer = IndexWriter::new(&mut state.index_arena);
        let (new_root, vref) = writer.mark_deleted(root, key)?;
        let retired = writer.into_retired();

        state.vlog.tombstone(vref, key.len())?;
        state.header.entry_count = state.header.entry_count.saturating_sub(1);
        state.header.dead_entries += 1;

        inner.publish(&mut state, new_root, retired, false)?;
        Ok(())
    }

    /// Delete every key. Returns how many live keys were removed.
    pub fn remove_all(&self) -> Result<u64> {
        self.check_open()?;
        let inner = &self.inner;
        let mut state = inner.lock_writer()?;
        let root = NodePtr::from_raw(state.header.root);

        let mut writer = IndexWriter::new(&mut state.index_arena);
        let (new_root, live) = writer.remove_all(root)?;
        let retired = writer.into_retired();

        for (key, vref) in &live {
            state.vlog.tombstone(*vref, key.len())?;
        }
        state.header.entry_count = 0;
        state.header.dead_entries = 0;

        inner.publish(&mut state, new_root, retired, false)?;
        tracing::info!(removed = live.len(), "removed all entries");
        Ok(live.len() as u64)
    }

    /// Run one garbage collection pass, see [`crate::gc`]
    pub fn collect(&self, min_reclaim_size: u64, max_reclaim_size: u64) -> Result<GcReport> {
        self.check_open()?;
        self.inner.writer_state()?;
        gc::collect(&self.inner, min_reclaim_size, max_reclaim_size)
    }

    /// Force files and header to stable storage
    pub fn sync(&self) -> Result<()> {
        self.check_open()?;
        let mut state = self.inner.lock_writer()?;
        self.inner.commit(&mut state, true)
    }

    /// Copy a consistent image of the store into `dest`.
    ///
    /// Holds the writer mutex for the whole copy, so no mutation or
    /// collection step lands in the middle of it; readers keep running.
    /// Arena files are copied up to their high-water marks and the header
    /// goes last. `dest` must not already hold a store.
    pub fn backup(&self, dest: &Path) -> Result<()> {
        self.check_open()?;
        let mut state = self.inner.lock_writer()?;
        if dest.join(Self::META_FILENAME).exists() {
            return Err(ArborError::InvalidArgument(format!(
                "{} already holds a store",
                dest.display()
            )));
        }

        self.inner.commit(&mut state, true)?;
        fs::create_dir_all(dest)?;

        let index_bytes = copy_prefix(
            self.inner.index.file().path(),
            &dest.join(Self::INDEX_FILENAME),
            state.header.index_high_water,
        )?;
        let data_bytes = copy_prefix(
            self.inner.data.path(),
            &dest.join(Self::DATA_FILENAME),
            state.header.data_high_water,
        )?;
        copy_prefix(
            &self.inner.config.data_dir.join(Self::META_FILENAME),
            &dest.join(Self::META_FILENAME),
            u64::MAX,
        )?;

        tracing::info!(
            dest = %dest.display(),
            entries = state.header.entry_count,
            index_bytes,
            data_bytes,
            "backed up store"
        );
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Stops the background collector, syncs pending writer state and
    /// releases the writer lock. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(collector) = self.background.lock().take() {
            collector.stop();
        }

        let result = match &self.inner.writer {
            Some(writer) => {
                let mut state = writer.lock();
                self.inner.commit(&mut state, true)
            }
            None => Ok(()),
        };

        // Closing the handle drops the advisory lock
        self.inner.writer_lock.lock().take();

        tracing::info!(path = %self.inner.config.data_dir.display(), "closed store");
        result
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Whether this handle holds the writer lock
    pub fn is_writer(&self) -> bool {
        self.inner.writer.is_some()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the configuration (block size reflects the stored value)
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Currently published snapshot
    pub fn snapshot(&self) -> Snapshot {
        **self.inner.snapshot.load()
    }

    /// Pin a reader epoch; freed regions wait until the guard is dropped
    pub fn pin(&self) -> ReaderGuard {
        self.inner.epochs.pin()
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ArborError::StoreUnavailable("store is closed".to_string()))
        }
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(ArborError::InvalidKey("key is empty".to_string()));
        }
        if key.len() > self.inner.config.max_key_len {
            return Err(ArborError::InvalidKey(format!(
                "key of {} bytes exceeds the {} byte limit",
                key.len(),
                self.inner.config.max_key_len
            )));
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close store cleanly");
        }
    }
}

/// Copy the first `len` bytes of `src` into a new file at `dest`
fn copy_prefix(src: &Path, dest: &Path, len: u64) -> Result<u64> {
    let mut reader = File::open(src)?.take(len);
    let mut writer = File::create(dest)?;
    let copied = std::io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    Ok(copied)
}

impl EngineInner {
    pub(crate) fn writer_state(&self) -> Result<&Mutex<WriterState>> {
        self.writer
            .as_ref()
            .ok_or_else(|| ArborError::StoreUnavailable("store is open in reader mode".to_string()))
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Lock the writer state. Fails once `close` has started, so a caller
    /// that was blocked on the mutex never writes after the writer lock is
    /// released.
    pub(crate) fn lock_writer(&self) -> Result<MutexGuard<'_, WriterState>> {
        let state = self.writer_state()?.lock();
        if !self.is_open() {
            return Err(ArborError::StoreUnavailable("store is closed".to_string()));
        }
        Ok(state)
    }

    /// Run `read` against a snapshot no reclamation can invalidate
    fn read_consistent<T>(&self, mut read: impl FnMut(&Snapshot) -> Result<T>) -> Result<T> {
        if self.writer.is_some() {
            let _guard = self.epochs.pin();
            let snapshot = self.snapshot.load();
            return read(&snapshot);
        }

        for attempt in 0..=self.config.reader_retry_limit {
            let header = self.meta.read_latest()?;
            let result = read(&Snapshot::from_header(&header));
            let after = self.meta.read_latest()?;
            if after.reclaim_generation == header.reclaim_generation {
                return result;
            }
            tracing::trace!(attempt, "space reclaimed during lookup, retrying");
        }

        tracing::warn!(
            retries = self.config.reader_retry_limit,
            "lookup kept racing with reclamation"
        );
        Err(ArborError::StoreUnavailable(
            "lookup retries exhausted while the writer reclaimed space".to_string(),
        ))
    }

    /// Commit the header for a new root, publish it to readers and retire
    /// what the mutation replaced. Returns the retire epoch.
    pub(crate) fn publish(
        &self,
        state: &mut WriterState,
        root: NodePtr,
        retired: Vec<Region>,
        force_sync: bool,
    ) -> Result<u64> {
        state.header.root = root.raw();
        self.commit(state, force_sync)?;

        self.snapshot.store(Arc::new(Snapshot::from_header(&state.header)));
        let epoch = self.epochs.advance();
        state.pending.record(epoch, ArenaKind::Index, retired);
        Ok(epoch)
    }

    /// Write the next header slot, syncing as the strategy requires.
    ///
    /// On a sync the arena files go first so the header never points at
    /// bytes that are not durable.
    pub(crate) fn commit(&self, state: &mut WriterState, force_sync: bool) -> Result<()> {
        state.unsynced += 1;
        let sync_now = force_sync
            || match self.config.sync_strategy {
                SyncStrategy::EveryWrite => true,
                SyncStrategy::EveryNEntries { count } => state.unsynced >= count,
                SyncStrategy::OnClose => false,
            };

        if sync_now {
            self.index.file().sync()?;
            self.data.sync()?;
        }

        let header = &mut state.header;
        header.sequence += 1;
        header.index_high_water = state.index_arena.high_water_bytes();
        header.data_high_water = state.vlog.arena().high_water_bytes();
        header.next_segment_seq = state.vlog.next_seq();
        self.meta.write(header)?;

        if sync_now {
            self.meta.sync()?;
            state.unsynced = 0;
        }
        Ok(())
    }
}

/// Ordered iterator over live `(key, value)` pairs.
///
/// Holds a reader epoch (writer mode) for its whole lifetime, so keep it
/// short-lived: regions retired meanwhile are not freed until it is dropped.
pub struct EngineIter {
    inner: Arc<EngineInner>,
    entries: IndexIter,
    /// Reader mode: generation the iteration started at
    generation: Option<u64>,
    _guard: Option<ReaderGuard>,
}

impl EngineIter {
    fn next_entry(&mut self, key: Vec<u8>, vref: ValueRef) -> Result<(Bytes, Bytes)> {
        let value = read_value(&self.inner.data, vref, &key);
        if let Some(generation) = self.generation {
            if self.inner.meta.read_latest()?.reclaim_generation != generation {
                return Err(ArborError::StoreUnavailable(
                    "space reclaimed during iteration".to_string(),
                ));
            }
        }
        Ok((Bytes::from(key), value?))
    }
}

impl Iterator for EngineIter {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.inner.is_open() {
            return None;
        }
        let item = match self.entries.next()? {
            Ok((key, vref)) => self.next_entry(key, vref),
            Err(e) => Err(e),
        };
        Some(item)
    }
}
