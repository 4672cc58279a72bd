//! Configuration for ArborKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ArborError, Result};

/// Hard upper bound on key length (node labels store a u16 length)
pub const KEY_LEN_LIMIT: usize = u16::MAX as usize;

/// Main configuration for an ArborKV store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all store files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── meta.akv         (dual-slot metadata header)
    ///     ├── index.akv        (radix index arena)
    ///     ├── data.akv         (value log segments)
    ///     └── .writer.lock     (exclusive writer lock)
    pub data_dir: PathBuf,

    /// Create the store when `meta.akv` does not exist (writer mode only)
    pub create_if_missing: bool,

    /// Open as the single writer (takes the writer lock) or as a reader
    pub writer_mode: bool,

    /// Sync strategy: how often to fsync after mutations
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Limits
    // -------------------------------------------------------------------------
    /// Maximum key length in bytes
    pub max_key_len: usize,

    /// Value log block size (the arena granule for segments)
    pub value_block_size: u64,

    /// Index file growth increment in bytes
    pub index_growth: u64,

    /// Data file growth increment in bytes
    pub data_growth: u64,

    /// Maximum index file size
    pub max_index_size: u64,

    /// Maximum data file size
    pub max_data_size: u64,

    // -------------------------------------------------------------------------
    // Concurrency
    // -------------------------------------------------------------------------
    /// Number of epoch slots for concurrent in-process readers
    pub max_readers: usize,

    /// Retries for reader-mode lookups racing with reclamation
    pub reader_retry_limit: usize,

    // -------------------------------------------------------------------------
    // Garbage Collection
    // -------------------------------------------------------------------------
    /// Run the collector on a background thread (writer mode only)
    pub background_gc: Option<BackgroundGcConfig>,
}

/// Sync strategy for data, index and metadata files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every mutation (safest, slowest)
    EveryWrite,

    /// fsync after N mutations (balanced durability/performance)
    EveryNEntries { count: usize },

    /// fsync only on close / explicit sync
    OnClose,
}

/// Settings for the background collector thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundGcConfig {
    /// Pause between collection passes
    pub interval: Duration,

    /// Minimum bytes a pass must be able to reclaim
    pub min_reclaim_size: u64,

    /// Maximum bytes reclaimed per pass
    pub max_reclaim_size: u64,
}

impl Default for BackgroundGcConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            min_reclaim_size: 1024 * 1024,
            max_reclaim_size: 64 * 1024 * 1024,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./arborkv_data"),
            create_if_missing: true,
            writer_mode: true,
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            max_key_len: 1024,
            value_block_size: 4 * 1024 * 1024,   // 4 MB
            index_growth: 1024 * 1024,           // 1 MB
            data_growth: 8 * 1024 * 1024,        // 8 MB
            max_index_size: 64 * 1024 * 1024 * 1024,
            max_data_size: 64 * 1024 * 1024 * 1024,
            max_readers: 256,
            reader_retry_limit: 64,
            background_gc: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.value_block_size < 4096 {
            return Err(ArborError::InvalidArgument(format!(
                "value_block_size must be at least 4096, got {}",
                self.value_block_size
            )));
        }
        if self.data_growth < self.value_block_size {
            return Err(ArborError::InvalidArgument(
                "data_growth must be at least one value block".to_string(),
            ));
        }
        if self.index_growth == 0 {
            return Err(ArborError::InvalidArgument(
                "index_growth must be non-zero".to_string(),
            ));
        }
        if self.max_key_len == 0 || self.max_key_len > KEY_LEN_LIMIT {
            return Err(ArborError::InvalidArgument(format!(
                "max_key_len must be in 1..={}, got {}",
                KEY_LEN_LIMIT, self.max_key_len
            )));
        }
        if self.max_readers == 0 {
            return Err(ArborError::InvalidArgument(
                "max_readers must be non-zero".to_string(),
            ));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(ArborError::InvalidArgument(
                "EveryNEntries count must be non-zero".to_string(),
            ));
        }
        if let Some(gc) = &self.background_gc {
            if gc.min_reclaim_size > gc.max_reclaim_size {
                return Err(ArborError::InvalidArgument(format!(
                    "background gc min ({}) exceeds max ({})",
                    gc.min_reclaim_size, gc.max_reclaim_size
                )));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Create the store if it does not exist yet
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create_if_missing = create;
        self
    }

    /// Open as writer (`true`) or reader (`false`)
    pub fn writer_mode(mut self, writer: bool) -> Self {
        self.config.writer_mode = writer;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the maximum key length
    pub fn max_key_len(mut self, len: usize) -> Self {
        self.config.max_key_len = len;
        self
    }

    /// Set the value log block size (in bytes)
    pub fn value_block_size(mut self, size: u64) -> Self {
        self.config.value_block_size = size;
        self
    }

    /// Set the index file growth increment (in bytes)
    pub fn index_growth(mut self, size: u64) -> Self {
        self.config.index_growth = size;
        self
    }

    /// Set the data file growth increment (in bytes)
    pub fn data_growth(mut self, size: u64) -> Self {
        self.config.data_growth = size;
        self
    }

    /// Cap the index file size (in bytes)
    pub fn max_index_size(mut self, size: u64) -> Self {
        self.config.max_index_size = size;
        self
    }

    /// Cap the data file size (in bytes)
    pub fn max_data_size(mut self, size: u64) -> Self {
        self.config.max_data_size = size;
        self
    }

    /// Set the number of reader epoch slots
    pub fn max_readers(mut self, count: usize) -> Self {
        self.config.max_readers = count;
        self
    }

    /// Set the reader-mode retry limit
    pub fn reader_retry_limit(mut self, count: usize) -> Self {
        self.config.reader_retry_limit = count;
        self
    }

    /// Enable the background collector
    pub fn background_gc(mut self, gc: BackgroundGcConfig) -> Self {
        self.config.background_gc = Some(gc);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
