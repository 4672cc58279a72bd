//! Error types for ArborKV
//!
//! Provides a unified error type for all operations, plus the stable
//! integer codes returned by the [`crate::handle`] facade.

use thiserror::Error;

/// Result type alias using ArborError
pub type Result<T> = std::result::Result<T, ArborError>;

/// Unified error type for ArborKV operations
#[derive(Debug, Error)]
pub enum ArborError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Key not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Data corruption at offset {offset}: {reason}")]
    DataCorruption { offset: u64, reason: String },

    #[error("Index arena is full")]
    IndexFull,

    #[error("{arena} arena exhausted (requested {requested} bytes)")]
    ArenaExhausted { arena: &'static str, requested: u64 },

    // -------------------------------------------------------------------------
    // Garbage Collection Errors
    // -------------------------------------------------------------------------
    #[error("Garbage collection: {0}")]
    Gc(#[from] GcError),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outcomes of a collection pass that are not a successful reclaim
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    /// Another collection pass has not finished yet
    #[error("a collection pass is already in progress")]
    InProgress,

    /// Not enough reclaimable space to satisfy the minimum
    #[error("nothing to collect ({available} bytes reclaimable, minimum {min})")]
    ThresholdUnreachable { available: u64, min: u64 },
}

impl From<bincode::Error> for ArborError {
    fn from(e: bincode::Error) -> Self {
        ArborError::Serialization(e.to_string())
    }
}

impl ArborError {
    /// Helper for checksum / framing failures on a specific read
    pub(crate) fn corruption(offset: u64, reason: impl Into<String>) -> Self {
        ArborError::DataCorruption {
            offset,
            reason: reason.into(),
        }
    }

    /// Status code reported through the integer facade
    pub fn status(&self) -> Status {
        match self {
            ArborError::Io(_) => Status::IoError,
            ArborError::InvalidKey(_) => Status::InvalidKey,
            ArborError::InvalidArgument(_) => Status::InvalidArgument,
            ArborError::NotFound => Status::NotFound,
            ArborError::StoreUnavailable(_) => Status::StoreUnavailable,
            ArborError::CorruptStore(_) => Status::CorruptStore,
            ArborError::DataCorruption { .. } => Status::DataCorruption,
            ArborError::IndexFull => Status::IndexFull,
            ArborError::ArenaExhausted { .. } => Status::ArenaExhausted,
            ArborError::Gc(GcError::InProgress) => Status::GcInProgress,
            ArborError::Gc(GcError::ThresholdUnreachable { .. }) => Status::GcThresholdUnreachable,
            ArborError::Serialization(_) => Status::CorruptStore,
        }
    }

    /// Non-zero integer code for this error
    pub fn code(&self) -> i32 {
        self.status() as i32
    }

    /// Errors that are expected outcomes rather than failures
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ArborError::NotFound | ArborError::Gc(GcError::ThresholdUnreachable { .. })
        )
    }
}

/// Integer status codes; `Ok` is the only zero value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    InvalidKey = 1,
    NotFound = 2,
    StoreUnavailable = 3,
    CorruptStore = 4,
    DataCorruption = 5,
    IndexFull = 6,
    ArenaExhausted = 7,
    GcInProgress = 8,
    GcThresholdUnreachable = 9,
    InvalidArgument = 10,
    IoError = 11,
}

impl Status {
    /// Map a raw code back to a status (unknown codes become `IoError`)
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Ok,
            1 => Status::InvalidKey,
            2 => Status::NotFound,
            3 => Status::StoreUnavailable,
            4 => Status::CorruptStore,
            5 => Status::DataCorruption,
            6 => Status::IndexFull,
            7 => Status::ArenaExhausted,
            8 => Status::GcInProgress,
            9 => Status::GcThresholdUnreachable,
            10 => Status::InvalidArgument,
            _ => Status::IoError,
        }
    }

    /// Human-readable name, used by the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::InvalidKey => "INVALID_KEY",
            Status::NotFound => "NOT_FOUND",
            Status::StoreUnavailable => "STORE_UNAVAILABLE",
            Status::CorruptStore => "CORRUPT_STORE",
            Status::DataCorruption => "DATA_CORRUPTION",
            Status::IndexFull => "INDEX_FULL",
            Status::ArenaExhausted => "ARENA_EXHAUSTED",
            Status::GcInProgress => "GC_IN_PROGRESS",
            Status::GcThresholdUnreachable => "GC_THRESHOLD_UNREACHABLE",
            Status::InvalidArgument => "INVALID_ARGUMENT",
            Status::IoError => "IO_ERROR",
        }
    }
}
