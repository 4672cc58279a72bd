//! # ArborKV
//!
//! An embedded, persistent key-value store with:
//! - A copy-on-write radix tree index on disk
//! - An append-only, checksummed value log
//! - Single-writer/multi-reader concurrency with lock-free lookups
//! - Epoch-based garbage collection that never blocks readers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Handle (status codes) / Engine              │
//! │            (writer mutex, published root snapshot)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐        ┌─────────────┐
//!   │    Index    │─ ref ───▶│  Value Log  │◀───────│     GC      │
//!   │ (COW radix) │          │ (segments)  │        │  (epochs)   │
//!   └──────┬──────┘          └──────┬──────┘        └─────────────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐        ┌─────────────┐
//!   │ Index Arena │          │ Data Arena  │        │  Metadata   │
//!   │ (index.akv) │          │ (data.akv)  │        │ (meta.akv)  │
//!   └─────────────┘          └─────────────┘        └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

mod io;
pub mod arena;
pub mod meta;
pub mod vlog;
pub mod index;
pub mod epoch;
pub mod gc;
pub mod engine;
pub mod handle;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ArborError, GcError, Result, Status};
pub use config::{BackgroundGcConfig, Config, SyncStrategy};
pub use engine::{Engine, EngineIter, Snapshot, StoreStats};
pub use gc::GcReport;
pub use handle::{open, Handle};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ArborKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
