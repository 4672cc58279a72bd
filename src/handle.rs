//! Return-code facade
//!
//! Thin wrapper over [`Engine`] for callers that expect integer status
//! codes instead of `Result`s: `0` is success, anything else is a
//! [`Status`] code.

use std::path::Path;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{ArborError, GcError, Result, Status};

/// Open a store, see [`Engine::open`]
pub fn open(path: impl AsRef<Path>, create_if_missing: bool, writer_mode: bool) -> Result<Handle> {
    let config = Config::builder()
        .data_dir(path.as_ref())
        .create_if_missing(create_if_missing)
        .writer_mode(writer_mode)
        .build();
    Handle::open_with_config(config)
}

/// An open store addressed through status codes
pub struct Handle {
    engine: Engine,
}

impl Handle {
    pub fn open_with_config(config: Config) -> Result<Self> {
        Ok(Self {
            engine: Engine::open(config)?,
        })
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_open()
    }

    /// Insert or overwrite `key`
    pub fn add(&self, key: &[u8], value: &[u8]) -> i32 {
        status_of(self.engine.put(key, value))
    }

    /// `(0, value)` on a hit, `(code, empty)` otherwise
    pub fn find(&self, key: &[u8]) -> (i32, Vec<u8>) {
        match self.engine.get(key) {
            Ok(Some(value)) => (Status::Ok as i32, value.to_vec()),
            Ok(None) => status_pair(ArborError::NotFound),
            Err(e) => status_pair(e),
        }
    }

    pub fn delete(&self, key: &[u8]) -> i32 {
        status_of(self.engine.delete(key))
    }

    /// Run one collection pass. Having nothing to collect is success.
    pub fn run_gc(&self, min_reclaim_size: u64, max_reclaim_size: u64) -> i32 {
        match self.engine.collect(min_reclaim_size, max_reclaim_size) {
            Ok(_) | Err(ArborError::Gc(GcError::ThresholdUnreachable { .. })) => Status::Ok as i32,
            Err(e) => code_of(e),
        }
    }

    pub fn close(&self) {
        if let Err(e) = self.engine.close() {
            tracing::warn!(error = %e, "close failed");
        }
    }

    /// The underlying engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

fn status_of(result: Result<()>) -> i32 {
    match result {
        Ok(()) => Status::Ok as i32,
        Err(e) => code_of(e),
    }
}

fn status_pair(e: ArborError) -> (i32, Vec<u8>) {
    (code_of(e), Vec::new())
}

fn code_of(e: ArborError) -> i32 {
    if e.is_expected() {
        tracing::debug!(error = %e, "operation finished without a result");
    } else {
        tracing::warn!(error = %e, "operation failed");
    }
    e.code()
}
