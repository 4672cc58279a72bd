//! Arena backing file
//!
//! A single file grown in fixed increments. Reads and writes are positional,
//! so one handle is shared by the writer and every reader.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ArborError, Result};
use crate::io::{read_exact_at, write_all_at};

/// Which arena a file backs; decides the exhaustion error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaKind {
    Index,
    Data,
}

impl ArenaKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArenaKind::Index => "index",
            ArenaKind::Data => "data",
        }
    }

    fn exhausted(&self, requested: u64) -> ArborError {
        match self {
            ArenaKind::Index => ArborError::IndexFull,
            ArenaKind::Data => ArborError::ArenaExhausted {
                arena: self.name(),
                requested,
            },
        }
    }
}

/// Growable file backing one arena
#[derive(Debug)]
pub struct ArenaFile {
    kind: ArenaKind,
    path: PathBuf,
    file: File,
    /// Current file length (only the writer grows it)
    len: AtomicU64,
    growth: u64,
    max_size: u64,
}

impl ArenaFile {
    /// Open (or create) the backing file
    pub fn open(
        path: &Path,
        kind: ArenaKind,
        growth: u64,
        max_size: u64,
        writable: bool,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            file,
            len: AtomicU64::new(len),
            growth: growth.max(1),
            max_size,
        })
    }

    pub fn kind(&self) -> ArenaKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make sure the file covers `[0, end)`, growing by whole increments
    pub fn ensure_len(&self, end: u64) -> Result<()> {
        let current = self.len();
        if end <= current {
            return Ok(());
        }
        if end > self.max_size {
            return Err(self.kind.exhausted(end - current));
        }

        let increments = (end - current + self.growth - 1) / self.growth;
        let new_len = current
            .saturating_add(increments.saturating_mul(self.growth))
            .min(self.max_size);

        self.file
            .set_len(new_len)
            .map_err(|_| self.kind.exhausted(end - current))?;
        self.len.store(new_len, Ordering::Release);

        tracing::debug!(
            arena = self.kind.name(),
            old_len = current,
            new_len,
            "grew arena file"
        );
        Ok(())
    }

    /// Read exactly `buf.len()` bytes at `offset`
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset.saturating_add(buf.len() as u64);
        if end > self.file_len_hint(end)? {
            return Err(ArborError::corruption(
                offset,
                format!("{} read past end of file", self.kind.name()),
            ));
        }
        read_exact_at(&self.file, buf, offset)?;
        Ok(())
    }

    /// Write all of `buf` at `offset`; the range must already be allocated
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        write_all_at(&self.file, buf, offset)?;
        Ok(())
    }

    /// Flush file contents to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Length check for reads. Another process may have grown the file, so
    /// the cached length is refreshed before giving up.
    fn file_len_hint(&self, end: u64) -> Result<u64> {
        let cached = self.len();
        if end <= cached {
            return Ok(cached);
        }
        let actual = self.file.metadata()?.len();
        if actual > cached {
            self.len.fetch_max(actual, Ordering::AcqRel);
        }
        Ok(actual)
    }
}
