//! Background collector thread

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::collect;
use crate::config::BackgroundGcConfig;
use crate::engine::EngineInner;
use crate::error::{ArborError, Result};

/// Runs collection passes on an interval until stopped
pub(crate) struct BackgroundCollector {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundCollector {
    pub(crate) fn spawn(inner: Arc<EngineInner>, config: BackgroundGcConfig) -> Result<Self> {
        let (shutdown, signal) = channel::bounded(1);
        let handle = thread::Builder::new()
            .name("arborkv-gc".to_string())
            .spawn(move || run(inner, config, signal))?;

        tracing::debug!(interval = ?config.interval, "started background collector");
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for the current pass to finish
    pub(crate) fn stop(mut self) {
        // The thread may already have exited
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("background collector panicked");
            }
        }
    }
}

fn run(inner: Arc<EngineInner>, config: BackgroundGcConfig, signal: Receiver<()>) {
    loop {
        match signal.recv_timeout(config.interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }

        match collect(&inner, config.min_reclaim_size, config.max_reclaim_size) {
            Ok(report) => tracing::debug!(reclaimed = report.reclaimed_bytes, "background collection"),
            // Nothing to do, or a foreground pass is running
            Err(ArborError::Gc(_)) => {}
            Err(_) if !inner.is_open() => break,
            Err(e) => tracing::warn!(error = %e, "background collection failed"),
        }
    }
    tracing::debug!("background collector stopped");
}
