//! Deferred appender: the worker context that may block
//!
//! Drains the scratch cell into the log buffer whenever the trigger asks for
//! it. Growing the buffer allocates and holds the buffer's write lock, which
//! is why this runs here and not in the trigger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::buffer::LogBuffer;
use crate::error::KlogResult;
use crate::pending::PendingWork;
use crate::scratch::ScratchReader;

/// Counters shared between the appender task and its observers
#[derive(Debug, Default)]
pub struct AppenderCounters {
    drains: AtomicU64,
    empty_drains: AtomicU64,
    committed: AtomicU64,
    dropped: AtomicU64,
}

impl AppenderCounters {
    /// Snapshot of the counters
    pub fn stats(&self) -> AppenderStats {
        AppenderStats {
            drains: self.drains.load(Ordering::Relaxed),
            empty_drains: self.empty_drains.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for the appender
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppenderStats {
    /// Drains run
    pub drains: u64,
    /// Drains that found nothing new in the scratch cell
    pub empty_drains: u64,
    /// Scratch entries committed to the buffer
    pub committed: u64,
    /// Scratch entries the buffer rejected
    pub dropped: u64,
}

/// Worker side: moves scratch entries into the log buffer
pub struct DeferredAppender {
    reader: ScratchReader,
    buffer: Arc<LogBuffer>,
    pending: Arc<PendingWork>,
    counters: Arc<AppenderCounters>,
}

impl DeferredAppender {
    /// Create an appender draining `reader` into `buffer`
    pub fn new(reader: ScratchReader, buffer: Arc<LogBuffer>, pending: Arc<PendingWork>) -> Self {
        Self {
            reader,
            buffer,
            pending,
            counters: Arc::new(AppenderCounters::default()),
        }
    }

    /// Shared handle to this appender's counters
    pub fn counters(&self) -> Arc<AppenderCounters> {
        self.counters.clone()
    }

    /// The scratch reader this appender drains
    pub fn scratch(&self) -> &ScratchReader {
        &self.reader
    }

    /// Run one drain
    ///
    /// Claims the pending slot, takes the scratch entry if there is a new one
    /// and appends it. Returns the bytes committed, or `None` if the scratch
    /// cell had nothing new. A rejected entry is dropped and its error
    /// returned; the buffer is unchanged in that case.
    pub fn drain_once(&mut self) -> KlogResult<Option<usize>> {
        self.pending.claim();
        self.counters.drains.fetch_add(1, Ordering::Relaxed);

        let Some(entry) = self.reader.take() else {
            self.counters.empty_drains.fetch_add(1, Ordering::Relaxed);
            trace!("Drain found no new entry");
            return Ok(None);
        };

        match self.buffer.append(&entry) {
            Ok(written) => {
                self.counters.committed.fetch_add(1, Ordering::Relaxed);
                trace!(
                    written,
                    committed = self.buffer.committed_offset(),
                    "Entry committed"
                );
                Ok(Some(written))
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(len = entry.len(), error = %e, "Dropped scratch entry");
                Err(e)
            }
        }
    }

    /// Spawn the appender loop as a background task
    ///
    /// On shutdown the loop performs one last drain if an entry is still
    /// waiting, then exits.
    pub fn spawn(self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown_rx).await;
        })
    }

    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Appender started");
        let pending = self.pending.clone();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    if pending.is_owed() || self.reader.has_pending() {
                        debug!("Final drain before shutdown");
                        // Failures are already counted and logged.
                        let _ = self.drain_once();
                    }
                    break;
                }
                _ = pending.wait() => {
                    if pending.is_owed() {
                        let _ = self.drain_once();
                    }
                }
            }
        }

        let stats = self.counters.stats();
        let scratch = self.reader.stats();
        info!(
            drains = stats.drains,
            committed = stats.committed,
            dropped = stats.dropped,
            superseded = scratch.superseded,
            "Appender stopped"
        );
    }
}

impl std::fmt::Debug for DeferredAppender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredAppender")
            .field("buffer", &self.buffer)
            .field("stats", &self.counters.stats())
            .finish()
    }
}
