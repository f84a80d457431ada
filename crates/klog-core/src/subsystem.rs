//! Subsystem lifecycle: start, operate, stop
//!
//! [`LogSubsystem::start`] builds every piece of state the log needs and
//! spawns the two execution contexts: the trigger task (producer, never
//! blocks) and the appender task (worker, may block). [`LogSubsystem::stop`]
//! consumes the subsystem, so a stopped log cannot be used again.
//!
//! Dropping a subsystem without calling `stop` closes both shutdown channels
//! and the tasks wind down on their own, without the ordering guarantees of
//! `stop`.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::appender::{AppenderCounters, DeferredAppender};
use crate::buffer::LogBuffer;
use crate::config::KlogConfig;
use crate::error::KlogResult;
use crate::pending::PendingWork;
use crate::reader::LogReader;
use crate::scratch::{scratch_cell, ScratchObserver};
use crate::stats::KlogStats;
use crate::trigger::{EntryProducer, PeriodicTrigger, TimerEntries};

/// A running log: buffer, scratch cell, trigger task and appender task
pub struct LogSubsystem {
    config: KlogConfig,
    buffer: Arc<LogBuffer>,
    pending: Arc<PendingWork>,
    scratch: ScratchObserver,
    appender: Arc<AppenderCounters>,
    trigger_shutdown: broadcast::Sender<()>,
    appender_shutdown: broadcast::Sender<()>,
    trigger_task: JoinHandle<()>,
    appender_task: JoinHandle<()>,
}

impl LogSubsystem {
    /// Start a log that writes the default timer entries
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(config: KlogConfig) -> KlogResult<Self> {
        Self::start_with_producer(config, TimerEntries).await
    }

    /// Start a log whose trigger formats entries with `producer`
    ///
    /// Allocates the buffer and scratch cell, appends the banner if one is
    /// configured, then spawns the appender and arms the trigger.
    #[instrument(skip_all, fields(
        initial_capacity = config.initial_capacity,
        period_ms = config.trigger_period.as_millis() as u64,
    ))]
    pub async fn start_with_producer(
        config: KlogConfig,
        producer: impl EntryProducer,
    ) -> KlogResult<Self> {
        config.validate()?;

        let buffer = Arc::new(LogBuffer::from_config(&config)?);
        if let Some(banner) = &config.banner {
            buffer.append(banner.as_bytes())?;
        }

        let (writer, reader) = scratch_cell(config.scratch_capacity);
        let scratch = reader.observer();
        let pending = Arc::new(PendingWork::new());

        let appender = DeferredAppender::new(reader, buffer.clone(), pending.clone());
        let appender_counters = appender.counters();
        let (appender_shutdown, appender_rx) = broadcast::channel(1);
        let appender_task = appender.spawn(appender_rx);

        let trigger = PeriodicTrigger::new(writer, pending.clone(), Box::new(producer));
        let (trigger_shutdown, trigger_rx) = broadcast::channel(1);
        let trigger_task = trigger.spawn(config.trigger_period, trigger_rx);

        info!(
            committed = buffer.committed_offset(),
            scratch_capacity = config.scratch_capacity,
            "Log subsystem started"
        );

        Ok(Self {
            config,
            buffer,
            pending,
            scratch,
            appender: appender_counters,
            trigger_shutdown,
            appender_shutdown,
            trigger_task,
            appender_task,
        })
    }

    /// Stop the log and return its final statistics
    ///
    /// Disarms the trigger and waits for it to exit, then lets the appender
    /// finish any drain in flight (plus one final drain if an entry is still
    /// waiting) and waits for it too. The subsystem's hold on the buffer is
    /// released on return; readers created earlier keep their own handle.
    #[instrument(skip_all)]
    pub async fn stop(self) -> KlogResult<KlogStats> {
        let _ = self.trigger_shutdown.send(());
        if let Err(e) = self.trigger_task.await {
            error!(error = %e, "Trigger task failed");
        }

        let _ = self.appender_shutdown.send(());
        if let Err(e) = self.appender_task.await {
            error!(error = %e, "Appender task failed");
        }

        let stats = KlogStats {
            scratch: self.scratch.stats(),
            pending: self.pending.stats(),
            appender: self.appender.stats(),
            buffer: self.buffer.stats(),
        };

        info!(
            ticks = stats.ticks(),
            committed = stats.buffer.committed,
            capacity = stats.buffer.capacity,
            superseded = stats.superseded(),
            dropped = stats.appender.dropped,
            "Log subsystem stopped"
        );
        Ok(stats)
    }

    /// A new cursor at the start of the log
    pub fn reader(&self) -> LogReader {
        LogReader::new(self.buffer.clone())
    }

    /// Append an entry directly from a context that may block
    pub fn append(&self, data: &[u8]) -> KlogResult<usize> {
        self.buffer.append(data)
    }

    /// The underlying buffer
    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    /// Number of committed bytes
    pub fn committed_offset(&self) -> usize {
        self.buffer.committed_offset()
    }

    /// The configuration the subsystem was started with
    pub fn config(&self) -> &KlogConfig {
        &self.config
    }

    /// Snapshot of every counter
    pub fn stats(&self) -> KlogStats {
        KlogStats {
            scratch: self.scratch.stats(),
            pending: self.pending.stats(),
            appender: self.appender.stats(),
            buffer: self.buffer.stats(),
        }
    }
}

impl std::fmt::Debug for LogSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubsystem")
            .field("config", &self.config)
            .field("buffer", &self.buffer)
            .finish()
    }
}
