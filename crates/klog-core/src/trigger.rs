//! Periodic trigger: the non-blocking producer context
//!
//! On every fire the trigger formats one entry into the scratch cell and asks
//! for a drain. It never touches the log buffer, never takes a lock, and never
//! allocates. Those rules are carried by the types: an [`EntryProducer`] only
//! ever sees a fixed-capacity [`EntryWriter`], and the only other thing a fire
//! does is [`PendingWork::schedule`].
//!
//! Errors are not reported from here. Truncated and superseded entries are
//! counted by the scratch cell; the appender and the lifecycle code log them.

use std::fmt::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::pending::{PendingWork, Schedule};
use crate::scratch::{EntryWriter, PublishOutcome, ScratchWriter};

/// Formats the entry for one trigger fire
///
/// Runs in the producer context: implementations must not block, lock or
/// allocate. Anything that does not fit in the writer is cut off.
pub trait EntryProducer: Send + 'static {
    /// Write the entry for fire number `tick`, `uptime` after the trigger was created
    fn produce(&mut self, tick: u64, uptime: Duration, out: &mut EntryWriter<'_>) -> fmt::Result;
}

impl<F> EntryProducer for F
where
    F: FnMut(u64, Duration, &mut EntryWriter<'_>) -> fmt::Result + Send + 'static,
{
    fn produce(&mut self, tick: u64, uptime: Duration, out: &mut EntryWriter<'_>) -> fmt::Result {
        self(tick, uptime, out)
    }
}

/// Turn a closure into an [`EntryProducer`]
///
/// Pins the closure's argument types so they need no annotations:
/// `producer_fn(|tick, _uptime, out| writeln!(out, "tick {tick}"))`.
pub fn producer_fn<F>(f: F) -> F
where
    F: FnMut(u64, Duration, &mut EntryWriter<'_>) -> fmt::Result + Send + 'static,
{
    f
}

/// Default entry text: `[<uptime ms>] Timer <n> hit`
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerEntries;

impl EntryProducer for TimerEntries {
    fn produce(&mut self, tick: u64, uptime: Duration, out: &mut EntryWriter<'_>) -> fmt::Result {
        writeln!(out, "[{}] Timer {} hit", uptime.as_millis(), tick)
    }
}

/// What a single fire did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireOutcome {
    /// Fire number, starting at 1
    pub tick: u64,
    /// Whether an undrained entry was overwritten
    pub publish: PublishOutcome,
    /// Whether a new drain was queued or merged into an owed one
    pub schedule: Schedule,
}

/// Producer side: formats entries into the scratch cell on a fixed period
pub struct PeriodicTrigger {
    writer: ScratchWriter,
    pending: Arc<PendingWork>,
    producer: Box<dyn EntryProducer>,
    created: Instant,
    tick: u64,
}

impl PeriodicTrigger {
    /// Create a trigger writing through `writer` and scheduling on `pending`
    pub fn new(
        writer: ScratchWriter,
        pending: Arc<PendingWork>,
        producer: Box<dyn EntryProducer>,
    ) -> Self {
        Self {
            writer,
            pending,
            producer,
            created: Instant::now(),
            tick: 0,
        }
    }

    /// Fire once: overwrite the scratch cell and request a drain
    pub fn fire(&mut self) -> FireOutcome {
        self.tick += 1;
        let tick = self.tick;
        let uptime = self.created.elapsed();

        let producer = &mut self.producer;
        let publish = self
            .writer
            .write_with(|out| producer.produce(tick, uptime, out));
        let schedule = self.pending.schedule();

        FireOutcome {
            tick,
            publish,
            schedule,
        }
    }

    /// Number of fires so far
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Spawn the trigger loop as a background task
    ///
    /// The first fire happens one `period` after spawning. The loop ends when
    /// `shutdown_rx` receives a message or its sender is dropped.
    pub fn spawn(self, period: Duration, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(period, shutdown_rx).await;
        })
    }

    async fn run(mut self, period: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(period_ms = period.as_millis() as u64, "Trigger armed");

        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!(ticks = self.tick, "Trigger disarmed");
                    break;
                }
                _ = interval.tick() => {
                    self.fire();
                }
            }
        }
    }
}

impl std::fmt::Debug for PeriodicTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTrigger")
            .field("tick", &self.tick)
            .field("scratch_capacity", &self.writer.capacity())
            .finish()
    }
}
