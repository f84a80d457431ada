//! # klog-core
//!
//! Growable append-only log buffer fed by a periodic trigger.
//!
//! The log has three execution contexts:
//! - a periodic trigger that must never block, lock or allocate
//! - a deferred appender that moves entries into the buffer and may block
//! - any number of readers with their own cursors
//!
//! The trigger formats each entry into a fixed-size [scratch cell](scratch_cell)
//! and schedules a drain on a single-slot [`PendingWork`]. The appender claims
//! the drain, copies the entry out and appends it to the [`LogBuffer`], which
//! doubles its storage as needed. A second fire before a drain overwrites the
//! first entry: that loss is counted, never hidden.
//!
//! ## Example
//!
//! ```rust,ignore
//! use klog_core::{KlogConfig, LogSubsystem, Whence};
//!
//! let log = LogSubsystem::start(KlogConfig::default()).await?;
//!
//! let mut reader = log.reader();
//! reader.seek(-14, Whence::End)?;
//! let tail = reader.read(14);
//!
//! let stats = log.stop().await?;
//! println!("{} ticks, {} superseded", stats.ticks(), stats.superseded());
//! ```

pub mod appender;
pub mod buffer;
pub mod config;
pub mod error;
pub mod pending;
pub mod reader;
pub mod scratch;
mod stats;
mod subsystem;
pub mod trigger;

pub use appender::{AppenderCounters, AppenderStats, DeferredAppender};
pub use buffer::{BufferStats, LogBuffer};
pub use config::{KlogConfig, MAX_SCRATCH_CAPACITY};
pub use error::{KlogError, KlogResult};
pub use pending::{PendingStats, PendingWork, Schedule};
pub use reader::{LogReader, Whence};
pub use scratch::{
    scratch_cell, EntryWriter, PublishOutcome, ScratchObserver, ScratchReader, ScratchStats,
    ScratchWriter,
};
pub use stats::KlogStats;
pub use subsystem::LogSubsystem;
pub use trigger::{producer_fn, EntryProducer, FireOutcome, PeriodicTrigger, TimerEntries};
