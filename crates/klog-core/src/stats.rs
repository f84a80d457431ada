//! Subsystem-wide statistics

use serde::Serialize;

use crate::appender::AppenderStats;
use crate::buffer::BufferStats;
use crate::pending::PendingStats;
use crate::scratch::ScratchStats;

/// Snapshot of every counter in a running subsystem
///
/// Each group is read separately, so a snapshot taken while the subsystem
/// runs may be off by one entry between groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KlogStats {
    /// Producer side: entries written, lost to the scratch race, truncated
    pub scratch: ScratchStats,
    /// Drain requests queued and coalesced
    pub pending: PendingStats,
    /// Worker side: drains run, entries committed and dropped
    pub appender: AppenderStats,
    /// Buffer growth, rejections, capacity and committed offset
    pub buffer: BufferStats,
}

impl KlogStats {
    /// Trigger fires so far
    pub fn ticks(&self) -> u64 {
        self.scratch.published
    }

    /// Entries lost because the trigger overwrote them before a drain
    pub fn superseded(&self) -> u64 {
        self.scratch.superseded
    }

    /// Produced entries that never reached the buffer, for any reason
    pub fn lost(&self) -> u64 {
        self.scratch.superseded + self.appender.dropped
    }
}
