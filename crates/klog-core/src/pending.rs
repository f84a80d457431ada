//! Single-slot pending-work marker
//!
//! Records that a drain of the scratch cell is owed. Scheduling while a drain
//! is already owed is a no-op, so sustained fast firing never builds a queue:
//! there is at most one outstanding drain request at any time.
//!
//! [`PendingWork::schedule`] only flips an atomic flag and wakes the worker;
//! it never waits and never allocates, so the producer context may call it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Notify;

/// Result of a schedule request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// No drain was owed; the worker has been woken
    Queued,
    /// A drain was already owed; this request merged into it
    Coalesced,
}

/// Point-in-time counters for the pending slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingStats {
    /// Requests that queued a new drain
    pub queued: u64,
    /// Requests merged into an already-owed drain
    pub coalesced: u64,
}

/// Coalescing schedule slot shared by the trigger and the appender
#[derive(Debug, Default)]
pub struct PendingWork {
    owed: AtomicBool,
    notify: Notify,
    queued: AtomicU64,
    coalesced: AtomicU64,
}

impl PendingWork {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a drain
    pub fn schedule(&self) -> Schedule {
        if self.owed.swap(true, Ordering::AcqRel) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return Schedule::Coalesced;
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Schedule::Queued
    }

    /// Claim the owed drain, if any
    ///
    /// Clears the slot before the drain runs, so a fire that lands during the
    /// drain queues the next one instead of being merged into this one.
    pub fn claim(&self) -> bool {
        self.owed.swap(false, Ordering::AcqRel)
    }

    /// Whether a drain is currently owed
    pub fn is_owed(&self) -> bool {
        self.owed.load(Ordering::Acquire)
    }

    /// Wait until a drain has been requested
    ///
    /// Returns immediately if one is already owed. A wake-up from `schedule`
    /// that happened before this call is not lost: `Notify` keeps one permit.
    pub async fn wait(&self) {
        if self.is_owed() {
            return;
        }
        self.notify.notified().await;
    }

    /// Snapshot of the slot counters
    pub fn stats(&self) -> PendingStats {
        PendingStats {
            queued: self.queued.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}
