//! Single-slot scratch cell between the trigger and the appender
//!
//! The cell holds at most one entry. The trigger overwrites it on every fire
//! and the appender copies it out on every drain. No lock spans the two
//! sides: the trigger must never wait on the appender, which may itself be
//! blocked growing the buffer.
//!
//! ## Accepted loss
//!
//! If the trigger fires again before the appender has drained the previous
//! entry, the previous entry is overwritten and lost. Each such overwrite is
//! counted in [`ScratchStats::superseded`]. At most one entry is lost per
//! unserved fire. Every access is bounded by the fixed capacity, so losing an
//! entry never means reading or writing out of bounds.
//!
//! ## Torn reads
//!
//! The cell is a single-writer sequence lock. The writer makes the sequence
//! odd while it copies bytes in and even again when done. The reader copies
//! the bytes out and keeps them only if the sequence was even and unchanged
//! across the copy, so a drain never commits a mixture of two entries. The
//! writer side never waits.
//!
//! The two halves are separate types. [`ScratchWriter`] and [`ScratchReader`]
//! are not `Clone` and mutate through `&mut self`, so there is exactly one
//! producer and one consumer.

use std::fmt;
use std::sync::atomic::{fence, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::config::MAX_SCRATCH_CAPACITY;

/// Spins before the reader starts yielding to a writer caught mid-write
const SPINS_BEFORE_YIELD: u32 = 64;

struct ScratchCell {
    data: Box<[AtomicU8]>,
    len: AtomicUsize,
    /// Even when stable; bumped by two per publish
    seq: AtomicU64,
    /// Last `seq` the reader delivered
    drained: AtomicU64,
    published: AtomicU64,
    superseded: AtomicU64,
    truncated: AtomicU64,
}

/// Point-in-time counters for the scratch cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScratchStats {
    /// Entries written by the producer
    pub published: u64,
    /// Entries overwritten before any drain picked them up
    ///
    /// Exact when drains do not overlap a fire; a drain racing a fire can
    /// shift one count between this and a delivered entry.
    pub superseded: u64,
    /// Entries cut short at the scratch capacity
    pub truncated: u64,
}

/// Create a scratch cell of `capacity` bytes and return its two halves
///
/// `capacity` is clamped to [`MAX_SCRATCH_CAPACITY`].
pub fn scratch_cell(capacity: usize) -> (ScratchWriter, ScratchReader) {
    let capacity = capacity.min(MAX_SCRATCH_CAPACITY);
    let data = (0..capacity).map(|_| AtomicU8::new(0)).collect();
    let cell = Arc::new(ScratchCell {
        data,
        len: AtomicUsize::new(0),
        seq: AtomicU64::new(0),
        drained: AtomicU64::new(0),
        published: AtomicU64::new(0),
        superseded: AtomicU64::new(0),
        truncated: AtomicU64::new(0),
    });
    (
        ScratchWriter { cell: cell.clone() },
        ScratchReader { cell },
    )
}

/// Whether a publish replaced an entry nobody had drained yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The cell was empty or already drained
    Fresh,
    /// An undrained entry was overwritten and lost
    Superseded,
}

/// Producer half of the scratch cell
pub struct ScratchWriter {
    cell: Arc<ScratchCell>,
}

impl ScratchWriter {
    /// Format an entry straight into the cell
    ///
    /// The entry is built in a stack buffer of the cell's capacity; output
    /// that does not fit is cut off, like `snprintf`. Never allocates.
    pub fn write_with<F>(&mut self, format: F) -> PublishOutcome
    where
        F: FnOnce(&mut EntryWriter<'_>) -> fmt::Result,
    {
        let mut stack = [0u8; MAX_SCRATCH_CAPACITY];
        let capacity = self.cell.data.len();
        let mut writer = EntryWriter::new(&mut stack[..capacity]);
        // A formatting error only means the entry is incomplete; keep what was written.
        let _ = format(&mut writer);
        let (len, truncated) = (writer.len, writer.truncated);
        self.store(&stack[..len], truncated)
    }

    /// Copy `entry` into the cell, cutting it off at capacity
    pub fn publish(&mut self, entry: &[u8]) -> PublishOutcome {
        let capacity = self.cell.data.len();
        let truncated = entry.len() > capacity;
        self.store(&entry[..entry.len().min(capacity)], truncated)
    }

    fn store(&mut self, entry: &[u8], truncated: bool) -> PublishOutcome {
        let cell = &*self.cell;
        let seq = cell.seq.load(Ordering::Relaxed);
        let outcome = if cell.drained.load(Ordering::Acquire) != seq {
            cell.superseded.fetch_add(1, Ordering::Relaxed);
            PublishOutcome::Superseded
        } else {
            PublishOutcome::Fresh
        };

        cell.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        for (slot, byte) in cell.data.iter().zip(entry) {
            slot.store(*byte, Ordering::Relaxed);
        }
        cell.len.store(entry.len(), Ordering::Relaxed);

        cell.seq.store(seq.wrapping_add(2), Ordering::Release);

        cell.published.fetch_add(1, Ordering::Relaxed);
        if truncated {
            cell.truncated.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Capacity of the cell in bytes
    pub fn capacity(&self) -> usize {
        self.cell.data.len()
    }
}

/// Consumer half of the scratch cell
pub struct ScratchReader {
    cell: Arc<ScratchCell>,
}

impl ScratchReader {
    /// Take the current entry if it has not been delivered yet
    ///
    /// Returns `None` when nothing new was published since the last take.
    /// If the producer overwrites the cell during the copy, the copy is
    /// retried and the newer entry is returned instead.
    pub fn take(&mut self) -> Option<Bytes> {
        let (seq, entry) = self.read_stable()?;
        self.cell.drained.store(seq, Ordering::Release);
        Some(entry)
    }

    /// Look at the current entry without marking it delivered
    pub fn peek(&self) -> Option<Bytes> {
        self.read_stable().map(|(_, entry)| entry)
    }

    /// Whether an undelivered entry is waiting
    pub fn has_pending(&self) -> bool {
        self.cell.seq.load(Ordering::Acquire) != self.cell.drained.load(Ordering::Relaxed)
    }

    /// Snapshot of the cell counters
    pub fn stats(&self) -> ScratchStats {
        self.cell.stats()
    }

    /// Read-only handle for counters, usable after the reader has moved into a task
    pub fn observer(&self) -> ScratchObserver {
        ScratchObserver {
            cell: self.cell.clone(),
        }
    }

    fn read_stable(&self) -> Option<(u64, Bytes)> {
        let cell = &*self.cell;
        let mut spins = 0u32;
        loop {
            let before = cell.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                backoff(&mut spins);
                continue;
            }
            if before == cell.drained.load(Ordering::Relaxed) {
                return None;
            }

            let len = cell.len.load(Ordering::Relaxed).min(cell.data.len());
            let copy: Vec<u8> = cell.data[..len]
                .iter()
                .map(|slot| slot.load(Ordering::Relaxed))
                .collect();

            fence(Ordering::Acquire);
            if cell.seq.load(Ordering::Relaxed) == before {
                return Some((before, Bytes::from(copy)));
            }
            backoff(&mut spins);
        }
    }
}

/// Counter-only view of a scratch cell
#[derive(Clone)]
pub struct ScratchObserver {
    cell: Arc<ScratchCell>,
}

impl ScratchObserver {
    /// Snapshot of the cell counters
    pub fn stats(&self) -> ScratchStats {
        self.cell.stats()
    }
}

impl fmt::Debug for ScratchObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchObserver")
            .field("capacity", &self.cell.data.len())
            .field("stats", &self.cell.stats())
            .finish()
    }
}

impl ScratchCell {
    fn stats(&self) -> ScratchStats {
        ScratchStats {
            published: self.published.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
        }
    }
}

fn backoff(spins: &mut u32) {
    if *spins < SPINS_BEFORE_YIELD {
        *spins += 1;
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}

/// Fixed-capacity formatter handed to entry producers
///
/// Writes past the end are dropped and the entry is marked truncated.
pub struct EntryWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    truncated: bool,
}

impl<'a> EntryWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            truncated: false,
        }
    }

    /// Append raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let room = self.buf.len() - self.len;
        let n = bytes.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        if n < bytes.len() {
            self.truncated = true;
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes left before truncation
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }
}

impl fmt::Write for EntryWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write;

    #[test]
    fn test_empty_cell_has_nothing_to_take() {
        let (_writer, mut reader) = scratch_cell(64);
        assert!(!reader.has_pending());
        assert!(reader.take().is_none());
    }

    #[test]
    fn test_publish_then_take() {
        let (mut writer, mut reader) = scratch_cell(64);
        assert_eq!(writer.publish(b"Timer 1 hit\n"), PublishOutcome::Fresh);
        assert!(reader.has_pending());

        assert_eq!(reader.take().unwrap(), Bytes::from_static(b"Timer 1 hit\n"));
        assert!(reader.take().is_none());
        assert!(!reader.has_pending());
    }

    #[test]
    fn test_second_publish_supersedes_first() {
        let (mut writer, mut reader) = scratch_cell(64);
        writer.publish(b"Timer 1 hit\n");
        assert_eq!(writer.publish(b"Timer 2 hit\n"), PublishOutcome::Superseded);

        assert_eq!(reader.peek().unwrap(), Bytes::from_static(b"Timer 2 hit\n"));
        assert_eq!(reader.take().unwrap(), Bytes::from_static(b"Timer 2 hit\n"));
        assert!(reader.take().is_none());

        let stats = reader.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.superseded, 1);
    }

    #[test]
    fn test_shorter_entry_replaces_longer_one() {
        let (mut writer, mut reader) = scratch_cell(64);
        writer.publish(b"a much longer entry\n");
        reader.take();
        writer.publish(b"short\n");
        assert_eq!(reader.take().unwrap(), Bytes::from_static(b"short\n"));
    }

    #[test]
    fn test_publish_truncates_at_capacity() {
        let (mut writer, mut reader) = scratch_cell(4);
        writer.publish(b"abcdefgh");
        assert_eq!(reader.take().unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(reader.stats().truncated, 1);
    }

    #[test]
    fn test_write_with_formats_in_place() {
        let (mut writer, mut reader) = scratch_cell(64);
        writer.write_with(|w| writeln!(w, "Timer {} hit", 42));
        assert_eq!(reader.take().unwrap(), Bytes::from_static(b"Timer 42 hit\n"));
    }

    #[test]
    fn test_write_with_truncates_like_snprintf() {
        let (mut writer, mut reader) = scratch_cell(8);
        writer.write_with(|w| {
            writeln!(w, "Timer {} hit", 12345)?;
            assert_eq!(w.remaining(), 0);
            Ok(())
        });
        assert_eq!(reader.take().unwrap(), Bytes::from_static(b"Timer 12"));
        assert_eq!(reader.stats().truncated, 1);
    }

    #[test]
    fn test_capacity_is_clamped() {
        let (writer, _reader) = scratch_cell(MAX_SCRATCH_CAPACITY * 4);
        assert_eq!(writer.capacity(), MAX_SCRATCH_CAPACITY);
    }

    #[test]
    fn test_concurrent_publish_never_tears() {
        let (mut writer, mut reader) = scratch_cell(32);

        let producer = std::thread::spawn(move || {
            for i in 0..20_000u32 {
                let byte = b'a' + (i % 26) as u8;
                let len = 1 + (i % 31) as usize;
                writer.publish(&vec![byte; len]);
            }
        });

        let mut delivered = 0;
        while !producer.is_finished() || reader.has_pending() {
            if let Some(entry) = reader.take() {
                let first = entry[0];
                assert!(entry.iter().all(|b| *b == first), "torn entry: {entry:?}");
                delivered += 1;
            }
        }
        producer.join().unwrap();

        let stats = reader.stats();
        assert_eq!(stats.published, 20_000);
        assert!(delivered >= 1);
        assert!(delivered <= 20_000);
    }
}
