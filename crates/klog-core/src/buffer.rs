//! Growable append-only log buffer
//!
//! The buffer holds every committed entry back to back. Bytes in
//! `[0, committed_offset)` are never rewritten; appends only extend the
//! committed region.
//!
//! ## Growth
//!
//! When an append does not fit, capacity doubles (repeatedly, if one doubling
//! is not enough) up to the optional ceiling. Growth is move-on-grow: a new
//! allocation is reserved, the committed prefix is copied into it, the new
//! storage is swapped in, and only then is the old allocation dropped. All of
//! it happens under the write lock, so a reader holding the read lock never
//! sees storage that is being released.
//!
//! An append either commits all of its bytes or none of them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::KlogConfig;
use crate::error::{KlogError, KlogResult};

/// Backing storage. `bytes.len()` is the committed offset.
struct Storage {
    bytes: Vec<u8>,
    /// Logical capacity; the Vec may have reserved more
    capacity: usize,
}

#[derive(Debug, Default)]
struct BufferCounters {
    entries: AtomicU64,
    bytes: AtomicU64,
    growths: AtomicU64,
    rejected_too_large: AtomicU64,
    allocation_failures: AtomicU64,
    capacity_exceeded: AtomicU64,
}

/// Point-in-time counters for a [`LogBuffer`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// Entries committed
    pub entries: u64,
    /// Bytes committed
    pub bytes: u64,
    /// Number of times the storage was reallocated
    pub growths: u64,
    /// Appends rejected with `EntryTooLarge`
    pub rejected_too_large: u64,
    /// Appends rejected with `OutOfMemory`
    pub allocation_failures: u64,
    /// Appends rejected with `CapacityExceeded`
    pub capacity_exceeded: u64,
    /// Current logical capacity
    pub capacity: usize,
    /// Current committed offset
    pub committed: usize,
}

/// Append-only byte buffer that doubles its capacity when full
pub struct LogBuffer {
    storage: RwLock<Storage>,
    /// Mirror of `storage.bytes.len()`, published after each commit
    committed: AtomicUsize,
    max_entry_size: usize,
    max_capacity: Option<usize>,
    counters: BufferCounters,
    #[cfg(test)]
    fail_next_growth: std::sync::atomic::AtomicBool,
}

impl LogBuffer {
    /// Create a buffer with `initial_capacity` bytes reserved
    ///
    /// Fails with [`KlogError::Config`] if `max_capacity` is below
    /// `initial_capacity`, since the ceiling would not hold for appends that
    /// fit the first allocation.
    pub fn new(
        initial_capacity: usize,
        max_entry_size: usize,
        max_capacity: Option<usize>,
    ) -> KlogResult<Self> {
        if let Some(limit) = max_capacity {
            if limit < initial_capacity {
                return Err(KlogError::config(format!(
                    "max_capacity {limit} is below initial_capacity {initial_capacity}"
                )));
            }
        }

        let bytes = allocate(initial_capacity)?;
        debug!(initial_capacity, max_entry_size, ?max_capacity, "Log buffer allocated");

        Ok(Self {
            storage: RwLock::new(Storage {
                bytes,
                capacity: initial_capacity,
            }),
            committed: AtomicUsize::new(0),
            max_entry_size,
            max_capacity,
            counters: BufferCounters::default(),
            #[cfg(test)]
            fail_next_growth: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Create a buffer from the sizing fields of a configuration
    pub fn from_config(config: &KlogConfig) -> KlogResult<Self> {
        Self::new(
            config.initial_capacity,
            config.max_entry_size,
            config.max_capacity,
        )
    }

    /// Append `data` to the committed region
    ///
    /// Returns the number of bytes written, always `data.len()` on success.
    pub fn append(&self, data: &[u8]) -> KlogResult<usize> {
        if data.len() > self.max_entry_size {
            self.counters
                .rejected_too_large
                .fetch_add(1, Ordering::Relaxed);
            return Err(KlogError::EntryTooLarge {
                size: data.len(),
                limit: self.max_entry_size,
            });
        }

        let mut storage = self.storage.write();
        let committed = storage.bytes.len();

        let required = match committed.checked_add(data.len()) {
            Some(required) => required,
            None => {
                self.counters
                    .capacity_exceeded
                    .fetch_add(1, Ordering::Relaxed);
                return Err(KlogError::CapacityExceeded {
                    requested: usize::MAX,
                    limit: self.max_capacity.unwrap_or(usize::MAX),
                });
            }
        };

        if required > storage.capacity {
            self.grow(&mut storage, required)?;
        }

        // Fits in the reserved allocation, so this never reallocates.
        storage.bytes.extend_from_slice(data);
        self.committed.store(storage.bytes.len(), Ordering::Release);

        self.counters.entries.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        Ok(data.len())
    }

    /// Replace the storage with one of at least `required` bytes
    ///
    /// Leaves `storage` untouched on failure.
    fn grow(&self, storage: &mut Storage, required: usize) -> KlogResult<()> {
        let mut new_capacity = storage.capacity.max(1);
        while new_capacity < required {
            new_capacity = new_capacity.saturating_mul(2);
        }

        if let Some(limit) = self.max_capacity {
            if required > limit {
                self.counters
                    .capacity_exceeded
                    .fetch_add(1, Ordering::Relaxed);
                warn!(required, limit, "Log buffer full");
                return Err(KlogError::CapacityExceeded {
                    requested: required,
                    limit,
                });
            }
            new_capacity = new_capacity.min(limit);
        }

        #[cfg(test)]
        if self
            .fail_next_growth
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            self.counters
                .allocation_failures
                .fetch_add(1, Ordering::Relaxed);
            return Err(KlogError::OutOfMemory {
                requested: new_capacity,
            });
        }

        let mut next = match allocate(new_capacity) {
            Ok(next) => next,
            Err(e) => {
                self.counters
                    .allocation_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    old_capacity = storage.capacity,
                    new_capacity, "Failed to grow log buffer"
                );
                return Err(e);
            }
        };
        next.extend_from_slice(&storage.bytes);

        let old_capacity = storage.capacity;
        let old = std::mem::replace(&mut storage.bytes, next);
        storage.capacity = new_capacity;
        drop(old);

        self.counters.growths.fetch_add(1, Ordering::Relaxed);
        debug!(old_capacity, new_capacity, "Log buffer grown");
        Ok(())
    }

    /// Copy up to `max_len` committed bytes starting at `offset`
    ///
    /// Returns an empty buffer at or past the end of the committed region.
    pub fn read_at(&self, offset: u64, max_len: usize) -> Bytes {
        let storage = self.storage.read();
        match committed_range(storage.bytes.len(), offset, max_len) {
            Some((start, end)) => Bytes::copy_from_slice(&storage.bytes[start..end]),
            None => Bytes::new(),
        }
    }

    /// Copy committed bytes starting at `offset` into `buf`
    ///
    /// Returns how many bytes were copied; zero means end of stream.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> usize {
        let storage = self.storage.read();
        match committed_range(storage.bytes.len(), offset, buf.len()) {
            Some((start, end)) => {
                let n = end - start;
                buf[..n].copy_from_slice(&storage.bytes[start..end]);
                n
            }
            None => 0,
        }
    }

    /// Copy the whole committed region
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.storage.read().bytes)
    }

    /// Number of committed bytes
    pub fn committed_offset(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    /// Current logical capacity
    pub fn capacity(&self) -> usize {
        self.storage.read().capacity
    }

    /// Largest entry `append` accepts
    pub fn max_entry_size(&self) -> usize {
        self.max_entry_size
    }

    /// Snapshot of the buffer counters
    pub fn stats(&self) -> BufferStats {
        let (capacity, committed) = {
            let storage = self.storage.read();
            (storage.capacity, storage.bytes.len())
        };
        BufferStats {
            entries: self.counters.entries.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            growths: self.counters.growths.load(Ordering::Relaxed),
            rejected_too_large: self.counters.rejected_too_large.load(Ordering::Relaxed),
            allocation_failures: self.counters.allocation_failures.load(Ordering::Relaxed),
            capacity_exceeded: self.counters.capacity_exceeded.load(Ordering::Relaxed),
            capacity,
            committed,
        }
    }
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.read();
        f.debug_struct("LogBuffer")
            .field("capacity", &storage.capacity)
            .field("committed", &storage.bytes.len())
            .field("max_entry_size", &self.max_entry_size)
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}

fn allocate(capacity: usize) -> KlogResult<Vec<u8>> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(capacity)
        .map_err(|_| KlogError::OutOfMemory {
            requested: capacity,
        })?;
    Ok(bytes)
}

/// Clamp a read request to the committed region
fn committed_range(committed: usize, offset: u64, max_len: usize) -> Option<(usize, usize)> {
    if offset >= committed as u64 || max_len == 0 {
        return None;
    }
    let start = offset as usize;
    let end = start + max_len.min(committed - start);
    Some((start, end))
}
