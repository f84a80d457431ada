//! Configuration for the log subsystem
//!
//! Supplied once at [`LogSubsystem::start`](crate::LogSubsystem::start) and
//! immutable afterwards. The growth factor is not configurable: capacity
//! always doubles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KlogError, KlogResult};

/// Upper bound for `scratch_capacity`.
///
/// The trigger formats entries into a stack buffer of this size, so it never
/// has to allocate.
pub const MAX_SCRATCH_CAPACITY: usize = 256;

/// Configuration for a [`LogSubsystem`](crate::LogSubsystem)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlogConfig {
    /// Capacity of the log buffer at start, in bytes
    pub initial_capacity: usize,
    /// Largest single entry accepted by `append`
    pub max_entry_size: usize,
    /// Absolute capacity ceiling; `None` lets the buffer grow until allocation fails
    pub max_capacity: Option<usize>,
    /// Size of the scratch cell between trigger and appender
    pub scratch_capacity: usize,
    /// Interval between trigger fires
    pub trigger_period: Duration,
    /// Entry appended once at start, before the trigger is armed
    pub banner: Option<String>,
}

impl Default for KlogConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 32,
            max_entry_size: 32,
            max_capacity: None,
            scratch_capacity: 64,
            trigger_period: Duration::from_secs(5),
            banner: Some("Hello, world!\n".to_string()),
        }
    }
}

impl KlogConfig {
    /// Fast trigger and roomy entries for tests
    pub fn testing() -> Self {
        Self {
            initial_capacity: 16,
            max_entry_size: 64,
            max_capacity: None,
            scratch_capacity: 64,
            trigger_period: Duration::from_millis(10),
            banner: None,
        }
    }

    /// Non-growing buffer of exactly `capacity` bytes
    ///
    /// Appends that do not fit fail with [`KlogError::CapacityExceeded`].
    pub fn fixed(capacity: usize) -> Self {
        Self {
            initial_capacity: capacity,
            max_capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Set the initial buffer capacity
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set the maximum single-entry size
    pub fn with_max_entry_size(mut self, size: usize) -> Self {
        self.max_entry_size = size;
        self
    }

    /// Set the absolute capacity ceiling
    pub fn with_max_capacity(mut self, capacity: Option<usize>) -> Self {
        self.max_capacity = capacity;
        self
    }

    /// Set the scratch cell capacity
    pub fn with_scratch_capacity(mut self, capacity: usize) -> Self {
        self.scratch_capacity = capacity;
        self
    }

    /// Set the trigger period
    pub fn with_trigger_period(mut self, period: Duration) -> Self {
        self.trigger_period = period;
        self
    }

    /// Set or clear the start-up banner
    pub fn with_banner(mut self, banner: Option<impl Into<String>>) -> Self {
        self.banner = banner.map(Into::into);
        self
    }

    /// Check that the configuration describes a usable subsystem
    pub fn validate(&self) -> KlogResult<()> {
        if self.initial_capacity == 0 {
            return Err(KlogError::config("initial_capacity must be non-zero"));
        }
        if self.max_entry_size == 0 {
            return Err(KlogError::config("max_entry_size must be non-zero"));
        }
        if self.scratch_capacity == 0 || self.scratch_capacity > MAX_SCRATCH_CAPACITY {
            return Err(KlogError::config(format!(
                "scratch_capacity must be between 1 and {MAX_SCRATCH_CAPACITY}, got {}",
                self.scratch_capacity
            )));
        }
        if self.trigger_period.is_zero() {
            return Err(KlogError::config("trigger_period must be non-zero"));
        }
        if let Some(max) = self.max_capacity {
            if max < self.initial_capacity {
                return Err(KlogError::config(format!(
                    "max_capacity {max} is below initial_capacity {}",
                    self.initial_capacity
                )));
            }
        }
        if let Some(banner) = &self.banner {
            if banner.len() > self.max_entry_size {
                return Err(KlogError::config(format!(
                    "banner is {} bytes, max_entry_size is {}",
                    banner.len(),
                    self.max_entry_size
                )));
            }
        }
        Ok(())
    }
}
