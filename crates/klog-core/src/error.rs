//! Error types for klog-core
//!
//! Every error is local to the call that produced it. A failed append leaves
//! the buffer exactly as it was, so the subsystem stays usable afterwards.

use thiserror::Error;

/// Errors that can occur in log buffer operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KlogError {
    /// Entry is larger than the configured maximum single-entry size
    #[error("Entry too large: {size} bytes exceeds limit of {limit}")]
    EntryTooLarge { size: usize, limit: usize },

    /// Backing storage for a grown buffer could not be allocated
    #[error("Out of memory: failed to allocate {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Growth would pass the configured absolute maximum capacity
    #[error("Capacity exceeded: {requested} bytes needed, maximum is {limit}")]
    CapacityExceeded { requested: usize, limit: usize },

    /// Bad seek target or other invalid caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration rejected at start
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KlogError {
    /// Create a new InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether a later call can succeed without any change to the subsystem
    ///
    /// An oversized entry can be retried smaller, and a failed growth may
    /// succeed once memory is available again. A configuration error is
    /// permanent for the configuration it came from.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EntryTooLarge { .. }
                | Self::OutOfMemory { .. }
                | Self::CapacityExceeded { .. }
                | Self::InvalidArgument(_)
        )
    }
}

impl From<KlogError> for std::io::Error {
    fn from(err: KlogError) -> Self {
        let kind = match &err {
            KlogError::InvalidArgument(_) | KlogError::EntryTooLarge { .. } => {
                std::io::ErrorKind::InvalidInput
            }
            KlogError::OutOfMemory { .. } | KlogError::CapacityExceeded { .. } => {
                std::io::ErrorKind::OutOfMemory
            }
            KlogError::Config(_) => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

/// Result type alias for klog operations
pub type KlogResult<T> = Result<T, KlogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_too_large_message() {
        let err = KlogError::EntryTooLarge { size: 40, limit: 32 };
        assert!(err.to_string().contains("40"));
        assert!(err.to_string().contains("32"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(KlogError::OutOfMemory { requested: 64 }.is_recoverable());
        assert!(KlogError::invalid_argument("negative offset").is_recoverable());
        assert!(!KlogError::config("zero period").is_recoverable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err: std::io::Error = KlogError::invalid_argument("seek before start").into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::InvalidInput);

        let io_err: std::io::Error = KlogError::CapacityExceeded {
            requested: 128,
            limit: 64,
        }
        .into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::OutOfMemory);
    }
}
