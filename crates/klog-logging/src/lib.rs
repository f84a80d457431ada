//! Structured logging setup for klog
//!
//! klog-core only emits `tracing` events, such as buffer growth and dropped
//! entries. This crate installs the subscriber that renders them,
//! as JSON lines or pretty text on stdout and optionally as JSON files rotated
//! by tracing-appender. `RUST_LOG` takes precedence over the configured levels.
//!
//! ```ignore
//! use klog_logging::{KlogSubscriberBuilder, LogConfig};
//!
//! let _guard = KlogSubscriberBuilder::new()
//!     .with_config(LogConfig::development().with_target("klog_core::appender", "trace"))
//!     .init()?;
//! ```
//!
//! Hold the returned guard while file output is needed; dropping it flushes
//! the background writer.

pub mod config;

pub use config::{ConsoleFormat, FileConfig, FileRotation, LogConfig};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory or file could not be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The rolling appender rejected its configuration
    #[error("Appender error: {0}")]
    Appender(String),

    /// A global subscriber is already installed
    #[error("Subscriber already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Installs the global subscriber for a [`LogConfig`]
///
/// JSON lines on stdout unless told otherwise.
pub struct KlogSubscriberBuilder {
    config: LogConfig,
}

impl KlogSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the level for targets without an override
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// Choose the console format, or turn the console off
    pub fn with_console(mut self, console: ConsoleFormat) -> Self {
        self.config.console = console;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer guard when file output is configured.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.filter_directives()));

        let config = &self.config;

        let pretty_console = match config.console {
            ConsoleFormat::Pretty { ansi } => Some(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(ansi)
                    .with_thread_names(config.thread_names),
            ),
            _ => None,
        };

        let json_console = (config.console == ConsoleFormat::Json).then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(config.span_list)
                .flatten_event(config.flatten_fields)
                .with_file(config.source_location)
                .with_line_number(config.source_location)
                .with_thread_names(config.thread_names)
        });

        let (file_layer, guard) = match &config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(config.span_list)
                    .flatten_event(config.flatten_fields)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location)
                    .with_thread_names(config.thread_names)
                    .with_writer(writer);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(env_filter)
            .with(pretty_console)
            .with(json_console)
            .with(file_layer)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }
}

impl Default for KlogSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the non-blocking file writer for a file configuration
///
/// `Never` truncates a single `<prefix>.log`; the other strategies append to
/// date-stamped files.
pub fn file_writer(file_config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&file_config.directory)?;

    let rotation = match file_config.rotation {
        FileRotation::Never => {
            let path = file_config
                .directory
                .join(format!("{}.log", file_config.prefix));
            let file = File::create(path)?;
            return Ok(tracing_appender::non_blocking(file));
        }
        FileRotation::Daily => Rotation::DAILY,
        FileRotation::Hourly => Rotation::HOURLY,
    };

    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&file_config.prefix)
        .filename_suffix("log")
        .build(&file_config.directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// JSON lines on stdout at info level
pub fn init_default() -> Result<(), LoggingError> {
    KlogSubscriberBuilder::new().init().map(|_| ())
}

/// Pretty colored console at debug level
pub fn init_development() -> Result<(), LoggingError> {
    KlogSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
        .map(|_| ())
}

/// Warnings only, for tests
///
/// Safe to call from many tests: a subscriber that is already installed is kept.
pub fn init_testing() {
    let _ = KlogSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}
