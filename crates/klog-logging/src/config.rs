//! Where klog's `tracing` events go and how they are rendered

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Subscriber settings read by [`KlogSubscriberBuilder::init`](crate::KlogSubscriberBuilder::init)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for every target without an override; `RUST_LOG` replaces both
    pub level: String,
    /// Per-target levels, e.g. `klog_core::appender = "trace"`
    pub targets: BTreeMap<String, String>,
    /// Console output
    pub console: ConsoleFormat,
    /// JSON file output, if any
    pub file: Option<FileConfig>,
    /// Put event fields at the top level of each JSON line
    pub flatten_fields: bool,
    /// Add the enclosing spans to JSON lines (`start`/`stop` are instrumented)
    pub span_list: bool,
    /// Add file and line to JSON lines
    pub source_location: bool,
    /// Add thread names, so trigger and appender events can be told apart
    pub thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: BTreeMap::new(),
            console: ConsoleFormat::Json,
            file: None,
            flatten_fields: true,
            span_list: true,
            source_location: true,
            thread_names: false,
        }
    }
}

impl LogConfig {
    /// Colored human-readable console at debug level
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleFormat::Pretty { ansi: true },
            ..Default::default()
        }
    }

    /// Daily-rotated `klog.*.log` files under `log_dir`, nothing on the console
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: ConsoleFormat::Off,
            file: Some(FileConfig::new(log_dir)),
            ..Default::default()
        }
    }

    /// Warnings only, plain JSON, so test output stays readable
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            source_location: false,
            ..Default::default()
        }
    }

    /// Override the level of one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// `EnvFilter` directives for the level and the target overrides
    pub fn filter_directives(&self) -> String {
        let mut directives = self.level.clone();
        for (target, level) in &self.targets {
            directives.push_str(&format!(",{target}={level}"));
        }
        directives
    }
}

/// How events are written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleFormat {
    /// No console output
    Off,
    /// One JSON object per line
    Json,
    /// Multi-line human-readable output
    Pretty { ansi: bool },
}

/// JSON log files written through a non-blocking appender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    pub prefix: String,
    pub rotation: FileRotation,
}

impl FileConfig {
    /// Daily `klog` files in `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "klog".to_string(),
            rotation: FileRotation::Daily,
        }
    }
}

/// When a new log file is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRotation {
    /// One `<prefix>.log`, truncated when the subscriber is installed
    Never,
    Hourly,
    #[default]
    Daily,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_json_console() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.console, ConsoleFormat::Json);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_development_is_pretty() {
        let config = LogConfig::development();
        assert_eq!(config.level, "debug");
        assert_eq!(config.console, ConsoleFormat::Pretty { ansi: true });
    }

    #[test]
    fn test_production_writes_files_only() {
        let config = LogConfig::production(PathBuf::from("/var/log/klog"));
        assert_eq!(config.console, ConsoleFormat::Off);

        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/klog"));
        assert_eq!(file.prefix, "klog");
        assert_eq!(file.rotation, FileRotation::Daily);
    }

    #[test]
    fn test_filter_directives() {
        let config = LogConfig::testing()
            .with_target("klog_core::appender", "trace")
            .with_target("klog_core::buffer", "debug");
        assert_eq!(
            config.filter_directives(),
            "warn,klog_core::appender=trace,klog_core::buffer=debug"
        );
    }
}
