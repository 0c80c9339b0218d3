//! Structured logging setup for keeplog
//!
//! Wires the `tracing` ecosystem into a single global subscriber built from a
//! [`LogConfig`]: a console layer (pretty or JSON lines, on stderr), an
//! optional JSON lines file layer with rotation, and an [`EnvFilter`] built
//! from the configured levels unless `RUST_LOG` overrides it.
//!
//! # Quick Start
//!
//! ```ignore
//! use keeplog_logging::{LogConfig, SubscriberBuilder};
//!
//! // Pretty console output at info
//! let _guard = SubscriberBuilder::new().init();
//!
//! // Development mode, store internals at trace
//! let _guard = SubscriberBuilder::new()
//!     .with_config(LogConfig::development().with_target("keeplog_store", "trace"))
//!     .init();
//! ```
//!
//! Keep the returned guard alive for as long as file output is wanted; it
//! flushes the background writer on drop.

pub mod config;

pub use config::{ConsoleConfig, FileConfig, JsonConfig, LogConfig, RotationStrategy};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};
use std::str::FromStr;

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("Invalid filter: {0}")]
    Filter(String),

    #[error("Log file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to initialize logging: {0}")]
    Init(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    LevelFilter::from_str(level).map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}

/// Build the filter described by `config`
///
/// The default level comes first, followed by one `target=level` directive
/// per configured target.
pub fn build_filter(config: &LogConfig) -> Result<EnvFilter, LoggingError> {
    parse_level(&config.default_level)?;
    let mut directives = vec![config.default_level.clone()];
    for (target, level) in &config.targets {
        parse_level(level)?;
        directives.push(format!("{target}={level}"));
    }
    EnvFilter::try_new(directives.join(",")).map_err(|e| LoggingError::Filter(e.to_string()))
}

fn file_writer(file: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&file.directory)?;
    let rotation = match file.rotation {
        RotationStrategy::Never => {
            let path = file.directory.join(format!("{}.log", file.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file.prefix.as_str())
        .filename_suffix("log");
    if let Some(max) = file.max_files {
        builder = builder.max_log_files(max);
    }
    let appender = builder
        .build(&file.directory)
        .map_err(|e| LoggingError::Init(e.to_string()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Builder for configuring and installing the global subscriber
pub struct SubscriberBuilder {
    config: LogConfig,
    env_override: bool,
}

impl SubscriberBuilder {
    /// Create a new builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
            env_override: true,
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Whether a set `RUST_LOG` replaces the configured levels (default on)
    pub fn with_env_override(mut self, enabled: bool) -> Self {
        self.env_override = enabled;
        self
    }

    /// The configuration the subscriber will be built from
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        if self.env_override
            && let Ok(filter) = EnvFilter::try_from_default_env()
        {
            return Ok(filter);
        }
        build_filter(&self.config)
    }

    fn json_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        let json = &self.config.json;
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(json.include_spans)
            .flatten_event(json.flatten_events)
            .with_file(json.include_location)
            .with_line_number(json.include_location)
            .with_writer(writer)
            .boxed()
    }

    fn layers(&self) -> Result<(Vec<BoxedLayer>, Option<WorkerGuard>), LoggingError> {
        let mut layers = Vec::new();
        let mut guard = None;

        let console = &self.config.console;
        if console.enabled {
            let cap = match &console.level {
                Some(level) => parse_level(level)?,
                None => LevelFilter::TRACE,
            };
            let layer = if console.pretty {
                fmt::layer()
                    .with_ansi(console.ansi)
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .boxed()
            } else {
                self.json_layer(std::io::stderr)
            };
            layers.push(layer.with_filter(cap).boxed());
        }

        if let Some(file) = &self.config.file {
            let (writer, file_guard) = file_writer(file)?;
            layers.push(self.json_layer(writer));
            guard = Some(file_guard);
        }

        Ok((layers, guard))
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer guard when file output is configured. Fails
    /// if the configuration is invalid, the log file cannot be opened, or a
    /// global subscriber is already set.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = self.filter()?;
        let (layers, guard) = self.layers()?;
        Registry::default()
            .with(layers)
            .with(filter)
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))?;
        Ok(guard)
    }

    /// Install the subscriber globally, reporting failures on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: {e}");
                None
            }
        }
    }
}

impl Default for SubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging with default settings (pretty console at info)
pub fn init_default() {
    SubscriberBuilder::new().init();
}

/// Initialize logging for development (debug, pretty console)
pub fn init_development() {
    SubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Initialize logging for testing (warnings only, safe to call repeatedly)
pub fn init_testing() {
    let _ = SubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = SubscriberBuilder::new();
        assert_eq!(builder.config().default_level, "info");
        assert!(builder.env_override);
    }

    #[test]
    fn test_builder_with_config() {
        let builder = SubscriberBuilder::new().with_config(LogConfig::development());
        assert_eq!(builder.config().default_level, "debug");
        assert!(builder.config().console.pretty);
    }

    #[test]
    fn test_builder_with_level_and_console() {
        let builder = SubscriberBuilder::new().with_level("trace").with_console(false);
        assert_eq!(builder.config().default_level, "trace");
        assert!(!builder.config().console.enabled);
    }

    #[test]
    fn test_build_filter_with_targets() {
        let config = LogConfig::default().with_target("keeplog_store", "trace");
        let filter = build_filter(&config).unwrap().to_string();
        assert!(filter.contains("keeplog_store=trace"));
        assert!(filter.contains("info"));
    }

    #[test]
    fn test_build_filter_rejects_unknown_level() {
        let config = LogConfig::default().with_target("keeplog_store", "verbose");
        assert!(matches!(
            build_filter(&config),
            Err(LoggingError::InvalidLevel(level)) if level == "verbose"
        ));

        let config = LogConfig {
            default_level: "loud".into(),
            ..LogConfig::default()
        };
        assert!(build_filter(&config).is_err());
    }

    #[test]
    fn test_invalid_console_level_is_reported() {
        let mut config = LogConfig::default();
        config.console.level = Some("chatty".into());
        let builder = SubscriberBuilder::new().with_config(config);
        assert!(matches!(builder.layers(), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_layers_per_output() {
        let mut config = LogConfig::default();
        config.console.enabled = false;
        let (layers, guard) = SubscriberBuilder::new().with_config(config).layers().unwrap();
        assert!(layers.is_empty());
        assert!(guard.is_none());

        let (layers, _) = SubscriberBuilder::new().layers().unwrap();
        assert_eq!(layers.len(), 1);
    }
}
