//! Logging
//!
//! `tracing` subscriber setup and request/response log helpers. Library code
//! only emits events; installing a subscriber is left to the application.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::sanitize_message;

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, with colors.
    Pretty,
    /// One JSON object per line.
    Json,
    /// Single-line text.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level; `RUST_LOG` directives are added on top.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Include the module target.
    pub include_target: bool,
    /// Include file and line number.
    pub include_file_line: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            include_target: true,
            include_file_line: false,
        }
    }
}

impl LoggingConfig {
    /// Create new logging configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set whether to include the module target.
    pub fn with_target(mut self, include: bool) -> Self {
        self.include_target = include;
        self
    }

    /// Set whether to include file and line number.
    pub fn with_file_line(mut self, include: bool) -> Self {
        self.include_file_line = include;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::from_default_env().add_directive(LevelFilter::from(self.level).into())
    }
}

/// Install a global `tracing` subscriber.
///
/// Fails if a subscriber has already been installed.
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = config.filter();

    match config.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_ansi(true)
                        .with_target(config.include_target)
                        .with_file(config.include_file_line)
                        .with_line_number(config.include_file_line),
                )
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(config.include_target))
                .try_init()?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_target(config.include_target))
                .try_init()?;
        }
    }

    Ok(())
}

/// Log an outgoing request. Query strings are not logged.
pub fn log_request(method: &str, url: &str, attempt: u32) {
    let path = url.split('?').next().unwrap_or(url);
    tracing::debug!(method, path, attempt, "Outgoing request");
}

/// Log a received response. The body is sanitized and truncated.
pub fn log_response(status: u16, duration_ms: u64, body: &str) {
    tracing::debug!(
        status,
        duration_ms,
        body = %if body.is_empty() { "<empty>".to_string() } else { sanitize_message(body) },
        "Incoming response"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.include_target);
        assert!(!config.include_file_line);
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .with_level(LogLevel::Debug)
            .with_format(LogFormat::Json)
            .with_target(false)
            .with_file_line(true);
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert!(!config.include_target);
        assert!(config.include_file_line);
    }

    #[test]
    fn test_level_conversion() {
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::WARN);
        assert!(LogLevel::Trace < LogLevel::Error);
    }

    #[test]
    fn test_init_logging_twice_fails() {
        let _ = init_logging(LoggingConfig::new().with_format(LogFormat::Compact));
        assert!(init_logging(LoggingConfig::new()).is_err());
    }

    #[test]
    fn test_log_helpers_do_not_panic() {
        log_request("GET", "https://demo.sharedo.tech/api/x?secret=1", 0);
        log_response(200, 12, r#"{"access_token":"abc"}"#);
        log_response(204, 3, "");
    }
}
