//! Logging infrastructure for the payment connector
//!
//! This module wires the `log` facade to an `env_logger` backend with either a
//! human-readable or a JSON line format:
//! - Addresses, txids and invoices are truncated before being logged
//! - Log events carry a context tag naming the subsystem that emitted them
//! - Node credentials are never logged
//!
//! # Usage
//!
//! ```
//! use connector_common::logging::{self, LogConfig, LogContext, LogLevel};
//! use serde_json::json;
//!
//! logging::init(&LogConfig::default()).expect("Failed to initialize logging");
//!
//! logging::log_event(
//!     LogLevel::Info,
//!     LogContext::Crafting,
//!     "transaction crafted",
//!     Some(json!({"inputs": 2})),
//! );
//! ```

use chrono::Local;
use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::sync::Once;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Error conditions
    Error,
    /// Warning conditions
    Warn,
    /// Informational messages
    Info,
    /// Debug-level messages
    Debug,
    /// Trace level (very verbose)
    Trace,
}

/// Log context categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogContext {
    /// Coin selection and transaction crafting
    Crafting,
    /// Node RPC traffic
    Node,
    /// Lightning node operations
    Lightning,
    /// Incoming payment tracking
    Watcher,
    /// Configuration loading and validation
    Config,
}

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log level for all contexts
    #[serde(default = "default_level")]
    pub level: LogLevel,
    /// Path to log file (None for console-only)
    #[serde(default)]
    pub log_file: Option<String>,
    /// Whether to include timestamps in log messages
    #[serde(default = "default_true")]
    pub include_timestamps: bool,
    /// Whether to include source location in log messages
    #[serde(default = "default_true")]
    pub include_source_location: bool,
    /// Whether to use JSON format for logs (machine-readable)
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_file: None,
            include_timestamps: true,
            include_source_location: true,
            json_format: false,
        }
    }
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

fn default_true() -> bool {
    true
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

static LOGGING_INIT: Once = Once::new();

/// Initialize the logging system with the given configuration
///
/// Only the first call installs a logger. Later calls return Ok without
/// touching the installed one, which keeps test binaries that initialize
/// from many tests working.
///
/// # Errors
/// Returns a description of the failure when the log file cannot be opened
/// or another logger implementation was installed first.
pub fn init(config: &LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    let include_timestamps = config.include_timestamps;
    let include_source_location = config.include_source_location;
    let json_format = config.json_format;
    let log_file = config.log_file.clone();
    let level = config.level;

    LOGGING_INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level.into());

        builder.format(move |buf, record| {
            let timestamp = if include_timestamps {
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
            } else {
                String::new()
            };

            let source_location = if include_source_location {
                format!(
                    " [{}:{}]",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0)
                )
            } else {
                String::new()
            };

            if json_format {
                let line = json!({
                    "timestamp": timestamp,
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "location": source_location.trim(),
                    "message": record.args().to_string(),
                });
                writeln!(buf, "{}", line)
            } else {
                let mut style = buf.style();
                style.set_bold(true);
                if include_timestamps {
                    write!(buf, "{} ", timestamp)?;
                }
                writeln!(
                    buf,
                    "[{}{}] {}",
                    style.value(record.level()),
                    source_location,
                    record.args()
                )
            }
        });

        if let Some(file_path) = &log_file {
            match OpenOptions::new().create(true).append(true).open(file_path) {
                Ok(file) => {
                    builder.target(env_logger::Target::Pipe(Box::new(file)));
                }
                Err(e) => {
                    result = Err(format!("Failed to open log file {}: {}", file_path, e));
                    return;
                }
            }
        }

        if let Err(e) = builder.try_init() {
            if e.to_string().contains("already been initialized") {
                debug!("Logger already initialized, using existing instance");
            } else {
                result = Err(e.to_string());
            }
        }
    });

    result
}

/// Truncate a public but identifying value (address, txid, invoice) for logging
///
/// Keeps the first and last four characters. Values of eight characters or
/// fewer are masked entirely.
pub fn sanitize_for_logging(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    if len <= 8 {
        return "*****".to_string();
    }

    let first: String = chars[..4].iter().collect();
    let last: String = chars[len - 4..].iter().collect();
    format!("{}...{}", first, last)
}

/// Log an event tagged with its context
///
/// String parameter values are sanitized; numbers and booleans are logged
/// as they are.
pub fn log_event(
    level: LogLevel,
    context: LogContext,
    message: &str,
    params: Option<serde_json::Value>,
) {
    let sanitized_params = params.map(|p| match p {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => (k, json!(sanitize_for_logging(&s))),
                    other => (k, other),
                })
                .collect(),
        ),
        other => other,
    });

    match sanitized_params {
        Some(params) => log::log!(level.into(), "[{:?}] {} {}", context, message, params),
        None => log::log!(level.into(), "[{:?}] {}", context, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging(""), "");
        assert_eq!(sanitize_for_logging("short"), "*****");
        assert_eq!(sanitize_for_logging("12345678"), "*****");
        assert_eq!(
            sanitize_for_logging("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            "1A1z...vfNa"
        );
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig {
            level: LogLevel::Debug,
            ..LogConfig::default()
        };
        assert!(init(&config).is_ok());
        assert!(init(&config).is_ok());
        log_event(LogLevel::Debug, LogContext::Config, "logger ready", None);
    }
}
