//! Logging configuration and initialization
//!
//! Compile milestones (extractor, builders, budget, pool) log at `info`,
//! per-stage detail at `debug` and per-buffer/per-lease events at `trace`.
//! The subscriber prints human-readable or JSON lines to stderr and can
//! additionally append JSON lines to a file.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., "info", "debug,memforge=trace")
//! - `MEMFORGE_LOG_LEVEL`: Simple log level (error, warn, info, debug, trace)
//! - `MEMFORGE_LOG_FORMAT`: Output format ("human" or "json")
//! - `MEMFORGE_LOG_FILE`: Optional file path for log output (JSON format)

use once_cell::sync::OnceCell;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global flag to track if tracing has been initialized
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Environment variable for log level override
const LOG_LEVEL_ENV: &str = "MEMFORGE_LOG_LEVEL";

/// Environment variable for log format (json/human)
const LOG_FORMAT_ENV: &str = "MEMFORGE_LOG_FORMAT";

/// Environment variable for log file path
const LOG_FILE_ENV: &str = "MEMFORGE_LOG_FILE";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Invalid log level string provided
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    /// Invalid log format string provided
    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    /// Failed to create log file directory
    #[error("failed to create log directory: {0}")]
    DirectoryCreationFailed(String),

    /// Failed to open log file
    #[error("failed to open log file: {0}")]
    FileOpenFailed(String),

    /// Another global subscriber was installed first
    #[error("failed to install subscriber: {0}")]
    SubscriberInstallFailed(String),
}

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    /// Convert to EnvFilter string
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLogLevel(s.to_string())),
        }
    }
}

/// Log format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output (default)
    #[default]
    Human,
    /// JSON structured output
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "console" => Ok(LogFormat::Human),
            "json" | "structured" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidLogFormat(s.to_string())),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Whether to include file/line in console logs
    pub with_file_info: bool,
    /// Whether to emit span close events (compile stages run in spans)
    pub with_span_events: bool,
    /// Optional file receiving JSON lines in addition to stderr
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    pub fn with_span_events(mut self, with_span_events: bool) -> Self {
        self.with_span_events = with_span_events;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Read `MEMFORGE_LOG_*` variables, ignoring unparsable values
    pub fn from_env() -> Self {
        let mut config = LoggingConfig::new();

        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            match level.parse() {
                Ok(level) => config.level = level,
                Err(e) => eprintln!("memforge: ignoring {}: {}", LOG_LEVEL_ENV, e),
            }
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            match format.parse() {
                Ok(format) => config.format = format,
                Err(e) => eprintln!("memforge: ignoring {}: {}", LOG_FORMAT_ENV, e),
            }
        }
        if let Ok(file) = std::env::var(LOG_FILE_ENV) {
            if !file.is_empty() {
                config.log_file = Some(PathBuf::from(file));
            }
        }

        config
    }
}

/// Initialize logging from the environment, ignoring failures.
///
/// This function is idempotent - calling it multiple times will only
/// initialize the subscriber once.
///
/// # Example
///
/// ```ignore
/// memforge::init_logging_default();
/// tracing::info!("compiling network");
/// ```
pub fn init_logging_default() {
    if let Err(e) = init_logging_from_env() {
        eprintln!("memforge: logging not initialized: {}", e);
    }
}

/// Initialize logging from `RUST_LOG` and the `MEMFORGE_LOG_*` variables.
///
/// This function is idempotent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    init_with_config(&LoggingConfig::from_env())
}

/// Initialize logging with a custom configuration.
///
/// Only the first successful call installs a subscriber; later calls return
/// `Ok(())` without touching the global state.
pub fn init_with_config(config: &LoggingConfig) -> Result<(), LoggingError> {
    TRACING_INITIALIZED
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| ())
}

fn install_subscriber(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = build_env_filter(config.level)?;
    let spans = span_events(config.with_span_events);

    let (json_console, human_console) = match config.format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_file(config.with_file_info)
                    .with_line_number(config.with_file_info)
                    .with_span_events(spans.clone())
                    .with_writer(std::io::stderr),
            ),
            None,
        ),
        LogFormat::Human => (
            None,
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(config.with_file_info)
                    .with_line_number(config.with_file_info)
                    .with_span_events(spans.clone())
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    // File output is always JSON
    let file_layer = match &config.log_file {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_writer(Mutex::new(open_log_file(path)?))
                .with_target(false)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_span_events(spans),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_console)
        .with(human_console)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInstallFailed(e.to_string()))
}

fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Open `path` for appending, creating parent directories as needed
fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LoggingError::DirectoryCreationFailed(e.to_string()))?;
        }
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LoggingError::FileOpenFailed(format!("{}: {}", path.display(), e)))
}

/// Build the environment filter for log level.
/// `RUST_LOG` wins over the configured level.
fn build_env_filter(default_level: LogLevel) -> Result<EnvFilter, LoggingError> {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(rust_log)
            .map_err(|e| LoggingError::InvalidLogLevel(e.to_string()));
    }

    Ok(EnvFilter::new(default_level.as_filter_str()))
}

/// Check if tracing has been initialized
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" info ".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!(matches!(
            "loud".parse::<LogLevel>(),
            Err(LoggingError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("human".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("structured".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_level_as_tracing_level() {
        assert_eq!(LogLevel::Error.as_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.as_tracing_level(), tracing::Level::TRACE);
        assert_eq!(LogLevel::Warn.as_filter_str(), "warn");
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .with_level(LogLevel::Debug)
            .with_format(LogFormat::Json)
            .with_file_info(true)
            .with_span_events(true)
            .with_log_file("/tmp/memforge.log");

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.with_file_info);
        assert!(config.with_span_events);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/memforge.log")));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var(LOG_LEVEL_ENV, "trace");
        std::env::set_var(LOG_FORMAT_ENV, "json");
        std::env::set_var(LOG_FILE_ENV, "/tmp/memforge-env.log");

        let config = LoggingConfig::from_env();
        assert_eq!(config.level, LogLevel::Trace);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/memforge-env.log")));

        std::env::set_var(LOG_LEVEL_ENV, "shouting");
        std::env::remove_var(LOG_FORMAT_ENV);
        std::env::remove_var(LOG_FILE_ENV);

        let config = LoggingConfig::from_env();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Human);
        assert!(config.log_file.is_none());

        std::env::remove_var(LOG_LEVEL_ENV);
    }

    #[test]
    fn test_open_log_file_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("logs").join("memforge.log");

        let file = open_log_file(&path).unwrap();
        drop(file);
        assert!(path.exists());

        // Appending to an existing file works too
        assert!(open_log_file(&path).is_ok());
    }

    #[test]
    fn test_open_log_file_fails_on_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            open_log_file(dir.path()),
            Err(LoggingError::FileOpenFailed(_))
        ));
    }

    #[test]
    #[serial]
    fn test_init_logging_default_idempotent() {
        init_logging_default();
        init_logging_default();
        assert!(is_initialized());
        assert!(init_with_config(&LoggingConfig::new().with_level(LogLevel::Trace)).is_ok());
    }
}
