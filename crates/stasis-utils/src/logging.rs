//! # Logging Utilities
//!
//! Logging infrastructure for Stasis using `tracing`.
//!
//! Console output goes to stderr so that command output on stdout (snapshot
//! summaries, region listings) stays machine readable. Optionally every
//! event is mirrored to a log file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stasis_utils::{init_logging, LogConfig};
//!
//! // Keep the guard alive until exit so buffered file output is flushed
//! let _guard = init_logging(&LogConfig::from_env()).expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=stasis_core=trace`)
//! - `STASIS_LOG_FORMAT`: Set output format (`json` or `pretty`, default: `pretty`)
//! - `STASIS_LOG_FILE`: Optional path to a log file (if not set, logs only to stderr)

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format
    #[default]
    Pretty,
    /// JSON lines, one event per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Logging configuration
///
/// Filter priority when initializing:
/// 1. `level`, when set (from the `--log-level` CLI flag)
/// 2. `RUST_LOG`, which also accepts per-module filters like `stasis_core=debug`
/// 3. `INFO`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig
{
    /// Explicit level overriding `RUST_LOG`
    pub level: Option<LogLevel>,
    /// Output format for console and file
    pub format: LogFormat,
    /// Mirror every event to this file
    pub file: Option<PathBuf>,
}

impl LogConfig
{
    /// Read `STASIS_LOG_FORMAT` and `STASIS_LOG_FILE`
    ///
    /// An unparsable format falls back to pretty output.
    pub fn from_env() -> Self
    {
        let format = env::var("STASIS_LOG_FORMAT")
            .ok()
            .and_then(|s| LogFormat::from_str(&s).ok())
            .unwrap_or_default();
        let file = env::var_os("STASIS_LOG_FILE").filter(|s| !s.is_empty()).map(PathBuf::from);

        Self {
            level: None,
            format,
            file,
        }
    }

    /// Override the level filter
    pub fn with_level(mut self, level: Option<LogLevel>) -> Self
    {
        if level.is_some() {
            self.level = level;
        }
        self
    }

    /// Override the output format
    pub fn with_format(mut self, format: Option<LogFormat>) -> Self
    {
        if let Some(format) = format {
            self.format = format;
        }
        self
    }

    /// Log to a dated file inside `dir`, e.g. `2026-10-18-stasis.log`
    ///
    /// ## Errors
    ///
    /// Returns an error if `dir` cannot be created.
    pub fn with_log_dir(mut self, dir: &Path) -> Result<Self, LoggingError>
    {
        fs::create_dir_all(dir)?;
        self.file = Some(dated_log_file(dir));
        Ok(self)
    }

    fn filter(&self) -> EnvFilter
    {
        if let Some(level) = self.level {
            return EnvFilter::new(Level::from(level).to_string());
        }
        match env::var("RUST_LOG") {
            Ok(rust_log) => EnvFilter::try_new(&rust_log).unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
            Err(_) => EnvFilter::new(Level::INFO.to_string()),
        }
    }
}

/// `<dir>/<today>-stasis.log`
pub fn dated_log_file(dir: &Path) -> PathBuf
{
    let today = Utc::now().format("%Y-%m-%d");
    dir.join(format!("{today}-stasis.log"))
}

/// Initialize the global subscriber
///
/// Returns the file writer's guard when a log file is configured; dropping
/// it flushes and stops file output.
///
/// ## Example
///
/// ```rust,no_run
/// use stasis_utils::{init_logging, LogConfig, LogFormat, LogLevel};
///
/// let config = LogConfig::default()
///     .with_level(Some(LogLevel::Debug))
///     .with_format(Some(LogFormat::Json));
/// let _guard = init_logging(&config).expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError>
{
    let filter = config.filter();

    let (file_writer, guard) = match &config.file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().ok_or_else(|| {
                LoggingError::InitializationFailed(format!("log file path {} has no file name", path.display()))
            })?;
            let appender = tracing_appender::rolling::never(directory, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let result = match config.format {
        LogFormat::Pretty => {
            let console_layer = fmt::layer()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(true)
                .with_writer(io::stderr)
                .with_filter(filter.clone());
            let file_layer = file_writer.map(|writer| {
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false) // No ANSI in files
                    .with_filter(filter)
            });
            Registry::default().with(console_layer).with(file_layer).try_init()
        }
        LogFormat::Json => {
            let console_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(io::stderr)
                .with_filter(filter.clone());
            let file_layer = file_writer.map(|writer| {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_filter(filter)
            });
            Registry::default().with(console_layer).with(file_layer).try_init()
        }
    };

    result.map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Failed to install the global subscriber
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// Log directory or file could not be created
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
