//! # Stasis Utilities
//!
//! Shared logging setup for the Stasis workspace, built on `tracing`.

pub mod logging;

pub use logging::{dated_log_file, init_logging, LogConfig, LogFormat, LogLevel, LoggingError};
