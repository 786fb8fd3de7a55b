//! Custom error types for the controller.
//!
//! This module defines the primary error type, `CapError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent way to report the
//! failures that can abort an exchange with CAP.
//!
//! ## Error Hierarchy
//!
//! Only conditions that leave the watched directory in an unknown state are
//! errors. Remote outcomes signalled through sentinel files (error, stop,
//! closed) and timeouts are ordinary [`OutcomeCode`](crate::response::OutcomeCode)
//! values and never show up here.
//!
//! - **`Config`**: Wraps loading and validation failures from [`crate::config`].
//! - **`WriteFailure`**: The control-input file could not be written. The
//!   exchange is aborted before polling starts.
//! - **`DirectoryUnreadable`**: The watched directory could not be listed.
//!   The exchange is aborted instead of polling forever.
//! - **`Journal`**: The exchange log could not be appended to.
//! - **`InvalidAxis`** / **`InvalidParameter`**: A command builder refused to
//!   produce a command. Nothing is sent to CAP.
//! - **`StrategyField`** / **`TemplateTooShort`**: Strategy staging could not
//!   produce a byte-exact run file.
//!
//! By using `#[from]`, `CapError` can be created from underlying error types,
//! so the `?` operator works throughout the crate.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the crate error type.
pub type CapResult<T> = std::result::Result<T, CapError>;

#[derive(Error, Debug)]
pub enum CapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to write command file {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Watched directory {path} is unreadable: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to append to exchange log {path}: {source}")]
    Journal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid axis '{0}'. Acceptable axes are x, y or z")]
    InvalidAxis(String),

    #[error("Invalid command parameter: {0}")]
    InvalidParameter(String),

    #[error("Strategy header field '{field}' is {len} bytes, limit is {max}")]
    StrategyField {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Strategy template {path} is {len} bytes, shorter than its 512-byte header")]
    TemplateTooShort { path: PathBuf, len: usize },

    #[error("Filesystem watch error: {0}")]
    Watch(String),
}

impl CapError {
    /// True when the error means the current exchange had to be abandoned
    /// without cleaning the watched directory.
    pub fn aborts_exchange(&self) -> bool {
        matches!(
            self,
            CapError::WriteFailure { .. } | CapError::DirectoryUnreadable { .. }
        )
    }
}
