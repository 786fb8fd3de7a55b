//! Persistent, append-only record of every exchange.
//!
//! Each entry is written on its own line as
//! `DD/MM/YYYY HH:MM:SS command:\t<command> response: <message>`. The file is
//! opened, appended and closed per entry so other tools can read it while the
//! controller runs.

use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{CapError, CapResult};
use crate::response::OutcomeCode;

/// First line of a freshly created log.
pub const LOG_MARKER: &str = "CAP controller logger started";

/// Timestamp layout of log entries.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Clone)]
pub struct ExchangeLogger {
    path: PathBuf,
}

impl ExchangeLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log with its marker line unless it already exists.
    /// An existing log is never truncated.
    pub fn init(&self) -> CapResult<()> {
        if self.path.is_file() {
            info!("Log file {} exists", self.path.display());
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| self.error(source))?;
        }
        let mut file = self.open()?;
        file.write_all(LOG_MARKER.as_bytes())
            .map_err(|source| self.error(source))?;
        debug!("Created log file {}", self.path.display());
        Ok(())
    }

    /// Append one entry stamped with the current local time.
    pub fn record(&self, command: &str, outcome: OutcomeCode) -> CapResult<()> {
        self.record_at(Local::now(), command, outcome)
    }

    pub fn record_at(
        &self,
        at: DateTime<Local>,
        command: &str,
        outcome: OutcomeCode,
    ) -> CapResult<()> {
        let entry = format_entry(at, command, outcome);
        let mut file = self.open()?;
        file.write_all(entry.as_bytes())
            .map_err(|source| self.error(source))?;
        Ok(())
    }

    fn open(&self) -> CapResult<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.error(source))
    }

    fn error(&self, source: std::io::Error) -> CapError {
        CapError::Journal {
            path: self.path.clone(),
            source,
        }
    }
}

/// Render one entry, including its leading newline.
pub fn format_entry(at: DateTime<Local>, command: &str, outcome: OutcomeCode) -> String {
    format!(
        "\n{} command:\t{} response: {}",
        at.format(TIMESTAMP_FORMAT),
        command,
        outcome.message()
    )
}
