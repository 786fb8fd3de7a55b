//! Commands and the control-input file writer.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::config::CapConfig;
use crate::error::{CapError, CapResult};

/// Line terminator CAP expects after a command.
pub const COMMAND_TERMINATOR: &str = "\r\n";

/// An opaque command string and the time CAP is given to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    timeout: Duration,
}

impl Command {
    /// Command with a timeout in whole seconds.
    pub fn new(text: impl Into<String>, timeout_secs: u64) -> Self {
        Self::with_timeout(text, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(text: impl Into<String>, timeout: Duration) -> Self {
        Self {
            text: text.into(),
            timeout,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Single slot holding the most recently dispatched command text.
#[derive(Debug, Clone, Default)]
pub struct LastCommand(Option<String>);

impl LastCommand {
    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Text for diagnostics, empty when nothing was sent yet.
    pub fn display(&self) -> &str {
        self.get().unwrap_or("")
    }

    fn set(&mut self, text: &str) {
        self.0 = Some(text.to_string());
    }
}

/// Writes commands into the control-input file, replacing any earlier one.
#[derive(Debug)]
pub struct CommandWriter {
    path: PathBuf,
    atomic: bool,
    last: LastCommand,
}

impl CommandWriter {
    pub fn new(config: &CapConfig) -> Self {
        Self {
            path: config.command_path(),
            atomic: config.atomic_write,
            last: LastCommand::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_command(&self) -> &LastCommand {
        &self.last
    }

    /// Truncate-or-create the command file with `text` followed by CRLF.
    ///
    /// With atomic writes enabled the text lands in a sibling temporary file
    /// first and is renamed over the command file, so CAP never reads a
    /// partial command.
    pub fn write(&mut self, text: &str) -> CapResult<()> {
        let contents = format!("{}{}", text, COMMAND_TERMINATOR);

        let result = if self.atomic {
            self.write_atomic(contents.as_bytes())
        } else {
            fs::write(&self.path, contents.as_bytes())
        };
        result.map_err(|source| CapError::WriteFailure {
            path: self.path.clone(),
            source,
        })?;

        debug!("Wrote '{}' to {}", text, self.path.display());
        self.last.set(text);
        Ok(())
    }

    fn write_atomic(&self, contents: &[u8]) -> std::io::Result<()> {
        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        Ok(())
    }
}
