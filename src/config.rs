//! Controller configuration using Figment
//!
//! All paths and timing that the exchange engine needs live in one
//! [`CapConfig`] value that is handed to every component. Configuration is
//! loaded from:
//! 1. Built-in defaults
//! 2. An optional TOML file (e.g. `config/cap.toml`)
//! 3. Environment variables (prefixed with `CAPCTL_`)
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! CAPCTL_WATCH_DIR=/srv/cap/temp
//! CAPCTL_POLL_INTERVAL_MS=500
//! CAPCTL_COMMANDS__TAKE_IMAGE="xx iss"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cap_control::config::CapConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = CapConfig::load_from("config/cap.toml")?;
//!     println!("Watching: {}", config.watch_dir.display());
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::sentinel::SentinelMarker;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Configuration render error: {0}")]
    RenderError(#[from] toml::ser::Error),
}

/// Top-level controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapConfig {
    /// Directory shared with CAP; holds the command file and sentinels
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    /// Control-input file name inside `watch_dir`
    #[serde(default = "default_command_file")]
    pub command_file: String,
    /// Append-only exchange log
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Time between two directory scans in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout used by commands that do not compute their own
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Read the first line of a terminal sentinel for diagnostics
    #[serde(default = "default_true")]
    pub read_sentinel_content: bool,
    /// Copy terminal sentinels here before the directory is cleaned
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    /// Write the command file through a temporary file and rename
    #[serde(default = "default_true")]
    pub atomic_write: bool,
    /// Wake the poll loop on filesystem events (needs the `fs_events` feature)
    #[serde(default)]
    pub fs_events: bool,
    /// Base directory for image and scan output folders
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Command roots used by the command builders
    #[serde(default)]
    pub commands: CommandTable,
}

/// Command-root strings of the CAP command vocabulary.
///
/// Builders append their arguments to these roots; overriding one here
/// retargets a builder without touching code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTable {
    pub take_image: String,
    pub connect: String,
    pub initialize: String,
    pub disconnect: String,
    pub absolute_move: String,
    pub relative_move: String,
    pub short_omega_scan: String,
    pub omega_scan: String,
    pub goniometer_move: String,
    pub merge: String,
    pub strategy: String,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self {
            take_image: "xx iss".to_string(),
            connect: "xx xtalcheck connect".to_string(),
            initialize: "xx xtalcheck initialize".to_string(),
            disconnect: "xx xtalcheck disconnect".to_string(),
            absolute_move: "xx xtalcheck move".to_string(),
            relative_move: "xx xtalcheck mover".to_string(),
            short_omega_scan: "dc simplescreen".to_string(),
            omega_scan: "dc simplescan".to_string(),
            goniometer_move: "xx gonio move".to_string(),
            merge: "dc merge".to_string(),
            strategy: "dc runstrategy".to_string(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_watch_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_command_file() -> String {
    "command.in".to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logger.txt")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_data_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CapConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            command_file: default_command_file(),
            log_path: default_log_path(),
            poll_interval_ms: default_poll_interval_ms(),
            default_timeout_secs: default_timeout_secs(),
            read_sentinel_content: true,
            archive_dir: None,
            atomic_write: true,
            fs_events: false,
            data_root: default_data_root(),
            log_level: default_log_level(),
            commands: CommandTable::default(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl CapConfig {
    /// Configuration rooted at `watch_dir`, everything else defaulted.
    pub fn for_watch_dir(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            ..Self::default()
        }
    }

    /// Load defaults overlaid with `CAPCTL_` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())))
    }

    /// Load configuration from a specific file path
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (`CAPCTL_` prefix)
    /// 2. The TOML file at `path`
    /// 3. Built-in defaults
    ///
    /// A missing file is not an error; the defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or the result
    /// does not validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(Self::default())).merge(Toml::file(path.as_ref())),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed("CAPCTL_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Command file name is a bare, non-empty file name
    /// - Command file name cannot be mistaken for a sentinel
    /// - Log file and archive directory are outside the watched directory
    /// - Poll interval and default timeout are non-zero
    /// - Log level is valid (trace, debug, info, warn, error)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_file.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "'command_file' cannot be empty".to_string(),
            ));
        }

        if self.command_file.contains('/') || self.command_file.contains('\\') {
            return Err(ConfigError::ValidationError(format!(
                "'command_file' must be a bare file name, got '{}'",
                self.command_file
            )));
        }

        if let Some(marker) = SentinelMarker::classify(&self.command_file) {
            return Err(ConfigError::ValidationError(format!(
                "'command_file' '{}' contains the sentinel marker '{}'",
                self.command_file,
                marker.as_str()
            )));
        }

        // The cleaner empties the watched directory after every exchange
        let watch_dir = normalized(&self.watch_dir);
        if normalized(&self.log_path).starts_with(&watch_dir) {
            return Err(ConfigError::ValidationError(format!(
                "'log_path' {} is inside 'watch_dir' {}",
                self.log_path.display(),
                self.watch_dir.display()
            )));
        }
        if let Some(archive_dir) = &self.archive_dir {
            if normalized(archive_dir).starts_with(&watch_dir) {
                return Err(ConfigError::ValidationError(format!(
                    "'archive_dir' {} is inside 'watch_dir' {}",
                    archive_dir.display(),
                    self.watch_dir.display()
                )));
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "'poll_interval_ms' must be > 0".to_string(),
            ));
        }

        if self.default_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "'default_timeout_secs' must be > 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Full path of the control-input file.
    pub fn command_path(&self) -> PathBuf {
        self.watch_dir.join(&self.command_file)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Lexical normalization: drops `.` and folds `..` into its parent.
fn normalized(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
