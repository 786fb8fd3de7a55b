//! Empties the watched directory after every exchange.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CapError, CapResult};

/// What a cleanup pass removed and what it could not.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, std::io::Error)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryCleaner {
    dir: PathBuf,
    archive_dir: Option<PathBuf>,
}

impl DirectoryCleaner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            archive_dir: None,
        }
    }

    /// Keep a copy of named files in `archive_dir` before they are removed.
    pub fn with_archive(mut self, archive_dir: Option<PathBuf>) -> Self {
        self.archive_dir = archive_dir;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `file_name` from the watched directory into the archive, if one
    /// is configured. Failures are logged, never returned.
    pub fn archive(&self, file_name: &str) {
        let Some(archive_dir) = &self.archive_dir else {
            return;
        };
        let source = self.dir.join(file_name);
        let result = fs::create_dir_all(archive_dir)
            .and_then(|_| fs::copy(&source, archive_dir.join(file_name)));
        match result {
            Ok(_) => debug!("Archived {} to {}", file_name, archive_dir.display()),
            Err(e) => warn!("Failed to archive {}: {}", source.display(), e),
        }
    }

    /// Remove every entry of the watched directory.
    ///
    /// Listing the directory is the only fatal step. Individual removal
    /// failures are collected in the report and logged, because a leftover
    /// sentinel would resolve the next exchange on its first tick.
    pub fn clean(&self) -> CapResult<CleanupReport> {
        info!("Cleaning {} directory", self.dir.display());

        let unreadable = |source| CapError::DirectoryUnreadable {
            path: self.dir.clone(),
            source,
        };

        let mut report = CleanupReport::default();
        for entry in fs::read_dir(&self.dir).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            let path = entry.path();
            let result = match entry.file_type() {
                Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };
            match result {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    report.failed.push((path, e));
                }
            }
        }

        if !report.is_clean() {
            warn!(
                "{} entries left in {}; the next exchange may see stale sentinels",
                report.failed.len(),
                self.dir.display()
            );
        }
        Ok(report)
    }
}
