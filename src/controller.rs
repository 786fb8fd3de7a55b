//! Exchange orchestration: write → watch → interpret → log → clean.
//!
//! The [`Controller`] owns one instance of every protocol component and runs
//! them in a fixed order for each command. Remote outcomes (done, error,
//! stop, closed, timeout) always reach the log and always leave the watched
//! directory empty. Only a failed command write or an unreadable directory
//! abort an exchange early; both are returned as errors.
//!
//! # Example
//!
//! ```no_run
//! use cap_control::{CapConfig, Command, Controller};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut controller = Controller::new(CapConfig::for_watch_dir("temp"))?;
//!     let outcome = controller.exchange(&Command::new("xx xtalcheck connect", 60))?;
//!     println!("{}", outcome);
//!     Ok(())
//! }
//! ```

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cleaner::{CleanupReport, DirectoryCleaner};
use crate::command::{Command, CommandWriter, LastCommand};
use crate::commands::CapCommand;
use crate::config::CapConfig;
use crate::error::CapResult;
use crate::journal::ExchangeLogger;
use crate::response::OutcomeCode;
use crate::watcher::{DirectoryWatcher, SleepWaiter, Waiter};

/// Everything observed during one exchange.
#[derive(Debug)]
pub struct ExchangeReport {
    pub command: String,
    pub outcome: OutcomeCode,
    /// File name of the sentinel that resolved the exchange
    pub sentinel: Option<String>,
    /// First line of that sentinel
    pub diagnostic: Option<String>,
    pub ticks: u32,
    pub elapsed: Duration,
    pub cleanup: CleanupReport,
}

#[derive(Debug)]
pub struct Controller {
    config: CapConfig,
    writer: CommandWriter,
    watcher: DirectoryWatcher,
    logger: ExchangeLogger,
    cleaner: DirectoryCleaner,
}

impl Controller {
    /// Build a controller with the waiter selected by the configuration.
    pub fn new(config: CapConfig) -> CapResult<Self> {
        Self::build(config, default_waiter)
    }

    /// Build a controller that waits between ticks with `waiter`.
    pub fn with_waiter(config: CapConfig, waiter: Box<dyn Waiter>) -> CapResult<Self> {
        Self::build(config, |_| Ok(waiter))
    }

    fn build<F>(config: CapConfig, make_waiter: F) -> CapResult<Self>
    where
        F: FnOnce(&CapConfig) -> CapResult<Box<dyn Waiter>>,
    {
        config.validate()?;
        // The event waiter needs the directory to exist
        std::fs::create_dir_all(&config.watch_dir)?;
        let waiter = make_waiter(&config)?;

        let logger = ExchangeLogger::new(&config.log_path);
        logger.init()?;

        Ok(Self {
            writer: CommandWriter::new(&config),
            watcher: DirectoryWatcher::new(&config, waiter),
            cleaner: DirectoryCleaner::new(&config.watch_dir)
                .with_archive(config.archive_dir.clone()),
            logger,
            config,
        })
    }

    pub fn config(&self) -> &CapConfig {
        &self.config
    }

    pub fn last_command(&self) -> &LastCommand {
        self.writer.last_command()
    }

    /// Run one exchange and return its outcome code.
    pub fn exchange(&mut self, command: &Command) -> CapResult<OutcomeCode> {
        self.exchange_with_report(command).map(|report| report.outcome)
    }

    /// Build a vocabulary command and exchange it.
    pub fn send(&mut self, command: &CapCommand) -> CapResult<OutcomeCode> {
        let command = command.build(&self.config)?;
        self.exchange(&command)
    }

    /// Run one exchange and return everything it observed.
    pub fn exchange_with_report(&mut self, command: &Command) -> CapResult<ExchangeReport> {
        let start = Instant::now();

        info!("Writing '{}' to {}", command.text(), self.writer.path().display());
        self.writer.write(command.text())?;

        info!(
            "Watching {} (timeout {} s)",
            self.watcher.dir().display(),
            command.timeout().as_secs()
        );
        let watched = self
            .watcher
            .watch(command.timeout(), self.writer.last_command().display())?;

        let outcome = watched.outcome;
        info!("Response was {}", outcome.message());

        if let Some(hit) = &watched.sentinel {
            self.cleaner.archive(&hit.file_name);
        }

        // Logging and cleanup both run before either failure is reported
        let journaled = self.logger.record(command.text(), outcome);
        if let Err(e) = &journaled {
            warn!("{}", e);
        }
        let cleanup = self.cleaner.clean()?;
        journaled?;

        Ok(ExchangeReport {
            command: command.text().to_string(),
            outcome,
            sentinel: watched.sentinel.map(|hit| hit.file_name),
            diagnostic: watched.diagnostic,
            ticks: watched.ticks,
            elapsed: start.elapsed(),
            cleanup,
        })
    }

    /// Empty the watched directory outside of an exchange.
    pub fn clean(&self) -> CapResult<CleanupReport> {
        self.cleaner.clean()
    }
}

fn default_waiter(config: &CapConfig) -> CapResult<Box<dyn Waiter>> {
    if config.fs_events {
        #[cfg(feature = "fs_events")]
        {
            let waiter = crate::watcher::NotifyWaiter::new(&config.watch_dir)?;
            return Ok(Box::new(waiter));
        }
        #[cfg(not(feature = "fs_events"))]
        {
            warn!("fs_events is set but the `fs_events` feature is not built in; polling instead");
        }
    }
    Ok(Box::new(SleepWaiter))
}
