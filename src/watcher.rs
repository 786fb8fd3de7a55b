//! Sentinel polling loop.
//!
//! The watcher scans the watched directory once per tick until a terminal
//! sentinel shows up or the command's timeout has been waited out. Time is
//! accounted as the sum of what the [`Waiter`] reports, which keeps the
//! timeout decision identical whether ticks are plain sleeps or are cut short
//! by filesystem events.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CapConfig;
use crate::error::{CapError, CapResult};
use crate::response::OutcomeCode;
use crate::sentinel::{Scan, SentinelHit};

/// Blocks between two directory scans.
pub trait Waiter: Send {
    /// Wait for at most `max` and return how long was actually waited.
    fn wait(&mut self, max: Duration) -> CapResult<Duration>;
}

/// Waits out the full interval with `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepWaiter;

impl Waiter for SleepWaiter {
    fn wait(&mut self, max: Duration) -> CapResult<Duration> {
        let start = Instant::now();
        std::thread::sleep(max);
        Ok(start.elapsed())
    }
}

#[cfg(feature = "fs_events")]
mod events {
    use super::*;
    use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError};

    /// Returns early from a tick as soon as the watched directory changes.
    pub struct NotifyWaiter {
        _watcher: RecommendedWatcher,
        rx: Receiver<notify::Result<Event>>,
    }

    impl NotifyWaiter {
        pub fn new(dir: &Path) -> CapResult<Self> {
            let (tx, rx) = mpsc::channel();
            let mut watcher =
                notify::recommended_watcher(tx).map_err(|e| CapError::Watch(e.to_string()))?;
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| CapError::Watch(e.to_string()))?;
            Ok(Self {
                _watcher: watcher,
                rx,
            })
        }
    }

    impl Waiter for NotifyWaiter {
        fn wait(&mut self, max: Duration) -> CapResult<Duration> {
            let start = Instant::now();
            match self.rx.recv_timeout(max) {
                Ok(Err(e)) => warn!("Filesystem watch reported: {}", e),
                Ok(Ok(_)) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CapError::Watch("event channel closed".to_string()))
                }
            }
            // Coalesce the burst a single file creation produces
            while self.rx.try_recv().is_ok() {}
            Ok(start.elapsed())
        }
    }
}

#[cfg(feature = "fs_events")]
pub use events::NotifyWaiter;

/// Poll state after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Polling,
    Resolved(OutcomeCode),
}

impl WatchState {
    /// Transition for one tick: a terminal sentinel resolves immediately,
    /// otherwise the exchange times out once `waited` reaches `timeout`.
    /// A `.busy` sentinel never extends the budget.
    pub fn next(scan: &Scan, waited: Duration, timeout: Duration) -> Self {
        if let Some(outcome) = scan.outcome() {
            WatchState::Resolved(outcome)
        } else if waited >= timeout {
            WatchState::Resolved(OutcomeCode::Timeout)
        } else {
            WatchState::Polling
        }
    }
}

/// What a finished watch observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResult {
    pub outcome: OutcomeCode,
    /// The terminal sentinel that resolved the exchange
    pub sentinel: Option<SentinelHit>,
    /// First line of the sentinel's content
    pub diagnostic: Option<String>,
    /// Number of directory scans performed
    pub ticks: u32,
    /// Time spent waiting between scans
    pub waited: Duration,
}

pub struct DirectoryWatcher {
    dir: PathBuf,
    command_file: String,
    poll_interval: Duration,
    read_content: bool,
    waiter: Box<dyn Waiter>,
}

impl DirectoryWatcher {
    pub fn new(config: &CapConfig, waiter: Box<dyn Waiter>) -> Self {
        Self {
            dir: config.watch_dir.clone(),
            command_file: config.command_file.clone(),
            poll_interval: config.poll_interval(),
            read_content: config.read_sentinel_content,
            waiter,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List and classify the watched directory once.
    pub fn scan(&self) -> CapResult<Scan> {
        let unreadable = |source| CapError::DirectoryUnreadable {
            path: self.dir.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(Scan::from_names(names, &self.command_file))
    }

    /// Poll until a terminal sentinel appears or `timeout` has been waited.
    pub fn watch(&mut self, timeout: Duration, last_command: &str) -> CapResult<WatchResult> {
        let mut ticks = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            let scan = self.scan()?;
            ticks += 1;

            match WatchState::next(&scan, waited, timeout) {
                WatchState::Resolved(OutcomeCode::Timeout) => {
                    warn!(
                        "Timeout after {:.1} s, no response from CAP to '{}'",
                        waited.as_secs_f64(),
                        last_command
                    );
                    return Ok(WatchResult {
                        outcome: OutcomeCode::Timeout,
                        sentinel: None,
                        diagnostic: None,
                        ticks,
                        waited,
                    });
                }
                WatchState::Resolved(outcome) => {
                    let diagnostic = scan
                        .terminal
                        .as_ref()
                        .filter(|_| self.read_content)
                        .and_then(|hit| self.first_line(&hit.file_name));
                    self.report(outcome, last_command, diagnostic.as_deref());
                    return Ok(WatchResult {
                        outcome,
                        sentinel: scan.terminal,
                        diagnostic,
                        ticks,
                        waited,
                    });
                }
                WatchState::Polling => {}
            }

            if scan.busy {
                info!(
                    "Command '{}' is still executing, wait time {} s",
                    last_command,
                    waited.as_secs()
                );
            } else {
                debug!("No sentinel found - waiting {} s", waited.as_secs());
            }

            let remaining = timeout.saturating_sub(waited);
            waited += self.waiter.wait(self.poll_interval.min(remaining))?;
        }
    }

    fn report(&self, outcome: OutcomeCode, last_command: &str, diagnostic: Option<&str>) {
        let detail = diagnostic.unwrap_or("");
        match outcome {
            OutcomeCode::Success => info!("Command '{}' executed {}", last_command, detail),
            OutcomeCode::Error => warn!("An error in '{}' occurred: {}", last_command, detail),
            OutcomeCode::Stopped => warn!("Command '{}' has been stopped {}", last_command, detail),
            OutcomeCode::Closed => warn!("CAP listen mode was closed {}", detail),
            OutcomeCode::Timeout => {}
        }
    }

    /// Best-effort read of a sentinel's first line.
    fn first_line(&self, file_name: &str) -> Option<String> {
        let path = self.dir.join(file_name);
        match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .next()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty()),
            Err(e) => {
                debug!("Could not read sentinel {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("dir", &self.dir)
            .field("command_file", &self.command_file)
            .field("poll_interval", &self.poll_interval)
            .field("read_content", &self.read_content)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_test::traced_test;

    /// Advances virtual time without sleeping and runs a hook before each wait.
    struct ScriptedWaiter {
        calls: Arc<Mutex<u32>>,
        hook: Box<dyn FnMut(u32) + Send>,
    }

    impl Waiter for ScriptedWaiter {
        fn wait(&mut self, max: Duration) -> CapResult<Duration> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            (self.hook)(*calls);
            Ok(max)
        }
    }

    fn watcher(dir: &Path, hook: impl FnMut(u32) + Send + 'static) -> (DirectoryWatcher, Arc<Mutex<u32>>) {
        let calls = Arc::new(Mutex::new(0));
        let config = CapConfig::for_watch_dir(dir);
        let waiter = ScriptedWaiter {
            calls: calls.clone(),
            hook: Box::new(hook),
        };
        (DirectoryWatcher::new(&config, Box::new(waiter)), calls)
    }

    #[test]
    fn test_state_transitions() {
        let timeout = Duration::from_secs(3);
        let empty = Scan::default();
        assert_eq!(WatchState::next(&empty, Duration::from_secs(2), timeout), WatchState::Polling);
        assert_eq!(
            WatchState::next(&empty, Duration::from_secs(3), timeout),
            WatchState::Resolved(OutcomeCode::Timeout)
        );

        let busy = Scan::from_names(["cmd.busy"], "command.in");
        assert_eq!(
            WatchState::next(&busy, Duration::from_secs(3), timeout),
            WatchState::Resolved(OutcomeCode::Timeout)
        );

        let done = Scan::from_names(["cmd.done"], "command.in");
        assert_eq!(
            WatchState::next(&done, Duration::from_secs(9), timeout),
            WatchState::Resolved(OutcomeCode::Success)
        );
    }

    #[test]
    fn test_done_resolves_on_first_tick() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("command.done"), "finished ok\nsecond line").unwrap();
        let (mut watcher, calls) = watcher(dir.path(), |_| {});

        let result = watcher.watch(Duration::from_secs(5), "xx iss").unwrap();
        assert_eq!(result.outcome, OutcomeCode::Success);
        assert_eq!(result.ticks, 1);
        assert_eq!(result.diagnostic.as_deref(), Some("finished ok"));
        assert_eq!(result.sentinel.unwrap().file_name, "command.done");
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_empty_directory_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (mut watcher, calls) = watcher(dir.path(), |_| {});

        let result = watcher.watch(Duration::from_secs(3), "xx iss").unwrap();
        assert_eq!(result.outcome, OutcomeCode::Timeout);
        assert_eq!(result.waited, Duration::from_secs(3));
        // One scan per waited second plus the initial one
        assert_eq!(result.ticks, 4);
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[test]
    fn test_zero_timeout_scans_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut watcher, _) = watcher(dir.path(), |_| {});
        let result = watcher.watch(Duration::ZERO, "").unwrap();
        assert_eq!(result.outcome, OutcomeCode::Timeout);
        assert_eq!(result.ticks, 1);
    }

    #[test]
    fn test_busy_then_error_resolves_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        fs::write(path.join("command.busy"), "").unwrap();

        let (mut watcher, _) = watcher(dir.path(), move |call| {
            if call == 2 {
                fs::remove_file(path.join("command.busy")).unwrap();
                fs::write(path.join("command.error"), "axis limit reached\n").unwrap();
            }
        });

        let result = watcher.watch(Duration::from_secs(10), "xx xtalcheck move x 99").unwrap();
        assert_eq!(result.outcome, OutcomeCode::Error);
        assert_eq!(result.ticks, 3);
        assert_eq!(result.diagnostic.as_deref(), Some("axis limit reached"));
    }

    #[test]
    fn test_busy_does_not_extend_timeout() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("command.busy"), "").unwrap();
        let (mut watcher, _) = watcher(dir.path(), |_| {});

        let result = watcher.watch(Duration::from_secs(2), "dc simplescan").unwrap();
        assert_eq!(result.outcome, OutcomeCode::Timeout);
        assert_eq!(result.ticks, 3);
    }

    #[test]
    #[traced_test]
    fn test_busy_and_timeout_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("command.busy"), "").unwrap();
        let (mut watcher, _) = watcher(dir.path(), |_| {});

        watcher.watch(Duration::from_secs(1), "dc simplescan").unwrap();

        assert!(logs_contain("Command 'dc simplescan' is still executing"));
        assert!(logs_contain("Timeout after 1.0 s"));
    }

    #[test]
    fn test_command_file_is_not_a_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("command.in"), "xx iss\r\n").unwrap();
        let (mut watcher, _) = watcher(dir.path(), |_| {});
        let result = watcher.watch(Duration::from_secs(1), "xx iss").unwrap();
        assert_eq!(result.outcome, OutcomeCode::Timeout);
    }

    #[test]
    fn test_content_read_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cap.stop"), "user abort").unwrap();
        let config = CapConfig {
            read_sentinel_content: false,
            ..CapConfig::for_watch_dir(dir.path())
        };
        let mut watcher = DirectoryWatcher::new(&config, Box::new(SleepWaiter));
        let result = watcher.watch(Duration::from_secs(1), "dc simplescan").unwrap();
        assert_eq!(result.outcome, OutcomeCode::Stopped);
        assert_eq!(result.diagnostic, None);
    }

    #[cfg(feature = "fs_events")]
    #[test]
    fn test_notify_waiter_wakes_on_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut waiter = NotifyWaiter::new(dir.path()).unwrap();
        let path = dir.path().to_path_buf();
        let cap = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            fs::write(path.join("command.done"), "").unwrap();
        });

        let waited = waiter.wait(Duration::from_secs(10)).unwrap();
        cap.join().unwrap();
        assert!(waited < Duration::from_secs(5), "waited {:?}", waited);
    }

    #[cfg(feature = "fs_events")]
    #[test]
    fn test_notify_waiter_resolves_done_early() {
        let dir = tempfile::tempdir().unwrap();
        let config = CapConfig::for_watch_dir(dir.path());
        let waiter = NotifyWaiter::new(dir.path()).unwrap();
        let mut watcher = DirectoryWatcher::new(&config, Box::new(waiter));
        let path = dir.path().to_path_buf();
        let cap = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            fs::write(path.join("command.done"), "").unwrap();
        });

        let result = watcher.watch(Duration::from_secs(30), "xx iss").unwrap();
        cap.join().unwrap();
        assert_eq!(result.outcome, OutcomeCode::Success);
        assert!(result.waited < Duration::from_secs(5), "waited {:?}", result.waited);
    }

    #[cfg(feature = "fs_events")]
    #[test]
    fn test_notify_waiter_keeps_timeout_budget() {
        let dir = tempfile::tempdir().unwrap();
        let config = CapConfig {
            poll_interval_ms: 50,
            ..CapConfig::for_watch_dir(dir.path())
        };
        let waiter = NotifyWaiter::new(dir.path()).unwrap();
        let mut watcher = DirectoryWatcher::new(&config, Box::new(waiter));
        let timeout = Duration::from_millis(300);

        let start = Instant::now();
        let result = watcher.watch(timeout, "dc simplescan").unwrap();
        assert_eq!(result.outcome, OutcomeCode::Timeout);
        assert!(result.waited >= timeout);
        assert!(start.elapsed() >= timeout);
    }

    #[cfg(feature = "fs_events")]
    #[test]
    fn test_notify_waiter_busy_does_not_extend_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = CapConfig {
            poll_interval_ms: 50,
            ..CapConfig::for_watch_dir(dir.path())
        };
        let waiter = NotifyWaiter::new(dir.path()).unwrap();
        let mut watcher = DirectoryWatcher::new(&config, Box::new(waiter));
        let path = dir.path().to_path_buf();
        // Keeps touching the busy file so events keep arriving
        let cap = std::thread::spawn(move || {
            for _ in 0..20 {
                fs::write(path.join("command.busy"), "").unwrap();
                std::thread::sleep(Duration::from_millis(10));
            }
        });

        let result = watcher.watch(Duration::from_millis(150), "dc simplescan").unwrap();
        cap.join().unwrap();
        assert_eq!(result.outcome, OutcomeCode::Timeout);
        assert!(result.waited >= Duration::from_millis(150));
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut watcher, _) = watcher(&dir.path().join("gone"), |_| {});
        let err = watcher.watch(Duration::from_secs(1), "xx iss").unwrap_err();
        assert!(matches!(err, CapError::DirectoryUnreadable { .. }));
    }
}
