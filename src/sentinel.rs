//! Sentinel file markers and classification of a directory listing.
//!
//! CAP signals progress and completion by creating files whose names contain
//! one of five literal markers. A listing can hold several sentinels at once;
//! [`Scan::from_names`] classifies every entry first and then picks the
//! terminal outcome by a fixed precedence, so the result never depends on the
//! order in which the operating system enumerates the directory.

use crate::response::OutcomeCode;

/// Marker substring found in a sentinel file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SentinelMarker {
    Busy,
    Error,
    Done,
    Stop,
    Closed,
}

impl SentinelMarker {
    /// Markers in the order they are tested against a file name.
    pub const ALL: [SentinelMarker; 5] = [
        SentinelMarker::Busy,
        SentinelMarker::Error,
        SentinelMarker::Done,
        SentinelMarker::Stop,
        SentinelMarker::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SentinelMarker::Busy => ".busy",
            SentinelMarker::Error => ".error",
            SentinelMarker::Done => ".done",
            SentinelMarker::Stop => ".stop",
            SentinelMarker::Closed => ".closed",
        }
    }

    /// Outcome this marker resolves an exchange to. `.busy` resolves nothing.
    pub fn outcome(self) -> Option<OutcomeCode> {
        match self {
            SentinelMarker::Busy => None,
            SentinelMarker::Error => Some(OutcomeCode::Error),
            SentinelMarker::Done => Some(OutcomeCode::Success),
            SentinelMarker::Stop => Some(OutcomeCode::Stopped),
            SentinelMarker::Closed => Some(OutcomeCode::Closed),
        }
    }

    /// Rank among terminal markers, lower wins: ERROR > STOPPED > CLOSED > DONE.
    fn precedence(self) -> u8 {
        match self {
            SentinelMarker::Error => 0,
            SentinelMarker::Stop => 1,
            SentinelMarker::Closed => 2,
            SentinelMarker::Done => 3,
            SentinelMarker::Busy => u8::MAX,
        }
    }

    /// The strongest marker contained in `name`, if any.
    ///
    /// A name can in principle carry two markers (`run.busy.done`); the
    /// terminal one wins, and among terminals the usual precedence applies.
    pub fn classify(name: &str) -> Option<SentinelMarker> {
        Self::ALL
            .into_iter()
            .filter(|marker| name.contains(marker.as_str()))
            .min_by_key(|marker| marker.precedence())
    }
}

/// A terminal sentinel picked out of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelHit {
    pub marker: SentinelMarker,
    pub file_name: String,
}

impl SentinelHit {
    pub fn outcome(&self) -> OutcomeCode {
        // Only terminal markers are ever stored in a hit.
        self.marker.outcome().unwrap_or(OutcomeCode::Error)
    }
}

/// Classification of one directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    /// Highest-precedence terminal sentinel present
    pub terminal: Option<SentinelHit>,
    /// At least one `.busy` sentinel present
    pub busy: bool,
    /// Entries carrying no marker at all
    pub unrecognized: usize,
}

impl Scan {
    /// Classify a set of entry names. `ignore` (the command file) is skipped.
    pub fn from_names<I, S>(names: I, ignore: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = names
            .into_iter()
            .map(|n| n.as_ref().to_string())
            .filter(|n| n != ignore)
            .collect();
        names.sort();

        let mut scan = Scan::default();
        for name in names {
            match SentinelMarker::classify(&name) {
                Some(SentinelMarker::Busy) => scan.busy = true,
                Some(marker) => {
                    let stronger = scan
                        .terminal
                        .as_ref()
                        .map_or(true, |hit| marker.precedence() < hit.marker.precedence());
                    if stronger {
                        scan.terminal = Some(SentinelHit {
                            marker,
                            file_name: name,
                        });
                    }
                }
                None => scan.unrecognized += 1,
            }
        }
        scan
    }

    pub fn outcome(&self) -> Option<OutcomeCode> {
        self.terminal.as_ref().map(SentinelHit::outcome)
    }
}
