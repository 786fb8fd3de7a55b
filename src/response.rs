//! Outcome codes reported by an exchange and their fixed descriptions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of one exchange with CAP.
///
/// The numeric values are the codes CAP tooling has always used in its logs
/// and are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum OutcomeCode {
    /// CAP reported an error through an `.error` sentinel
    Error = 0,
    /// CAP finished the command (`.done`)
    Success = 1,
    /// CAP stopped and accepts no new commands (`.stop`)
    Stopped = 2,
    /// CAP left listen mode (`.closed`)
    Closed = 3,
    /// No terminal sentinel appeared before the timeout
    Timeout = 4,
}

/// Code-to-message lookup, one row per outcome.
pub const RESPONSE_TABLE: [(OutcomeCode, &str); 5] = [
    (OutcomeCode::Error, "An error occurred during execution"),
    (OutcomeCode::Success, "Command executed correctly"),
    (
        OutcomeCode::Stopped,
        "CAP has stopped - no new commands can be passed",
    ),
    (OutcomeCode::Closed, "CAP listen mode was closed"),
    (OutcomeCode::Timeout, "Timeout, no response from CAP"),
];

impl OutcomeCode {
    /// All outcomes in code order.
    pub const ALL: [OutcomeCode; 5] = [
        OutcomeCode::Error,
        OutcomeCode::Success,
        OutcomeCode::Stopped,
        OutcomeCode::Closed,
        OutcomeCode::Timeout,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|outcome| outcome.code() == code)
    }

    /// Human-readable meaning, as written to the exchange log.
    pub fn message(self) -> &'static str {
        RESPONSE_TABLE[self as usize].1
    }

    pub fn is_success(self) -> bool {
        self == OutcomeCode::Success
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
