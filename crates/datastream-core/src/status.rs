//! The state machine shared by every producer and consumer endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `Active ⇄ Suspended → {EndOfStream | ClosedWithError}`.
///
/// Terminal states are sticky: endpoints ignore every transition request once
/// they report `EndOfStream` or `ClosedWithError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamStatus {
    Active,
    Suspended,
    EndOfStream,
    ClosedWithError,
}

impl StreamStatus {
    pub const fn is_open(self) -> bool {
        matches!(self, StreamStatus::Active | StreamStatus::Suspended)
    }

    pub const fn is_terminal(self) -> bool {
        !self.is_open()
    }
}

impl Default for StreamStatus {
    fn default() -> Self {
        StreamStatus::Active
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Active => "active",
            StreamStatus::Suspended => "suspended",
            StreamStatus::EndOfStream => "end-of-stream",
            StreamStatus::ClosedWithError => "closed-with-error",
        };
        f.write_str(s)
    }
}
