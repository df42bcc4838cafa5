//! Bounded retry policy for per-chunk failures.
//!
//! Transient decode failures are tolerated up to a consecutive threshold;
//! any successful chunk resets the count. Fatal transport errors never pass
//! through here; they abort the session unconditionally.

use std::time::Duration;

/// What the session loop should do after a recoverable chunk failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Wait out the delay, then continue reading.
    Retry { delay: Duration },
    /// The consecutive threshold was reached; abort the session.
    Abort,
}

/// Consecutive-failure counter with a fixed escalation threshold.
#[derive(Debug)]
pub struct ErrorRecovery {
    consecutive: u32,
    max_consecutive: u32,
    retry_delay: Duration,
}

impl ErrorRecovery {
    pub fn new(max_consecutive: u32, retry_delay: Duration) -> Self {
        Self {
            consecutive: 0,
            max_consecutive,
            retry_delay,
        }
    }

    /// Record a recoverable failure and decide whether to keep going.
    pub fn on_failure(&mut self) -> RecoveryAction {
        self.consecutive += 1;
        if self.consecutive >= self.max_consecutive {
            RecoveryAction::Abort
        } else {
            RecoveryAction::Retry {
                delay: self.retry_delay,
            }
        }
    }

    /// Record a successfully processed chunk, resetting the counter.
    pub fn on_success(&mut self) {
        self.consecutive = 0;
    }

    /// Current consecutive-failure count.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
