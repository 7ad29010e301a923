//! Lifecycle error types for the hibernation proxy
//!
//! These errors describe faults of the managed backend process. The
//! unrecoverable kinds (spawn failure, readiness timeout, unexpected exit)
//! are latched into the stats registry as the major error, so every later
//! client receives a canned reply instead of poking a broken backend.

use thiserror::Error;

use crate::stats::Status;

/// Errors produced while driving the backend lifecycle.
///
/// Variants carry plain strings rather than source errors because a latched
/// major error is cloned out of the registry on every client connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The backend executable could not be spawned
    #[error("failed to spawn the backend process: {reason}")]
    Spawn { reason: String },

    /// The backend never printed its readiness line
    #[error("backend did not become ready within {timeout_secs}s")]
    ReadyTimeout { timeout_secs: u64 },

    /// The backend exited outside of a requested stop
    #[error("backend process exited unexpectedly ({detail})")]
    Crash { detail: String },

    /// The backend console (stdin) is gone or rejected a command
    #[error("backend console is unavailable: {reason}")]
    Console { reason: String },

    /// Suspend or resume signalling failed for the whole tree
    #[error("process tree signalling failed: {reason}")]
    Signal { reason: String },

    /// The backend is not in a state that accepts the operation.
    /// Never latched; callers use it to gate interactive operations.
    #[error("backend is not ready (status: {status})")]
    NotReady { status: Status },
}

impl LifecycleError {
    /// Whether this error kind must be latched as the major error
    pub fn is_major(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::ReadyTimeout { .. } | Self::Crash { .. }
        )
    }
}
