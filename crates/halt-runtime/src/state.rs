//! Observable container state and bounded waits on it.

use std::time::Duration;

use halt_common::types::ContainerState;
use tokio_util::sync::CancellationToken;

/// The part of a container's state that waiters subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    /// Lifecycle state.
    pub status: ContainerState,
    /// OS pid of the container's process; `0` when never started or exited.
    pub pid: u32,
    /// Exit code of the last run, once known.
    pub exit_code: Option<i32>,
}

impl StateSnapshot {
    /// Snapshot of a freshly created container.
    #[must_use]
    pub const fn created() -> Self {
        Self {
            status: ContainerState::Created,
            pid: 0,
            exit_code: None,
        }
    }

    /// Returns `true` while a live task backs the container.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

/// How long a not-running wait may last.
#[derive(Debug, Clone)]
pub enum WaitLimit {
    /// Give up after the duration elapses.
    Deadline(Duration),
    /// Wait until the token is cancelled.
    Cancellable(CancellationToken),
}

/// Result of waiting for a container to stop running.
///
/// Expiry is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The container was observed not running.
    Exited,
    /// The deadline elapsed first.
    TimedOut,
    /// The token was cancelled first.
    Cancelled,
}
