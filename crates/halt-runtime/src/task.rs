//! Handle on the live task behind a running container.

use std::fmt;

use async_trait::async_trait;
use halt_common::error::Result;
use halt_core::signal::{self, Signal};

/// The runtime's view of a container's running process.
///
/// Errors whose kind is `NotFound` mean the process or task is already
/// gone.
#[async_trait]
pub trait RuntimeTask: Send + Sync + fmt::Debug {
    /// OS pid of the task's init process.
    fn pid(&self) -> u32;

    /// Delivers `signal` to the task.
    async fn kill(&self, signal: Signal) -> Result<()>;

    /// Resumes a paused task.
    async fn resume(&self) -> Result<()>;
}

/// A task backed directly by a host process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessTask {
    pid: u32,
}

impl ProcessTask {
    /// Wraps the process `pid`.
    #[must_use]
    pub const fn new(pid: u32) -> Self {
        Self { pid }
    }
}

#[async_trait]
impl RuntimeTask for ProcessTask {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn kill(&self, signal: Signal) -> Result<()> {
        signal::send(self.pid, signal)
    }

    async fn resume(&self) -> Result<()> {
        signal::send(self.pid, Signal::SIGCONT)
    }
}
