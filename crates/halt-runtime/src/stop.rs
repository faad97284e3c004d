//! Graceful stop with escalation to kill.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use halt_common::error::{ErrorKind, HaltError, Result};
use halt_core::signal::{Signal, parse_signal};
use tokio_util::sync::CancellationToken;

use crate::container::Container;
use crate::engine::Engine;
use crate::metrics::Action;
use crate::state::{WaitLimit, WaitOutcome};

/// Parameters of a graceful stop.
#[derive(Debug, Clone, Default)]
pub struct StopOptions {
    /// Signal to send instead of the container's stop signal.
    pub signal: Option<String>,
    /// Seconds to wait before killing; negative waits forever and never
    /// kills. `None` uses the container's stop timeout.
    pub timeout: Option<i64>,
    /// Ends an unbounded (negative timeout) wait early.
    pub cancel: Option<CancellationToken>,
}

impl StopOptions {
    /// Options with only a timeout set.
    #[must_use]
    pub fn with_timeout(timeout: i64) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

impl Engine {
    /// Stops the named container, killing it if it does not exit in time.
    ///
    /// Containers that are not running, or whose process is gone, are left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns not-found for an unknown container, invalid-parameter for an
    /// unparseable signal, and a system error wrapping any stop failure.
    pub async fn container_stop(self: &Arc<Self>, name: &str, opts: StopOptions) -> Result<()> {
        tracing::debug!(name, "container stop requested");
        let container = self.get_container(name)?;
        let state = container.state();
        if !state.is_running() || state.pid == 0 || !self.probe.is_alive(state.pid) {
            return Ok(());
        }
        match self.stop_container(&container, opts).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::InvalidParameter => Err(e),
            Err(e) => Err(HaltError::system(format_args!("cannot stop container: {name}"), e)),
        }
    }

    /// Sends the stop signal, waits, and escalates to kill.
    ///
    /// The stop runs on its own task, so dropping the returned future does
    /// not abandon a container halfway through its stop. Only a negative
    /// timeout honors [`StopOptions::cancel`].
    ///
    /// # Errors
    ///
    /// Returns invalid-parameter for an unparseable signal, the signal
    /// failure when an unbounded wait is cancelled, or the kill failure
    /// when escalation does not end the container.
    pub async fn stop_container(
        self: &Arc<Self>,
        container: &Arc<Container>,
        opts: StopOptions,
    ) -> Result<()> {
        if !container.is_running() {
            return Ok(());
        }
        let signal = match opts.signal.as_deref() {
            Some(raw) => parse_signal(raw)?,
            None => container.stop_signal(self.default_stop_signal),
        };
        let timeout = opts
            .timeout
            .unwrap_or_else(|| container.stop_timeout(self.config.stop.default_timeout_secs));

        let engine = Arc::clone(self);
        let target = Arc::clone(container);
        let cancel = opts.cancel;
        tokio::spawn(async move {
            let start = Instant::now();
            let result = engine.stop_and_wait(&target, signal, timeout, cancel).await;
            engine.metrics.observe_action(Action::Stop, start.elapsed());
            if result.is_ok() {
                engine.emit(&target, "stop", BTreeMap::new());
            }
            result
        })
        .await
        .map_err(|e| HaltError::system_msg(format!("stop task failed: {e}")))?
    }

    async fn stop_and_wait(
        self: &Arc<Self>,
        container: &Arc<Container>,
        signal: Signal,
        timeout: i64,
        cancel: Option<CancellationToken>,
    ) -> Result<()> {
        tracing::debug!(
            id = %container.id(),
            signal = signal.as_str(),
            timeout,
            "stopping container"
        );
        let grace = Duration::from_millis(self.config.stop.kill_grace_ms);
        let mut wait = Duration::from_secs(u64::try_from(timeout).unwrap_or(0));

        let send_error = match self.signal_possibly_dead(container, signal).await {
            Ok(()) => None,
            Err(e) => {
                wait = grace;
                Some(e)
            }
        };

        let limit = if timeout >= 0 {
            WaitLimit::Deadline(wait)
        } else {
            WaitLimit::Cancellable(cancel.unwrap_or_default())
        };
        if container.wait_not_running(limit).await == WaitOutcome::Exited {
            return Ok(());
        }

        if let Some(e) = &send_error {
            tracing::error!(
                id = %container.id(),
                error = %e,
                "error sending stop (signal {}) to container",
                signal as i32
            );
        }
        if timeout < 0 {
            return Err(send_error.unwrap_or_else(|| HaltError::Cancelled {
                operation: format!("stop of container {}", container.id()),
            }));
        }

        tracing::info!(
            id = %container.id(),
            "container failed to exit within {wait:?} of signal {} - using the force",
            signal as i32
        );
        if let Err(kill_error) = self.kill(container).await {
            if container.wait_not_running(WaitLimit::Deadline(grace)).await != WaitOutcome::Exited {
                tracing::error!(
                    id = %container.id(),
                    error = %kill_error,
                    "error killing container"
                );
                return Err(kill_error);
            }
        }
        Ok(())
    }

    /// Delivers `signal`, reporting a missing task as [`HaltError::NoSuchProcess`].
    async fn signal_possibly_dead(
        self: &Arc<Self>,
        container: &Arc<Container>,
        signal: Signal,
    ) -> Result<()> {
        match self.kill_with_signal(container, signal).await {
            Err(e) if e.is_not_found() => {
                let err = HaltError::NoSuchProcess {
                    pid: container.state().pid,
                    signal: signal as i32,
                };
                tracing::debug!(id = %container.id(), error = %err, "signal target is gone");
                Err(err)
            }
            other => other,
        }
    }
}
