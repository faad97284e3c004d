//! Forced termination and arbitrary signal delivery.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use halt_common::error::{HaltError, Result};
use halt_common::types::ContainerState;
use halt_core::probe::{LivenessProbe, SignalProbe, is_zombie};
use halt_core::signal::{self, Signal, parse_signal};

use crate::container::Container;
use crate::engine::Engine;
use crate::metrics::Action;
use crate::state::{WaitLimit, WaitOutcome};

/// What happened to a signal handed to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The task accepted the signal.
    Sent,
    /// The container is restarting; the exit-on-next flag was enough.
    Skipped,
    /// The task reported the process gone.
    ProcessGone,
}

impl Engine {
    /// Sends `signal` to the named container.
    ///
    /// An empty or absent signal means SIGKILL, which kills and waits for
    /// the exit. Any other signal is delivered without waiting. Containers
    /// that are not running, or whose process is already gone, are left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns invalid-parameter for an unparseable signal, not-found for
    /// an unknown container, or the delivery failure.
    pub async fn container_kill(self: &Arc<Self>, name: &str, signal: Option<&str>) -> Result<()> {
        tracing::debug!(name, signal, "container kill requested");
        let signal = match signal.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => parse_signal(raw)?,
            None => Signal::SIGKILL,
        };
        let container = self.get_container(name)?;
        let state = container.state();
        if !state.is_running() || state.pid == 0 {
            return Ok(());
        }
        if !self.probe.is_alive(state.pid) {
            tracing::debug!(
                id = %container.id(),
                pid = state.pid,
                "kill skipped, process does not exist"
            );
            return Ok(());
        }
        if signal == Signal::SIGKILL {
            self.kill(&container).await
        } else {
            self.kill_with_signal(&container, signal).await
        }
    }

    /// Delivers `signal` to the container's task.
    ///
    /// When the task reports the process gone, a background reconcile task
    /// waits up to the container's stop timeout for the exit to be
    /// recorded and records it itself otherwise.
    ///
    /// # Errors
    ///
    /// Returns a conflict when there is no running task, or a system error
    /// when delivery fails for another reason.
    pub async fn kill_with_signal(
        self: &Arc<Self>,
        container: &Arc<Container>,
        signal: Signal,
    ) -> Result<()> {
        self.deliver(container, signal).await.map(|_| ())
    }

    pub(crate) async fn deliver(
        self: &Arc<Self>,
        container: &Arc<Container>,
        signal: Signal,
    ) -> Result<Delivery> {
        tracing::debug!(id = %container.id(), signal = signal.as_str(), "sending kill signal");
        let mut inner = container.lock().await;

        let status = container.state().status;
        let task = match (&inner.task, status.is_running()) {
            (Some(task), true) => Arc::clone(task),
            _ => {
                return Err(HaltError::NotRunning {
                    id: container.id().to_string(),
                });
            }
        };

        let arms_exit = match container.configured_stop_signal() {
            Some(stop) if signal != Signal::SIGKILL => stop == signal,
            _ => true,
        };
        let mut resume = false;
        if arms_exit {
            inner.exit_on_next = true;
            resume = status == ContainerState::Paused;
        }

        if !self.is_shutting_down() {
            inner.manually_stopped = true;
            if let Err(e) = self.checkpoint(container, &inner) {
                tracing::warn!(id = %container.id(), error = %e, "failed to persist manual stop");
            }
        }

        if status == ContainerState::Restarting {
            return Ok(Delivery::Skipped);
        }

        let mut delivery = Delivery::Sent;
        if let Err(e) = task.kill(signal).await {
            if !e.is_not_found() {
                return Err(HaltError::system(
                    format_args!("cannot kill container {}", container.id()),
                    e,
                ));
            }
            tracing::debug!(
                id = %container.id(),
                error = %e,
                "container kill failed because of 'container not found' or 'no such process'"
            );
            resume = false;
            delivery = Delivery::ProcessGone;
            self.spawn_exit_reconcile(container);
        }

        if resume {
            if let Err(e) = task.resume().await {
                tracing::warn!(id = %container.id(), error = %e, "cannot unpause container");
            }
        }
        drop(inner);

        self.emit(
            container,
            "kill",
            BTreeMap::from([("signal".to_owned(), (signal as i32).to_string())]),
        );
        Ok(delivery)
    }

    /// Forcefully terminates a container and waits until it is not running.
    ///
    /// # Errors
    ///
    /// Returns a conflict if the container is not running, or an error when
    /// no exit was observed even after signalling the pid directly.
    pub async fn kill(self: &Arc<Self>, container: &Arc<Container>) -> Result<()> {
        tracing::debug!(id = %container.id(), "kill");
        if !container.is_running() {
            return Err(HaltError::NotRunning {
                id: container.id().to_string(),
            });
        }
        let start = Instant::now();
        let result = self.kill_and_wait(container).await;
        self.metrics.observe_action(Action::Kill, start.elapsed());
        result
    }

    async fn kill_and_wait(self: &Arc<Self>, container: &Arc<Container>) -> Result<()> {
        match self.deliver(container, Signal::SIGKILL).await {
            Ok(Delivery::ProcessGone) => {
                let _ = self.handle_exit(container, None).await;
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                let _ = self.handle_exit(container, None).await;
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(id = %container.id(), error = %e, "SIGKILL delivery failed");
            }
            Ok(Delivery::Sent | Delivery::Skipped) => {}
        }

        let wait = Duration::from_millis(self.config.kill.wait_ms);
        if container.wait_not_running(WaitLimit::Deadline(wait)).await == WaitOutcome::Exited {
            return Ok(());
        }
        tracing::error!(
            id = %container.id(),
            ?wait,
            "container failed to exit within {wait:?} of kill, trying direct SIGKILL"
        );

        match self.kill_directly(container) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                let _ = self.handle_exit(container, None).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let last = Duration::from_millis(self.config.kill.direct_wait_ms);
        if container.wait_not_running(WaitLimit::Deadline(last)).await == WaitOutcome::Exited {
            Ok(())
        } else {
            Err(HaltError::NoExitEvent {
                id: container.id().to_string(),
            })
        }
    }

    /// Signals the pid itself, bypassing the task.
    fn kill_directly(&self, container: &Container) -> Result<()> {
        let pid = container.state().pid;
        if pid == 0 {
            return Err(HaltError::NoSuchProcess {
                pid,
                signal: Signal::SIGKILL as i32,
            });
        }
        if let Err(e) = signal::send(pid, Signal::SIGKILL) {
            if e.is_not_found() {
                tracing::debug!(id = %container.id(), pid, "no such process");
            }
            return Err(e);
        }

        // Signal delivery succeeds for zombies, which no signal removes.
        if SignalProbe.is_alive(pid) {
            match is_zombie(pid) {
                Ok(true) => {
                    return Err(HaltError::system_msg(format!(
                        "container {} PID {pid} is zombie and can not be killed. Use an init \
                         process inside the container that forwards signals and reaps processes",
                        container.id().short()
                    )));
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(id = %container.id(), pid, error = %e, "zombie check failed");
                }
            }
        }
        Ok(())
    }

    /// Waits on a detached task for an exit that may already be in flight,
    /// recording it if none arrives within the stop timeout.
    fn spawn_exit_reconcile(self: &Arc<Self>, container: &Arc<Container>) {
        let secs = container.stop_timeout(self.config.stop.default_timeout_secs);
        let limit = Duration::from_secs(u64::try_from(secs).unwrap_or(0));
        let engine = Arc::clone(self);
        let container = Arc::clone(container);
        let _ = tokio::spawn(async move {
            tracing::debug!(id = %container.id(), ?limit, "waiting for pending exit event");
            if container.wait_not_running(WaitLimit::Deadline(limit)).await != WaitOutcome::Exited {
                let _ = engine.handle_exit(&container, None).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{FAKE_PID, Harness, TaskBehavior};

    #[tokio::test]
    async fn kill_converges_when_process_exits() {
        let h = Harness::new();
        let c = h.create("web").await;
        let task = h.start(&c, FAKE_PID).await;

        h.engine.kill(&c).await.expect("kill");
        assert!(!c.is_running());
        assert_eq!(task.signals(), vec![Signal::SIGKILL]);
        assert!(c.lock().await.manually_stopped);
    }

    #[tokio::test]
    async fn kill_rejects_stopped_container() {
        let h = Harness::new();
        let c = h.create("web").await;
        let err = h.engine.kill(&c).await.unwrap_err();
        assert_eq!(err.kind(), halt_common::error::ErrorKind::Conflict);
        assert!(err.to_string().contains("is not running"));
    }

    #[tokio::test]
    async fn kill_of_vanished_process_records_exit() {
        let h = Harness::new();
        let c = h.create("web").await;
        let _task = h.start_with(&c, FAKE_PID, TaskBehavior::Gone).await;

        h.engine.kill(&c).await.expect("no such process is success");
        assert_eq!(c.state().status, ContainerState::Exited);
    }

    #[tokio::test(start_paused = true)]
    async fn escalation_without_pid_records_exit() {
        let h = Harness::new();
        let c = h.create("web").await;
        let _task = h.start_with(&c, 0, TaskBehavior::Ignore).await;

        h.engine.kill(&c).await.expect("pid 0 has no process to wait for");
        assert_eq!(c.state().status, ContainerState::Exited);
    }

    #[tokio::test]
    async fn unobserved_direct_kill_is_an_error() {
        let h = Harness::new();
        let c = h.create("web").await;
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let _task = h.start_with(&c, child.id(), TaskBehavior::Ignore).await;

        let err = h.engine.kill(&c).await.unwrap_err();
        assert_eq!(err.kind(), halt_common::error::ErrorKind::System);
        assert!(c.is_running());
        let status = child.wait().expect("reap");
        assert!(!status.success(), "direct SIGKILL reached the process");
    }

    #[tokio::test]
    async fn stop_signal_arms_exit_on_next_and_resumes_paused() {
        let h = Harness::new();
        let c = h.create_with("web", |spec| spec.stop_signal = Some("SIGINT".into())).await;
        let task = h.start_with(&c, FAKE_PID, TaskBehavior::Ignore).await;
        h.set_status(&c, ContainerState::Paused).await;

        h.engine.kill_with_signal(&c, Signal::SIGINT).await.expect("signal");
        assert!(c.lock().await.exit_on_next);
        assert_eq!(task.resumes(), 1);

        h.engine.kill_with_signal(&c, Signal::SIGUSR1).await.expect("signal");
        assert_eq!(task.resumes(), 1);
    }

    #[tokio::test]
    async fn other_signal_does_not_arm_exit_on_next() {
        let h = Harness::new();
        let c = h.create_with("web", |spec| spec.stop_signal = Some("SIGINT".into())).await;
        let _task = h.start_with(&c, FAKE_PID, TaskBehavior::Ignore).await;

        h.engine.kill_with_signal(&c, Signal::SIGHUP).await.expect("signal");
        assert!(!c.lock().await.exit_on_next);
    }

    #[tokio::test]
    async fn restarting_container_gets_no_signal_but_is_marked() {
        let h = Harness::new();
        let c = h.create("web").await;
        let task = h.start_with(&c, FAKE_PID, TaskBehavior::Ignore).await;
        h.set_status(&c, ContainerState::Restarting).await;

        h.engine.kill_with_signal(&c, Signal::SIGTERM).await.expect("skip");
        assert!(task.signals().is_empty());
        let inner = c.lock().await;
        assert!(inner.manually_stopped);
        assert!(inner.exit_on_next);
    }

    #[tokio::test]
    async fn shutdown_does_not_record_manual_stop() {
        let h = Harness::new();
        let c = h.create("web").await;
        let _task = h.start_with(&c, FAKE_PID, TaskBehavior::Ignore).await;
        h.engine.begin_shutdown();

        h.engine.kill_with_signal(&c, Signal::SIGTERM).await.expect("signal");
        assert!(!c.lock().await.manually_stopped);
    }

    #[tokio::test]
    async fn kill_event_carries_signal_number() {
        let h = Harness::new();
        let c = h.create("web").await;
        let _task = h.start_with(&c, FAKE_PID, TaskBehavior::Ignore).await;
        let mut events = h.events.subscribe();

        h.engine.kill_with_signal(&c, Signal::SIGTERM).await.expect("signal");
        let event = events.recv().await.expect("event");
        assert_eq!(event.action, "kill");
        assert_eq!(event.attributes["signal"], "15");
    }

    #[tokio::test(start_paused = true)]
    async fn gone_task_is_reconciled_in_background() {
        let h = Harness::new();
        let c = h.create_with("web", |spec| spec.stop_timeout = Some(1)).await;
        let _task = h.start_with(&c, FAKE_PID, TaskBehavior::Gone).await;

        h.engine.kill_with_signal(&c, Signal::SIGTERM).await.expect("gone is not an error");
        assert!(c.is_running());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(c.state().status, ContainerState::Exited);
    }

    #[tokio::test]
    async fn container_kill_validates_signal_before_lookup() {
        let h = Harness::new();
        let err = h.engine.container_kill("missing", Some("SIGNOPE")).await.unwrap_err();
        assert_eq!(err.kind(), halt_common::error::ErrorKind::InvalidParameter);
        let err = h.engine.container_kill("missing", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn container_kill_skips_dead_pid() {
        let h = Harness::new();
        let c = h.create("web").await;
        let task = h.start_with(&c, FAKE_PID, TaskBehavior::Ignore).await;
        h.probe.set_alive(FAKE_PID, false);

        h.engine.container_kill("web", Some("TERM")).await.expect("noop");
        assert!(task.signals().is_empty());
    }

    #[tokio::test]
    async fn container_kill_with_custom_signal_does_not_wait() {
        let h = Harness::new();
        let c = h.create("web").await;
        let task = h.start_with(&c, FAKE_PID, TaskBehavior::Ignore).await;
        h.probe.set_alive(FAKE_PID, true);

        h.engine.container_kill("web", Some("USR1")).await.expect("signal");
        assert_eq!(task.signals(), vec![Signal::SIGUSR1]);
        assert!(c.is_running());
    }
}
