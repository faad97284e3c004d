//! Exit monitor: the local source of exit events.
//!
//! Polls the liveness probe for each running container and records the
//! exit once the process is gone. The poll also wakes on every state
//! change so a monitor ends as soon as another path records the exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::container::Container;
use crate::engine::Engine;

impl Engine {
    /// Spawns a monitor that records `container`'s exit when its process
    /// disappears. The task ends once the container is no longer running.
    pub fn spawn_exit_monitor(self: &Arc<Self>, container: &Arc<Container>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let container = Arc::clone(container);
        let interval = Duration::from_millis(self.config.monitor.interval_ms);
        tokio::spawn(async move {
            let mut changes = container.subscribe();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::debug!(id = %container.id(), ?interval, "exit monitor started");
            loop {
                let state = container.state();
                if !state.is_running() {
                    break;
                }
                if state.pid != 0 && !engine.probe.is_alive(state.pid) {
                    tracing::debug!(id = %container.id(), pid = state.pid, "process disappeared");
                    let _ = engine.handle_exit(&container, None).await;
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(id = %container.id(), "exit monitor finished");
        })
    }
}
