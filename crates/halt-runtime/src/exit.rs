//! Exit handling: the transition from running to exited.
//!
//! Both the exit monitor and the kill paths drive this when they learn
//! the process is gone. It runs under the container lock and does nothing
//! once the container no longer looks running, so redundant calls are
//! harmless.

use std::collections::BTreeMap;

use chrono::Utc;
use halt_common::types::ContainerState;

use crate::container::Container;
use crate::engine::Engine;

/// Exit code recorded when the process disappeared without reporting one.
pub const UNKNOWN_EXIT_CODE: i32 = 255;

impl Engine {
    /// Records that the container's process exited.
    ///
    /// Returns `true` if this call performed the transition.
    pub async fn handle_exit(&self, container: &Container, exit_code: Option<i32>) -> bool {
        let mut inner = container.lock().await;
        if !container.is_running() {
            return false;
        }
        let code = exit_code.unwrap_or(UNKNOWN_EXIT_CODE);
        inner.task = None;
        inner.exit_on_next = false;
        inner.finished_at = Some(Utc::now());
        container.update_state(&mut inner, |s| {
            s.status = ContainerState::Exited;
            s.pid = 0;
            s.exit_code = Some(code);
        });
        if let Err(e) = self.checkpoint(container, &inner) {
            tracing::warn!(
                id = %container.id(),
                error = %e,
                "failed to checkpoint exited container"
            );
        }
        drop(inner);

        tracing::debug!(id = %container.id(), exit_code = code, "container exited");
        self.emit(
            container,
            "die",
            BTreeMap::from([("exitCode".to_owned(), code.to_string())]),
        );
        true
    }
}
