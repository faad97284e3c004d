//! Removal entry point: preconditions, the in-progress guard and dispatch.

use std::sync::Arc;
use std::time::Instant;

use halt_common::config::GuardMode;
use halt_common::error::{HaltError, Result};
use halt_common::types::ContainerState;

use crate::container::Container;
use crate::engine::Engine;
use crate::metrics::Action;
use crate::names::normalize;

/// Parameters of a removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill a running container instead of refusing.
    pub force: bool,
    /// Also delete anonymous volumes.
    pub remove_volumes: bool,
    /// Remove only the named link, leaving the container alone.
    pub remove_link: bool,
}

impl Engine {
    /// Removes the container known as `name`.
    ///
    /// # Errors
    ///
    /// Returns not-found for an unknown name (strict guard mode only), a
    /// conflict when another removal is in flight or the container is
    /// running without `force`, or the cleanup failure.
    pub async fn container_rm(self: &Arc<Self>, name: &str, opts: RemoveOptions) -> Result<()> {
        tracing::debug!(name, ?opts, "container rm requested");
        let container = match self.get_container(name) {
            Ok(container) => container,
            Err(e) if e.is_not_found() && self.guard_mode() == GuardMode::Relaxed => {
                tracing::debug!(name, "nothing to remove");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.remove_resolved(&container, name, opts).await
    }

    /// Removes an already resolved container. Removing a container that is
    /// already gone succeeds.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::container_rm`].
    pub async fn remove_container(
        self: &Arc<Self>,
        container: &Arc<Container>,
        opts: RemoveOptions,
    ) -> Result<()> {
        let name = format!("/{}", container.name());
        self.remove_resolved(container, &name, opts).await
    }

    async fn remove_resolved(
        self: &Arc<Self>,
        container: &Arc<Container>,
        name: &str,
        opts: RemoveOptions,
    ) -> Result<()> {
        if container.state().status == ContainerState::Removed {
            return Ok(());
        }
        let start = Instant::now();

        let state = container.state();
        if !opts.remove_link && (state.pid == 0 || !self.probe.is_alive(state.pid)) {
            tracing::debug!(
                id = %container.id(),
                pid = state.pid,
                "process gone, removing without guard"
            );
            if state.is_running() {
                let _ = self.handle_exit(container, None).await;
            }
            let result = self.cleanup_container(container, &opts).await;
            self.metrics.observe_action(Action::Delete, start.elapsed());
            return result;
        }

        let _guard = match self.guard_mode() {
            GuardMode::Strict => Some(container.try_begin_removal().ok_or_else(|| {
                HaltError::conflict(format!("removal of container {name} is already in progress"))
            })?),
            GuardMode::Relaxed => None,
        };

        // An earlier removal may have finished since the lookup.
        if !self.is_registered(container.id()) {
            return Ok(());
        }

        if opts.remove_link {
            return self.rm_link(container, name).await;
        }

        let result = self.cleanup_container(container, &opts).await;
        self.metrics.observe_action(Action::Delete, start.elapsed());
        result
    }

    /// Removes the link `name` pointing at `child`.
    ///
    /// The child itself is untouched.
    pub(crate) async fn rm_link(&self, child: &Container, name: &str) -> Result<()> {
        let name = normalize(name);
        let (parent, alias) = name.rsplit_once('/').unwrap_or(("", name.as_str()));
        if parent.is_empty() {
            return Err(HaltError::conflict(
                "Conflict, cannot remove the default link name of the container",
            ));
        }
        let parent_id = self.names.get(parent).ok_or_else(|| HaltError::NotFound {
            kind: "parent container",
            id: format!("{parent} for link name {name}"),
        })?;

        let _ = self.names.release(&name);
        if let Some(parent_container) = self.containers.get(&parent_id) {
            self.links.unlink(&name, child.id(), &parent_id);
            if let Err(e) = self.network.update_network(&parent_id) {
                tracing::debug!(
                    link = %alias,
                    error = %e,
                    "could not update network to remove link"
                );
            }
            let inner = parent_container.lock().await;
            if let Err(e) = self.checkpoint(&parent_container, &inner) {
                tracing::warn!(id = %parent_id, error = %e, "cannot persist link removal");
            }
        }
        tracing::info!(link = %name, child = %child.id(), "link removed");
        Ok(())
    }
}
