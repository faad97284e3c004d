//! Fixed-order teardown of a container's resources.
//!
//! Steps run in order and stop at the first fatal error, which is
//! recorded on the container so a later removal can be diagnosed and
//! retried. Only the storage release and the root directory removal are
//! fatal; everything else is logged and skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use halt_common::config::GuardMode;
use halt_common::constants;
use halt_common::error::{HaltError, Result};
use halt_common::types::{ContainerId, ContainerState};

use crate::container::Container;
use crate::engine::Engine;
use crate::remove::RemoveOptions;
use crate::stop::StopOptions;

impl Engine {
    /// Tears down `container` and deregisters it.
    ///
    /// A container that is already removed is left alone.
    ///
    /// # Errors
    ///
    /// Returns a conflict for a running container without `force`, the
    /// kill or stop failure that kept it running, or the first fatal
    /// release failure.
    pub(crate) async fn cleanup_container(
        self: &Arc<Self>,
        container: &Arc<Container>,
        opts: &RemoveOptions,
    ) -> Result<()> {
        tracing::debug!(id = %container.id(), "cleaning up container");
        let status = container.state().status;
        if status == ContainerState::Removed {
            return Ok(());
        }

        if status.is_running() {
            if !opts.force {
                let mut procedure =
                    "Stop the container before attempting removal or force remove".to_owned();
                if status == ContainerState::Paused {
                    procedure = format!("Unpause and then {}", procedure.to_lowercase());
                }
                return Err(HaltError::conflict(format!(
                    "You cannot remove a {status} container {}. {procedure}",
                    container.id()
                )));
            }
            match self.kill(container).await {
                Ok(()) => {}
                // Exited between the check and the kill.
                Err(HaltError::NotRunning { .. }) => {}
                Err(e) => {
                    return Err(HaltError::system(
                        format_args!(
                            "Could not kill running container {}, cannot remove",
                            container.id()
                        ),
                        e,
                    ));
                }
            }
        }

        self.stats.stop_collection(container.id());

        tracing::debug!(
            id = %container.id(),
            timeout = constants::REMOVE_STOP_TIMEOUT_SECS,
            "stopping before removal"
        );
        let stop = StopOptions::with_timeout(constants::REMOVE_STOP_TIMEOUT_SECS);
        if let Err(e) = self.stop_container(container, stop).await {
            tracing::debug!(id = %container.id(), error = %e, "stop before removal failed");
            return Err(e);
        }

        {
            let mut inner = container.lock().await;
            // A concurrent cleanup may have finished since the first check.
            if container.state().status == ContainerState::Removed {
                tracing::debug!(id = %container.id(), "container removed concurrently");
                return Ok(());
            }
            container.update_state(&mut inner, |s| s.status = ContainerState::Dead);
            match self.checkpoint(container, &inner) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::error!(
                        id = %container.id(),
                        error = %e,
                        "error saving dying container to disk"
                    );
                }
            }
        }

        self.release_storage(container).await?;
        self.remove_root(container).await?;

        let parents = self.links.parents(container.id());
        let mut names = self.links.delete(container.id());
        names.extend(self.names.names_for(container.id()));
        names.sort();
        names.dedup();
        self.checkpoint_parents(parents).await;

        self.labels.release(container.process_label());

        let _ = self.containers.delete(container.id());
        match self.store.delete(container.id()) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(id = %container.id(), error = %e, "cannot delete container record");
            }
        }

        let mounts = container.lock().await.mount_points.clone();
        let released = self
            .volumes
            .remove_mount_points(container.id(), &mounts, opts.remove_volumes);
        if let Err(e) = released {
            tracing::error!(id = %container.id(), error = %e, "cannot release volumes");
        }

        for name in &names {
            if !self.names.release(name) {
                tracing::debug!(id = %container.id(), name = %name, "name already released");
            }
        }

        let removed_now = {
            let mut inner = container.lock().await;
            inner.removal_error = None;
            if container.state().status == ContainerState::Removed {
                false
            } else {
                container.update_state(&mut inner, |s| s.status = ContainerState::Removed);
                true
            }
        };
        if removed_now {
            self.metrics.container_removed();
            self.emit_destroy(container);
            tracing::info!(id = %container.id(), name = container.name(), "container removed");
        }
        Ok(())
    }

    /// Releases the writable layer, or the snapshot lease when no layer was
    /// ever allocated.
    async fn release_storage(&self, container: &Container) -> Result<()> {
        let layer = container.lock().await.rw_layer.clone();
        if let Some(layer) = layer {
            tracing::debug!(id = %container.id(), layer = %layer.id, "releasing writable layer");
            if let Err(e) = self.layers.release_layer(&layer).await {
                let err = HaltError::system(format_args!("container {}", container.id()), e);
                return Err(self.record_removal_error(container, err).await);
            }
            container.lock().await.rw_layer = None;
        } else if self.config.storage.snapshotter {
            tracing::debug!(id = %container.id(), "deleting snapshot lease");
            if let Err(e) = self.leases.delete(container.id().as_str(), true).await {
                return Err(self.record_removal_error(container, e).await);
            }
        }
        Ok(())
    }

    /// Removes the root directory while holding the container lock.
    async fn remove_root(&self, container: &Container) -> Result<()> {
        let inner = container.lock().await;
        let root = container.root().to_path_buf();
        tracing::debug!(id = %container.id(), root = %root.display(), "removing container root");
        let filesystem = Arc::clone(&self.filesystem);
        let result = tokio::task::spawn_blocking(move || filesystem.ensure_remove_all(&root))
            .await
            .unwrap_or_else(|e| {
                Err(HaltError::system_msg(format!("root removal task failed: {e}")))
            });
        drop(inner);

        if let Err(e) = result {
            let err = HaltError::system(
                format_args!("unable to remove filesystem for {}", container.id()),
                e,
            );
            return Err(self.record_removal_error(container, err).await);
        }
        Ok(())
    }

    /// Rewrites the records of parents that linked to a removed child.
    async fn checkpoint_parents(&self, links: Vec<(String, ContainerId)>) {
        let mut parents: Vec<ContainerId> = links.into_iter().map(|(_, parent)| parent).collect();
        parents.sort();
        parents.dedup();
        for id in parents {
            let Some(parent) = self.containers.get(&id) else {
                continue;
            };
            let inner = parent.lock().await;
            if let Err(e) = self.checkpoint(&parent, &inner) {
                tracing::warn!(%id, error = %e, "cannot persist parent after unlinking");
            }
        }
    }

    /// Stores `err` as the container's removal error and hands it back.
    async fn record_removal_error(&self, container: &Container, err: HaltError) -> HaltError {
        tracing::warn!(id = %container.id(), error = %err, "removal failed");
        let mut inner = container.lock().await;
        inner.removal_error = Some(err.to_string());
        if let Err(e) = self.checkpoint(container, &inner) {
            tracing::debug!(id = %container.id(), error = %e, "cannot persist removal error");
        }
        err
    }

    fn emit_destroy(self: &Arc<Self>, container: &Arc<Container>) {
        match self.guard_mode() {
            GuardMode::Strict => self.emit(container, "destroy", BTreeMap::new()),
            GuardMode::Relaxed => {
                let engine = Arc::clone(self);
                let container = Arc::clone(container);
                let _ = tokio::spawn(async move {
                    engine.emit(&container, "destroy", BTreeMap::new());
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use halt_common::error::ErrorKind;

    use super::*;
    use crate::services::MountPoint;
    use crate::storage::LayerHandle;
    use crate::store::MetadataStore;
    use crate::testing::{FAKE_PID, Harness, TaskBehavior};

    #[tokio::test]
    async fn running_container_needs_force() {
        let h = Harness::new();
        let c = h.create("web").await;
        let _task = h.start(&c, FAKE_PID).await;

        let err = h
            .engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            err.to_string(),
            format!(
                "You cannot remove a running container {}. Stop the container before attempting removal or force remove",
                c.id()
            )
        );
        assert!(c.is_running());
    }

    #[tokio::test]
    async fn paused_container_is_told_to_unpause() {
        let h = Harness::new();
        let c = h.create("web").await;
        let _task = h.start(&c, FAKE_PID).await;
        h.set_status(&c, ContainerState::Paused).await;

        let err = h
            .engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .unwrap_err();
        assert!(
            err.to_string().ends_with(
                "Unpause and then stop the container before attempting removal or force remove"
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn full_cleanup_releases_everything() {
        let h = Harness::new();
        let c = h
            .create_with("web", |spec| {
                spec.process_label = "system_u:system_r:container_t:s0:c1,c2".into();
                spec.mount_points.push(MountPoint {
                    destination: "/data".into(),
                    volume: Some("anon1".into()),
                    anonymous: true,
                });
            })
            .await;
        let db = h.create("db").await;
        h.engine.link(&c, &db, "db").await.expect("link");
        let root = c.root().to_path_buf();
        let mut events = h.events.subscribe();

        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("cleanup");

        assert_eq!(c.state().status, ContainerState::Removed);
        assert!(!root.exists());
        assert_eq!(h.layers.released(), vec!["web-rw".to_owned()]);
        assert!(h.leases.deleted().is_empty());
        assert!(h.engine.get_container("web").unwrap_err().is_not_found());
        assert!(h.engine.get_container("/web/db").unwrap_err().is_not_found());
        assert!(!h.engine.labels.is_reserved(c.process_label()));
        assert_eq!(h.store.load_all().expect("load").len(), 1);
        assert_eq!(h.metrics.snapshot().live_containers, 1);
        assert_eq!(events.recv().await.expect("event").action, "destroy");
    }

    #[tokio::test]
    async fn container_is_dead_before_root_is_removed() {
        let h = Harness::new();
        let c = h.create("web").await;
        h.filesystem.track(&c);

        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("cleanup");
        let calls = h.filesystem.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, c.root());
        assert_eq!(calls[0].status, Some(ContainerState::Dead));
        assert!(calls[0].lock_held);
    }

    #[tokio::test]
    async fn snapshot_lease_is_released_when_no_layer_exists() {
        let h = Harness::with_config(|config| config.storage.snapshotter = true);
        let c = h.create_with("web", |spec| spec.rw_layer = None).await;

        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("cleanup");
        assert!(h.layers.released().is_empty());
        assert_eq!(h.leases.deleted(), vec![c.id().to_string()]);
    }

    #[tokio::test]
    async fn layer_wins_over_lease() {
        let h = Harness::with_config(|config| config.storage.snapshotter = true);
        let c = h.create("web").await;

        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("cleanup");
        assert_eq!(h.layers.released().len(), 1);
        assert!(h.leases.deleted().is_empty());
    }

    #[tokio::test]
    async fn layer_failure_is_recorded_and_retry_succeeds() {
        let h = Harness::new();
        let c = h.create("web").await;
        h.layers.fail_next(1);

        let err = h
            .engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains(&format!("container {}", c.id())),
            "{err}"
        );
        assert_eq!(c.state().status, ContainerState::Dead);
        assert!(c.root().exists());
        assert!(h.engine.get_container("web").is_ok());
        let recorded = c.lock().await.removal_error.clone().expect("recorded");
        assert_eq!(recorded, err.to_string());
        let records = h.store.load_all().expect("load");
        assert_eq!(records[0].removal_error, Some(recorded));

        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("retry");
        assert_eq!(c.state().status, ContainerState::Removed);
        assert!(c.lock().await.removal_error.is_none());
        assert_eq!(h.layers.released(), vec!["web-rw".to_owned()]);
    }

    #[tokio::test]
    async fn root_removal_failure_is_fatal() {
        let h = Harness::new();
        let c = h.create("web").await;
        h.filesystem.fail(true);

        let err = h
            .engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .unwrap_err();
        assert!(
            err.to_string().starts_with("unable to remove filesystem for"),
            "{err}"
        );
        assert!(h.engine.is_registered(c.id()));
        assert!(c.lock().await.rw_layer.is_none());

        h.filesystem.fail(false);
        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("retry");
        assert_eq!(h.layers.released().len(), 1);
    }

    #[tokio::test]
    async fn forced_cleanup_kills_first() {
        let h = Harness::new();
        let c = h.create("web").await;
        let task = h.start(&c, FAKE_PID).await;

        let opts = RemoveOptions {
            force: true,
            ..RemoveOptions::default()
        };
        h.engine.cleanup_container(&c, &opts).await.expect("cleanup");
        assert_eq!(task.signals(), vec![halt_core::signal::Signal::SIGKILL]);
        assert_eq!(c.state().status, ContainerState::Removed);
    }

    #[tokio::test]
    async fn unkillable_container_is_not_removed() {
        let h = Harness::new();
        let c = h.create("web").await;
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let _task = h.start_with(&c, child.id(), TaskBehavior::Ignore).await;

        let opts = RemoveOptions {
            force: true,
            ..RemoveOptions::default()
        };
        let err = h.engine.cleanup_container(&c, &opts).await.unwrap_err();
        assert!(
            err.to_string().starts_with("Could not kill running container"),
            "{err}"
        );
        assert!(h.engine.is_registered(c.id()));
        assert!(c.root().exists());
        let _ = child.wait().expect("reap");
    }

    #[tokio::test]
    async fn removed_container_is_left_alone() {
        let h = Harness::new();
        let c = h.create("web").await;
        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("cleanup");
        let mut events = h.events.subscribe();

        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("second cleanup");
        assert!(events.try_recv().is_err());
        assert_eq!(h.layers.released().len(), 1);
        assert_eq!(h.metrics.snapshot().live_containers, 0);
    }

    #[tokio::test]
    async fn volumes_are_removed_only_when_asked() {
        let h = Harness::new();
        let mount = MountPoint {
            destination: "/data".into(),
            volume: Some("anon1".into()),
            anonymous: true,
        };
        let volume_dir = h.engine.config().volumes_dir().join("anon1");
        std::fs::create_dir_all(&volume_dir).expect("volume");
        let keep = h
            .create_with("keep", |spec| spec.mount_points.push(mount.clone()))
            .await;
        h.engine
            .cleanup_container(&keep, &RemoveOptions::default())
            .await
            .expect("cleanup");
        assert!(volume_dir.exists());

        let purge = h
            .create_with("purge", |spec| spec.mount_points.push(mount.clone()))
            .await;
        let opts = RemoveOptions {
            remove_volumes: true,
            ..RemoveOptions::default()
        };
        h.engine.cleanup_container(&purge, &opts).await.expect("cleanup");
        assert!(!volume_dir.exists());
    }

    #[tokio::test]
    async fn layer_is_not_released_twice_after_success() {
        let h = Harness::new();
        let layer = LayerHandle {
            id: "custom".into(),
        };
        let c = h.create_with("web", |spec| spec.rw_layer = Some(layer)).await;
        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("cleanup");
        assert!(c.lock().await.rw_layer.is_none());
        assert_eq!(h.layers.released(), vec!["custom".to_owned()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_cleanup_leaves_removed_container_alone() {
        let h = Harness::new();
        let c = h.create("web").await;
        let mut events = h.events.subscribe();
        h.stats.hold_next();

        let engine = Arc::clone(&h.engine);
        let late = Arc::clone(&c);
        let parked = tokio::spawn(async move {
            engine
                .cleanup_container(&late, &RemoveOptions::default())
                .await
        });
        let stats = Arc::clone(&h.stats);
        tokio::task::spawn_blocking(move || stats.wait_parked())
            .await
            .expect("parked");

        h.engine
            .cleanup_container(&c, &RemoveOptions::default())
            .await
            .expect("first cleanup");
        assert_eq!(c.state().status, ContainerState::Removed);

        h.stats.release();
        parked.await.expect("join").expect("second cleanup");

        assert_eq!(c.state().status, ContainerState::Removed);
        assert_eq!(h.metrics.snapshot().live_containers, 0);
        assert_eq!(h.layers.released().len(), 1);
        let destroys = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| e.action == "destroy")
            .count();
        assert_eq!(destroys, 1);
    }

    #[tokio::test]
    async fn dying_checkpoint_failure_does_not_abort_cleanup() {
        let failures = [
            HaltError::container_not_found("web-0123456789ab"),
            HaltError::system_msg("no space left on device"),
        ];
        for failure in failures {
            let h = Harness::new();
            let c = h.create("web").await;
            h.store.fail_next_checkpoint(failure);

            h.engine
                .cleanup_container(&c, &RemoveOptions::default())
                .await
                .expect("cleanup");
            assert_eq!(c.state().status, ContainerState::Removed);
            assert!(!c.root().exists());
            assert!(h.store.load_all().expect("load").is_empty());
            assert_eq!(h.layers.released(), vec!["web-rw".to_owned()]);
        }
    }

    #[tokio::test]
    async fn removing_linked_child_rewrites_parent_record() {
        let h = Harness::new();
        let web = h.create("web").await;
        let db = h.create("db").await;
        h.engine.link(&web, &db, "db").await.expect("link");

        h.engine
            .cleanup_container(&db, &RemoveOptions::default())
            .await
            .expect("cleanup");

        let records = h.store.load_all().expect("load");
        assert_eq!(records.len(), 1);
        assert!(records[0].links.is_empty());
        assert!(h.engine.links.children(web.id()).is_empty());
    }
}
