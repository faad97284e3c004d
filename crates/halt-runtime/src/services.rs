//! Best-effort collaborators touched during teardown.
//!
//! Failures from these never abort a removal; callers log and continue.

use std::fmt;
use std::path::PathBuf;

use halt_common::error::{HaltError, Result};
use halt_common::types::ContainerId;
use serde::{Deserialize, Serialize};

/// Stops resource statistics collection.
pub trait StatsCollector: Send + Sync + fmt::Debug {
    /// Stops collecting for `id`, whether or not collection is active.
    fn stop_collection(&self, id: &ContainerId);
}

/// Statistics collector that collects nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsCollector for NoopStats {
    fn stop_collection(&self, id: &ContainerId) {
        tracing::trace!(%id, "stats collection stopped");
    }
}

/// A volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Path inside the container.
    pub destination: PathBuf,
    /// Volume name; `None` for plain bind mounts.
    #[serde(default)]
    pub volume: Option<String>,
    /// Whether the volume was created implicitly for this container.
    #[serde(default)]
    pub anonymous: bool,
}

/// Releases volumes when their container goes away.
pub trait VolumeService: Send + Sync + fmt::Debug {
    /// Dereferences every volume in `mounts`; with `remove_volumes`,
    /// anonymous volumes are deleted as well.
    ///
    /// # Errors
    ///
    /// Returns an error naming every volume that could not be released.
    fn remove_mount_points(
        &self,
        id: &ContainerId,
        mounts: &[MountPoint],
        remove_volumes: bool,
    ) -> Result<()>;
}

/// Volumes stored as directories below a root.
#[derive(Debug, Clone)]
pub struct LocalVolumes {
    root: PathBuf,
}

impl LocalVolumes {
    /// Creates a volume service rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl VolumeService for LocalVolumes {
    fn remove_mount_points(
        &self,
        id: &ContainerId,
        mounts: &[MountPoint],
        remove_volumes: bool,
    ) -> Result<()> {
        let mut failed = Vec::new();
        for mount in mounts {
            let Some(volume) = &mount.volume else {
                continue;
            };
            if !(remove_volumes && mount.anonymous) {
                tracing::debug!(%id, volume = %volume, "volume dereferenced");
                continue;
            }
            let path = self.root.join(volume);
            if let Err(e) = halt_core::filesystem::ensure_remove_all(&path) {
                failed.push(format!("{volume}: {e}"));
            } else {
                tracing::debug!(%id, volume = %volume, "anonymous volume removed");
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(HaltError::system_msg(format!(
                "error removing volumes of container {id}: {}",
                failed.join(", ")
            )))
        }
    }
}

/// Refreshes a container's network view after its links change.
pub trait NetworkUpdater: Send + Sync + fmt::Debug {
    /// Rewrites the link-derived network configuration of `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update cannot be applied.
    fn update_network(&self, parent: &ContainerId) -> Result<()>;
}

/// Network updater for hosts where links carry no network state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNetwork;

impl NetworkUpdater for NoopNetwork {
    fn update_network(&self, parent: &ContainerId) -> Result<()> {
        tracing::debug!(%parent, "network links refreshed");
        Ok(())
    }
}
