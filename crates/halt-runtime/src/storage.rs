//! Storage collaborators released during removal.
//!
//! A container holds either a writable layer or, when the storage backend
//! is snapshot based and no layer was allocated, a snapshot lease keyed by
//! the container id. Exactly one of the two is released.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use halt_common::error::{HaltError, Result};
use serde::{Deserialize, Serialize};

/// Reference to a container's writable layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerHandle {
    /// Layer identifier within the layer service.
    pub id: String,
}

/// Releases writable layers.
#[async_trait]
pub trait LayerService: Send + Sync + fmt::Debug {
    /// Releases `layer`. An already released layer is success.
    async fn release_layer(&self, layer: &LayerHandle) -> Result<()>;
}

/// Deletes snapshot leases.
#[async_trait]
pub trait LeaseService: Send + Sync + fmt::Debug {
    /// Deletes `lease`; with `synchronous` the referenced snapshots are
    /// collected before returning.
    async fn delete(&self, lease: &str, synchronous: bool) -> Result<()>;
}

/// Removes filesystem trees.
pub trait Filesystem: Send + Sync + fmt::Debug {
    /// Removes `path` recursively; absence is success.
    ///
    /// # Errors
    ///
    /// Returns an error if anything below `path` cannot be removed.
    fn ensure_remove_all(&self, path: &Path) -> Result<()>;
}

/// Host filesystem with busy-mount recovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFilesystem;

impl Filesystem for HostFilesystem {
    fn ensure_remove_all(&self, path: &Path) -> Result<()> {
        halt_core::filesystem::ensure_remove_all(path)
    }
}

/// Writable layers stored as directories below a root.
#[derive(Debug, Clone)]
pub struct DirLayerStore {
    root: PathBuf,
}

impl DirLayerStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Allocates the writable layer `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer directory cannot be created.
    pub fn create_layer(&self, id: &str) -> Result<LayerHandle> {
        let path = self.root.join(id);
        std::fs::create_dir_all(&path).map_err(|e| HaltError::Io { path, source: e })?;
        Ok(LayerHandle { id: id.to_owned() })
    }

    /// Directory backing `layer`.
    #[must_use]
    pub fn path_of(&self, layer: &LayerHandle) -> PathBuf {
        self.root.join(&layer.id)
    }
}

#[async_trait]
impl LayerService for DirLayerStore {
    async fn release_layer(&self, layer: &LayerHandle) -> Result<()> {
        let path = self.path_of(layer);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                tracing::debug!(layer = %layer.id, "writable layer released");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HaltError::Io { path, source: e }),
        }
    }
}

/// Snapshot leases stored as marker files below a root.
#[derive(Debug, Clone)]
pub struct FileLeaseStore {
    root: PathBuf,
}

impl FileLeaseStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Records the lease `lease`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker file cannot be written.
    pub fn acquire(&self, lease: &str) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| HaltError::Io {
            path: self.root.clone(),
            source: e,
        })?;
        let path = self.path_of(lease);
        std::fs::write(&path, lease).map_err(|e| HaltError::Io { path, source: e })
    }

    /// Returns `true` while `lease` is held.
    #[must_use]
    pub fn holds(&self, lease: &str) -> bool {
        self.path_of(lease).exists()
    }

    fn path_of(&self, lease: &str) -> PathBuf {
        self.root.join(format!("{lease}.lease"))
    }
}

#[async_trait]
impl LeaseService for FileLeaseStore {
    async fn delete(&self, lease: &str, synchronous: bool) -> Result<()> {
        let path = self.path_of(lease);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(lease, synchronous, "snapshot lease deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HaltError::Io { path, source: e }),
        }
    }
}
