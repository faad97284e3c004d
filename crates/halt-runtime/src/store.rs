//! Persisted container metadata.
//!
//! Maintains one JSON record per container so that a restarted `haltctl`
//! sees every container, including dying ones, in its last known state.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use halt_common::error::{HaltError, Result};
use halt_common::types::{ContainerId, ContainerState};
use serde::{Deserialize, Serialize};

use crate::services::MountPoint;
use crate::storage::LayerHandle;

/// A link where the recorded container is the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Full link name, `/<parent>/<alias>`.
    pub name: String,
    /// Container the link points at.
    pub child: ContainerId,
}

/// Persistent record of one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container identifier.
    pub id: ContainerId,
    /// Container name without the leading `/`.
    pub name: String,
    /// Root directory holding the container's files.
    pub root: PathBuf,
    /// MAC label of the container's process.
    #[serde(default)]
    pub process_label: String,
    /// Configured stop signal.
    #[serde(default)]
    pub stop_signal: Option<String>,
    /// Configured stop timeout in seconds.
    #[serde(default)]
    pub stop_timeout: Option<i64>,
    /// Lifecycle state.
    pub state: ContainerState,
    /// OS pid; `0` when not running.
    #[serde(default)]
    pub pid: u32,
    /// Exit code of the last run.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// When the last run ended.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether a user stopped or killed the container.
    #[serde(default)]
    pub manually_stopped: bool,
    /// Writable layer, when one was allocated.
    #[serde(default)]
    pub rw_layer: Option<LayerHandle>,
    /// Volumes mounted into the container.
    #[serde(default)]
    pub mount_points: Vec<MountPoint>,
    /// Links where this container is the parent.
    #[serde(default)]
    pub links: Vec<LinkRecord>,
    /// Last recorded removal failure.
    #[serde(default)]
    pub removal_error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Durable store of container records.
pub trait MetadataStore: Send + Sync + fmt::Debug {
    /// Writes `record`, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn checkpoint(&self, record: &ContainerRecord) -> Result<()>;

    /// Deletes the record for `id`; a missing record is success.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be deleted.
    fn delete(&self, id: &ContainerId) -> Result<()>;

    /// Loads every stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn load_all(&self) -> Result<Vec<ContainerRecord>>;
}

/// One `<id>.json` file per container in a directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    /// Creates a store writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_of(&self, id: &ContainerId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl MetadataStore for JsonStore {
    fn checkpoint(&self, record: &ContainerRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| HaltError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let path = self.path_of(&record.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        std::fs::write(&tmp, json).map_err(|e| HaltError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| HaltError::Io { path, source: e })?;
        tracing::debug!(id = %record.id, state = %record.state, "container checkpointed");
        Ok(())
    }

    fn delete(&self, id: &ContainerId) -> Result<()> {
        let path = self.path_of(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HaltError::Io { path, source: e }),
        }
    }

    fn load_all(&self) -> Result<Vec<ContainerRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HaltError::Io {
                    path: self.dir.clone(),
                    source: e,
                });
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| HaltError::Io {
                    path: self.dir.clone(),
                    source: e,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable container record"
                    );
                }
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

fn read_record(path: &Path) -> Result<ContainerRecord> {
    let raw = std::fs::read(path).map_err(|e| HaltError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_slice(&raw)?)
}
