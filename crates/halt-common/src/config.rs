//! Global configuration model for the halt runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HaltError, Result};

/// Root configuration for the termination subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HaltConfig {
    /// Base directory for halt state and data.
    pub data_dir: PathBuf,
    /// Removal orchestrator settings.
    pub removal: RemovalConfig,
    /// Graceful stop defaults.
    pub stop: StopConfig,
    /// Forced kill timing.
    pub kill: KillConfig,
    /// Storage backend settings.
    pub storage: StorageConfig,
    /// Liveness probe implementation.
    pub probe: ProbeKind,
    /// Exit monitor settings.
    pub monitor: MonitorConfig,
}

impl Default for HaltConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(constants::SYSTEM_DATA_DIR),
            removal: RemovalConfig::default(),
            stop: StopConfig::default(),
            kill: KillConfig::default(),
            storage: StorageConfig::default(),
            probe: ProbeKind::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl HaltConfig {
    /// Returns the default configuration rooted at `data_dir`.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration file, filling unspecified fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON,
    /// or fails [`HaltConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| HaltError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`HaltError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.stop.default_signal.trim().is_empty() {
            return Err(HaltError::Config {
                message: "stop.default_signal must not be empty".into(),
            });
        }
        if self.monitor.interval_ms == 0 {
            return Err(HaltError::Config {
                message: "monitor.interval_ms must be greater than zero".into(),
            });
        }
        if self.kill.wait_ms == 0 {
            return Err(HaltError::Config {
                message: "kill.wait_ms must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Directory holding one metadata record per container.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join(constants::CONTAINERS_DIR)
    }

    /// Directory holding writable layers.
    #[must_use]
    pub fn layers_dir(&self) -> PathBuf {
        self.data_dir.join(constants::LAYERS_DIR)
    }

    /// Directory holding snapshot leases.
    #[must_use]
    pub fn leases_dir(&self) -> PathBuf {
        self.data_dir.join(constants::LEASES_DIR)
    }

    /// Directory holding volumes.
    #[must_use]
    pub fn volumes_dir(&self) -> PathBuf {
        self.data_dir.join(constants::VOLUMES_DIR)
    }
}

/// How the removal orchestrator guards against concurrent removals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardMode {
    /// One removal per container; a second concurrent request conflicts.
    #[default]
    Strict,
    /// No in-progress guard, unknown names succeed silently, and the
    /// destroy event is logged asynchronously.
    Relaxed,
}

/// Removal orchestrator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalConfig {
    /// Guard mode applied to every removal.
    pub guard: GuardMode,
}

/// Graceful stop defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Signal used when the container configures none.
    pub default_signal: String,
    /// Seconds to wait when the container configures no timeout.
    pub default_timeout_secs: i64,
    /// Extra grace after a failed escalation to kill.
    pub kill_grace_ms: u64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            default_signal: constants::DEFAULT_STOP_SIGNAL.into(),
            default_timeout_secs: constants::DEFAULT_STOP_TIMEOUT_SECS,
            kill_grace_ms: constants::STOP_KILL_GRACE_MS,
        }
    }
}

/// Forced kill timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KillConfig {
    /// Wait for an exit event after SIGKILL through the task.
    pub wait_ms: u64,
    /// Wait after the direct last-resort signal.
    pub direct_wait_ms: u64,
}

impl Default for KillConfig {
    fn default() -> Self {
        Self {
            wait_ms: constants::KILL_WAIT_MS,
            direct_wait_ms: constants::DIRECT_KILL_WAIT_MS,
        }
    }
}

/// Storage backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Containers without a writable layer hold a snapshot lease instead.
    pub snapshotter: bool,
}

/// Liveness probe implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Null-signal delivery (`kill(pid, 0)`).
    #[default]
    Signal,
    /// Enumeration of the process table under `/proc`.
    Procfs,
}

/// Exit monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Milliseconds between liveness polls.
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: constants::MONITOR_INTERVAL_MS,
        }
    }
}
