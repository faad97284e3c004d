//! Core container struct and its synchronization primitives.
//!
//! Mutable bookkeeping lives in [`ContainerInner`] behind an async mutex
//! that termination paths hold across task calls. The observable
//! [`StateSnapshot`] is published on a watch channel; it is only changed
//! while that mutex is held, so a waiter that observes "not running" sees
//! a state every lock holder agreed on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use halt_common::error::Result;
use halt_common::types::{ContainerId, ContainerState};
use halt_core::signal::{Signal, parse_signal};
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::services::MountPoint;
use crate::state::{StateSnapshot, WaitLimit, WaitOutcome};
use crate::storage::LayerHandle;
use crate::store::{ContainerRecord, LinkRecord};
use crate::task::RuntimeTask;

/// Everything needed to register a container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique identifier.
    pub id: ContainerId,
    /// Human-readable name, with or without the leading `/`.
    pub name: String,
    /// Root directory holding the container's files.
    pub root: PathBuf,
    /// MAC label of the container's process; empty when unconfined.
    pub process_label: String,
    /// Signal used for graceful stops.
    pub stop_signal: Option<String>,
    /// Seconds a graceful stop waits before killing.
    pub stop_timeout: Option<i64>,
    /// Writable layer, when one was allocated.
    pub rw_layer: Option<LayerHandle>,
    /// Volumes mounted into the container.
    pub mount_points: Vec<MountPoint>,
}

impl ContainerSpec {
    /// Creates a spec with no layer, label, volumes or stop overrides.
    #[must_use]
    pub fn new(id: ContainerId, name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            root: root.into(),
            process_label: String::new(),
            stop_signal: None,
            stop_timeout: None,
            rw_layer: None,
            mount_points: Vec::new(),
        }
    }
}

/// Mutable container fields guarded by the container lock.
#[derive(Debug, Default)]
pub struct ContainerInner {
    /// Live task while the container runs.
    pub task: Option<Arc<dyn RuntimeTask>>,
    /// Writable layer, cleared once released.
    pub rw_layer: Option<LayerHandle>,
    /// Volumes mounted into the container.
    pub mount_points: Vec<MountPoint>,
    /// The next exit must not trigger a restart.
    pub exit_on_next: bool,
    /// A user stopped or killed the container.
    pub manually_stopped: bool,
    /// First fatal error of the last failed removal.
    pub removal_error: Option<String>,
    /// When the last run ended.
    pub finished_at: Option<DateTime<Utc>>,
}

/// A managed container instance.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    name: String,
    root: PathBuf,
    process_label: String,
    stop_signal: Option<Signal>,
    stop_timeout: Option<i64>,
    created_at: DateTime<Utc>,
    inner: Mutex<ContainerInner>,
    removal_in_progress: AtomicBool,
    state: watch::Sender<StateSnapshot>,
}

impl Container {
    /// Creates a container in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns an invalid-parameter error if the stop signal cannot be parsed.
    pub fn new(spec: ContainerSpec) -> Result<Self> {
        Self::build(
            spec,
            Utc::now(),
            StateSnapshot::created(),
            ContainerInner::default(),
        )
    }

    /// Rebuilds a container from its persisted record, without a task.
    ///
    /// # Errors
    ///
    /// Returns an invalid-parameter error if the recorded stop signal
    /// cannot be parsed.
    pub fn from_record(record: ContainerRecord) -> Result<Self> {
        let inner = ContainerInner {
            task: None,
            rw_layer: record.rw_layer.clone(),
            mount_points: record.mount_points.clone(),
            exit_on_next: false,
            manually_stopped: record.manually_stopped,
            removal_error: record.removal_error.clone(),
            finished_at: record.finished_at,
        };
        let snapshot = StateSnapshot {
            status: record.state,
            pid: record.pid,
            exit_code: record.exit_code,
        };
        let spec = ContainerSpec {
            id: record.id,
            name: record.name,
            root: record.root,
            process_label: record.process_label,
            stop_signal: record.stop_signal,
            stop_timeout: record.stop_timeout,
            rw_layer: record.rw_layer,
            mount_points: record.mount_points,
        };
        Self::build(spec, record.created_at, snapshot, inner)
    }

    fn build(
        spec: ContainerSpec,
        created_at: DateTime<Utc>,
        snapshot: StateSnapshot,
        mut inner: ContainerInner,
    ) -> Result<Self> {
        let stop_signal = spec.stop_signal.as_deref().map(parse_signal).transpose()?;
        if inner.rw_layer.is_none() {
            inner.rw_layer = spec.rw_layer;
        }
        if inner.mount_points.is_empty() {
            inner.mount_points = spec.mount_points;
        }
        let (state, _) = watch::channel(snapshot);
        Ok(Self {
            id: spec.id,
            name: spec.name.trim_start_matches('/').to_owned(),
            root: spec.root,
            process_label: spec.process_label,
            stop_signal,
            stop_timeout: spec.stop_timeout,
            created_at,
            inner: Mutex::new(inner),
            removal_in_progress: AtomicBool::new(false),
            state,
        })
    }

    /// Unique identifier.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Name without the leading `/`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// MAC label of the container's process.
    #[must_use]
    pub fn process_label(&self) -> &str {
        &self.process_label
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Stop signal set on the container itself, if any.
    #[must_use]
    pub const fn configured_stop_signal(&self) -> Option<Signal> {
        self.stop_signal
    }

    /// Effective stop signal.
    #[must_use]
    pub fn stop_signal(&self, default: Signal) -> Signal {
        self.stop_signal.unwrap_or(default)
    }

    /// Effective stop timeout in seconds.
    #[must_use]
    pub fn stop_timeout(&self, default: i64) -> i64 {
        self.stop_timeout.unwrap_or(default)
    }

    /// Acquires the container lock.
    pub async fn lock(&self) -> MutexGuard<'_, ContainerInner> {
        self.inner.lock().await
    }

    /// Acquires the container lock if it is free.
    #[cfg(test)]
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, ContainerInner>> {
        self.inner.try_lock().ok()
    }

    /// Current observable state.
    #[must_use]
    pub fn state(&self) -> StateSnapshot {
        self.state.borrow().clone()
    }

    /// Returns `true` while running, paused or restarting.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.borrow().is_running()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.state.subscribe()
    }

    /// Changes the observable state. `_locked` proves the caller holds
    /// this container's lock.
    pub fn update_state(&self, _locked: &mut ContainerInner, f: impl FnOnce(&mut StateSnapshot)) {
        self.state.send_modify(f);
    }

    /// Transitions to `Running` with `task` as the live task.
    pub fn mark_running(&self, locked: &mut ContainerInner, task: Arc<dyn RuntimeTask>) {
        let pid = task.pid();
        locked.task = Some(task);
        locked.exit_on_next = false;
        self.update_state(locked, |s| {
            s.status = ContainerState::Running;
            s.pid = pid;
            s.exit_code = None;
        });
    }

    /// Claims the removal-in-progress flag.
    ///
    /// Returns `None` if another removal holds it. The flag is released
    /// when the guard drops.
    #[must_use]
    pub fn try_begin_removal(&self) -> Option<RemovalGuard<'_>> {
        self.removal_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RemovalGuard {
                flag: &self.removal_in_progress,
            })
    }

    /// Returns `true` while a guarded removal runs.
    #[must_use]
    pub fn removal_in_progress(&self) -> bool {
        self.removal_in_progress.load(Ordering::Acquire)
    }

    /// Waits until the container is observed not running.
    ///
    /// Returns immediately when it already is.
    pub async fn wait_not_running(&self, limit: WaitLimit) -> WaitOutcome {
        let mut rx = self.state.subscribe();
        let exited = async move {
            // The sender lives as long as `self`.
            let _ = rx.wait_for(|s| !s.is_running()).await;
        };
        match limit {
            WaitLimit::Deadline(deadline) => match tokio::time::timeout(deadline, exited).await {
                Ok(()) => WaitOutcome::Exited,
                Err(_) => WaitOutcome::TimedOut,
            },
            WaitLimit::Cancellable(token) => tokio::select! {
                () = exited => WaitOutcome::Exited,
                () = token.cancelled() => WaitOutcome::Cancelled,
            },
        }
    }

    /// Builds the persisted form of this container.
    #[must_use]
    pub fn to_record(&self, locked: &ContainerInner, links: Vec<LinkRecord>) -> ContainerRecord {
        let state = self.state();
        ContainerRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            root: self.root.clone(),
            process_label: self.process_label.clone(),
            stop_signal: self.stop_signal.map(|s| s.as_str().to_owned()),
            stop_timeout: self.stop_timeout,
            state: state.status,
            pid: state.pid,
            exit_code: state.exit_code,
            finished_at: locked.finished_at,
            manually_stopped: locked.manually_stopped,
            rw_layer: locked.rw_layer.clone(),
            mount_points: locked.mount_points.clone(),
            links,
            removal_error: locked.removal_error.clone(),
            created_at: self.created_at,
        }
    }
}

/// Holds a container's removal-in-progress flag.
#[derive(Debug)]
pub struct RemovalGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RemovalGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
