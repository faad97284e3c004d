//! Termination metrics.
//!
//! Tracks the number of live containers and per-action latency so that
//! operators can see how long removals, stops and kills take.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timed lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Container removal.
    Delete,
    /// Graceful stop.
    Stop,
    /// Forced kill.
    Kill,
}

/// Receives lifecycle measurements.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// Records that `action` took `elapsed`.
    fn observe_action(&self, action: Action, elapsed: Duration);

    /// A container was added to the registry.
    fn container_registered(&self);

    /// A container finished removal.
    fn container_removed(&self);
}

#[derive(Debug, Default)]
struct ActionTimer {
    count: AtomicU64,
    total_micros: AtomicU64,
}

impl ActionTimer {
    fn observe(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let _ = self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self.total_micros.fetch_add(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ActionStats {
        ActionStats {
            count: self.count.load(Ordering::Relaxed),
            total_micros: self.total_micros.load(Ordering::Relaxed),
        }
    }
}

/// Lock-free in-process metrics.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    live: AtomicI64,
    delete: ActionTimer,
    stop: ActionTimer,
    kill: ActionTimer,
}

impl RuntimeMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a consistent-enough copy of the current values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            live_containers: self.live.load(Ordering::Relaxed),
            delete: self.delete.snapshot(),
            stop: self.stop.snapshot(),
            kill: self.kill.snapshot(),
        }
    }
}

impl MetricsSink for RuntimeMetrics {
    fn observe_action(&self, action: Action, elapsed: Duration) {
        match action {
            Action::Delete => self.delete.observe(elapsed),
            Action::Stop => self.stop.observe(elapsed),
            Action::Kill => self.kill.observe(elapsed),
        }
    }

    fn container_registered(&self) {
        let _ = self.live.fetch_add(1, Ordering::Relaxed);
    }

    fn container_removed(&self) {
        let _ = self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Count and cumulative latency of one action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStats {
    /// Number of observations.
    pub count: u64,
    /// Sum of observed durations in microseconds.
    pub total_micros: u64,
}

/// Point-in-time copy of [`RuntimeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Registered containers not yet removed.
    pub live_containers: i64,
    /// Removal latency.
    pub delete: ActionStats,
    /// Stop latency.
    pub stop: ActionStats,
    /// Kill latency.
    pub kill: ActionStats,
}
