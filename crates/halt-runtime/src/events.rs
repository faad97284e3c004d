//! Container lifecycle events.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use halt_common::types::ContainerId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A single lifecycle event such as `kill`, `stop`, `die` or `destroy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Container the event concerns.
    pub id: ContainerId,
    /// Container name at the time of the event.
    pub name: String,
    /// Action name.
    pub action: String,
    /// Action-specific attributes.
    pub attributes: BTreeMap<String, String>,
    /// When the event happened.
    pub time: DateTime<Utc>,
}

/// Sink for lifecycle events.
pub trait EventLog: Send + Sync + fmt::Debug {
    /// Records `event`.
    fn log(&self, event: Event);
}

/// Event log that fans events out to live subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEventLog {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventLog {
    /// Creates a log buffering up to `capacity` events per slow subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to events logged from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventLog {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventLog for BroadcastEventLog {
    fn log(&self, event: Event) {
        tracing::info!(
            id = %event.id,
            name = %event.name,
            action = %event.action,
            "container event"
        );
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
