//! Registry of MAC process labels reserved by containers.
//!
//! A label is reserved when a container is created with one and must be
//! released when the container is removed, so that the level can be
//! handed out again.

use std::collections::HashSet;
use std::sync::Mutex;

/// Set of labels currently reserved on this host.
#[derive(Debug, Default)]
pub struct LabelRegistry {
    reserved: Mutex<HashSet<String>>,
}

impl LabelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `label`. Returns `false` if it was already reserved.
    ///
    /// An empty label means "unconfined" and is never recorded.
    pub fn reserve(&self, label: &str) -> bool {
        if label.is_empty() {
            return true;
        }
        self.lock().insert(label.to_owned())
    }

    /// Releases `label`. Releasing an unknown or empty label is a no-op.
    pub fn release(&self, label: &str) {
        if label.is_empty() {
            return;
        }
        if self.lock().remove(label) {
            tracing::debug!(label, "process label released");
        }
    }

    /// Returns `true` while `label` is reserved.
    #[must_use]
    pub fn is_reserved(&self, label: &str) -> bool {
        self.lock().contains(label)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A poisoned set is still a consistent set of strings.
        self.reserved
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
