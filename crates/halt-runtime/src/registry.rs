//! In-memory registry of live containers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use halt_common::error::{HaltError, Result};
use halt_common::types::ContainerId;

use crate::container::Container;

/// Containers keyed by id.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    by_id: RwLock<HashMap<ContainerId, Arc<Container>>>,
}

impl ContainerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `container`, replacing any entry with the same id.
    pub fn add(&self, container: Arc<Container>) {
        let _ = self
            .by_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(container.id().clone(), container);
    }

    /// Returns the container registered under `id`.
    #[must_use]
    pub fn get(&self, id: &ContainerId) -> Option<Arc<Container>> {
        self.by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Returns `true` while `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &ContainerId) -> bool {
        self.by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Deregisters `id`. Deleting an absent id is a no-op.
    pub fn delete(&self, id: &ContainerId) -> Option<Arc<Container>> {
        self.by_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Resolves a unique id prefix.
    ///
    /// # Errors
    ///
    /// Returns not-found when nothing matches and invalid-parameter when
    /// the prefix is ambiguous.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Arc<Container>> {
        let map = self.by_id.read().unwrap_or_else(PoisonError::into_inner);
        let mut matches = map
            .iter()
            .filter(|(id, _)| id.as_str().starts_with(prefix))
            .map(|(_, c)| c);
        match (matches.next(), matches.next()) {
            (Some(found), None) if !prefix.is_empty() => Ok(Arc::clone(found)),
            (Some(_), _) => Err(HaltError::invalid_parameter(format!(
                "multiple IDs found with provided prefix: {prefix}"
            ))),
            (None, _) => Err(HaltError::container_not_found(prefix)),
        }
    }

    /// All registered containers, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Container>> {
        let mut all: Vec<_> = self
            .by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        all
    }
}
