//! Name reservations.
//!
//! Every container name and every link name (`/<parent>/<alias>`) maps to
//! exactly one container id. Names are stored with a leading `/`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use halt_common::error::{HaltError, Result};
use halt_common::types::ContainerId;

/// Normalizes `name` to its `/`-prefixed form.
#[must_use]
pub fn normalize(name: &str) -> String {
    if name.starts_with('/') {
        name.to_owned()
    } else {
        format!("/{name}")
    }
}

/// Reserved names.
#[derive(Debug, Default)]
pub struct NameRegistrar {
    names: RwLock<HashMap<String, ContainerId>>,
}

impl NameRegistrar {
    /// Creates an empty registrar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name` for `id`. Reserving a name already held by `id` is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns a conflict when another container holds the name.
    pub fn reserve(&self, name: &str, id: &ContainerId) -> Result<()> {
        let name = normalize(name);
        let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
        match names.get(&name) {
            Some(holder) if holder != id => Err(HaltError::conflict(format!(
                "the container name \"{name}\" is already in use by container \"{holder}\""
            ))),
            Some(_) => Ok(()),
            None => {
                let _ = names.insert(name, id.clone());
                Ok(())
            }
        }
    }

    /// Releases `name`. Returns `false` when it was not reserved.
    pub fn release(&self, name: &str) -> bool {
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&normalize(name))
            .is_some()
    }

    /// Container holding `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ContainerId> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize(name))
            .cloned()
    }

    /// Every name reserved for `id`, sorted.
    #[must_use]
    pub fn names_for(&self, id: &ContainerId) -> Vec<String> {
        let mut held: Vec<String> = self
            .names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, holder)| *holder == id)
            .map(|(name, _)| name.clone())
            .collect();
        held.sort();
        held
    }
}
