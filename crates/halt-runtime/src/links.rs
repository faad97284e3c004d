//! Parent/child link index.
//!
//! A link `/<parent>/<alias>` lets `parent` reach `child` by alias. The
//! index is kept in both directions so that removing either end finds
//! every link it takes part in.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use halt_common::types::ContainerId;

#[derive(Debug, Default)]
struct Tables {
    // parent -> link name -> child
    children: HashMap<ContainerId, BTreeMap<String, ContainerId>>,
    // child -> link name -> parent
    parents: HashMap<ContainerId, BTreeMap<String, ContainerId>>,
}

/// Bidirectional link index.
#[derive(Debug, Default)]
pub struct LinkIndex {
    tables: RwLock<Tables>,
}

impl LinkIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `parent` reaches `child` through link `name`.
    pub fn link(&self, parent: &ContainerId, child: &ContainerId, name: &str) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let _ = tables
            .children
            .entry(parent.clone())
            .or_default()
            .insert(name.to_owned(), child.clone());
        let _ = tables
            .parents
            .entry(child.clone())
            .or_default()
            .insert(name.to_owned(), parent.clone());
    }

    /// Removes the single link `name` between `parent` and `child`.
    pub fn unlink(&self, name: &str, child: &ContainerId, parent: &ContainerId) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        remove_entry(&mut tables.children, parent, name);
        remove_entry(&mut tables.parents, child, name);
    }

    /// Removes every link where `id` is parent or child and returns the
    /// freed link names, sorted.
    pub fn delete(&self, id: &ContainerId) -> Vec<String> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let mut freed = Vec::new();

        if let Some(children) = tables.children.remove(id) {
            for (name, child) in children {
                remove_entry(&mut tables.parents, &child, &name);
                freed.push(name);
            }
        }
        if let Some(parents) = tables.parents.remove(id) {
            for (name, parent) in parents {
                remove_entry(&mut tables.children, &parent, &name);
                freed.push(name);
            }
        }
        freed.sort();
        freed.dedup();
        freed
    }

    /// Links where `parent` is the parent, as (name, child) pairs.
    #[must_use]
    pub fn children(&self, parent: &ContainerId) -> Vec<(String, ContainerId)> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .children
            .get(parent)
            .map(|links| links.iter().map(|(n, c)| (n.clone(), c.clone())).collect())
            .unwrap_or_default()
    }

    /// Links where `child` is the child, as (name, parent) pairs.
    #[must_use]
    pub fn parents(&self, child: &ContainerId) -> Vec<(String, ContainerId)> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .parents
            .get(child)
            .map(|links| links.iter().map(|(n, p)| (n.clone(), p.clone())).collect())
            .unwrap_or_default()
    }
}

fn remove_entry(
    table: &mut HashMap<ContainerId, BTreeMap<String, ContainerId>>,
    key: &ContainerId,
    name: &str,
) {
    if let Some(links) = table.get_mut(key) {
        let _ = links.remove(name);
        if links.is_empty() {
            let _ = table.remove(key);
        }
    }
}
