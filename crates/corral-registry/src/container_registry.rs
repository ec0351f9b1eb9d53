//! ---
//! corral_section: "03-registry-state"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Registry-owned mutable state and immutable snapshots."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use corral_common::ContainerId;
use parking_lot::RwLock;
use tracing::debug;

use crate::container::{Container, ContainerState};
use crate::error::{RegistryError, Result};
use crate::locks::{ReadGuard, TimedRwLock, WriteGuard};

const CONTAINER_LOCK: &str = "container";

/// Owner of the tree of mutable [`ContainerState`] nodes.
///
/// Each container is backed by its own timed read/write lock; the registry
/// map itself is guarded by a separate lock held only for lookups and
/// structural changes, never across a state mutation.
#[derive(Debug)]
pub struct ContainerRegistry {
    containers: RwLock<HashMap<ContainerId, Arc<TimedRwLock<ContainerState>>>>,
    lock_timeout: Duration,
}

impl ContainerRegistry {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Register a new container, linking it under `parent` when given.
    ///
    /// Fails with [`RegistryError::ContainerExists`] when the identity is
    /// taken and [`RegistryError::ContainerNotRegistered`] when the parent is
    /// unknown.
    pub fn add(&self, parent: Option<&ContainerId>, state: ContainerState) -> Result<()> {
        let id = state.id().clone();
        let mut containers = self.containers.write();
        if containers.contains_key(&id) {
            return Err(RegistryError::ContainerExists(id));
        }
        if let Some(parent_id) = parent {
            let parent_entry = containers
                .get(parent_id)
                .cloned()
                .ok_or_else(|| RegistryError::ContainerNotRegistered(parent_id.clone()))?;
            let mut parent_state = parent_entry
                .write(self.lock_timeout)
                .ok_or_else(|| lock_timeout(parent_id))?;
            parent_state.add_child(id.clone())?;
        }
        containers.insert(id.clone(), Arc::new(TimedRwLock::new(state)));
        debug!(container = %id, parent = parent.map(|p| p.as_str()).unwrap_or(""), "container registered");
        Ok(())
    }

    /// Remove a container, unlinking it from `parent` when given.
    ///
    /// The caller supplies the parent identity because it typically still
    /// holds the container's own write guard, which must not be re-acquired
    /// here.
    pub fn remove(&self, id: &ContainerId, parent: Option<&ContainerId>) -> Result<()> {
        let mut containers = self.containers.write();
        if containers.remove(id).is_none() {
            return Err(RegistryError::ContainerNotRegistered(id.clone()));
        }
        if let Some(parent_id) = parent {
            if let Some(parent_entry) = containers.get(parent_id).cloned() {
                let mut parent_state = parent_entry
                    .write(self.lock_timeout)
                    .ok_or_else(|| lock_timeout(parent_id))?;
                parent_state.remove_child(id);
            }
        }
        debug!(container = %id, "container removed");
        Ok(())
    }

    /// Whether a container is registered.
    pub fn contains(&self, id: &ContainerId) -> bool {
        self.containers.read().contains_key(id)
    }

    /// All registered container identities.
    pub fn identities(&self) -> Vec<ContainerId> {
        let mut ids: Vec<ContainerId> = self.containers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn entry(&self, id: &ContainerId) -> Result<Arc<TimedRwLock<ContainerState>>> {
        self.containers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::ContainerNotRegistered(id.clone()))
    }

    /// Acquire the container's shared lock within the configured timeout.
    pub fn read_lock(&self, id: &ContainerId) -> Result<ReadGuard<ContainerState>> {
        let entry = self.entry(id)?;
        entry.read(self.lock_timeout).ok_or_else(|| lock_timeout(id))
    }

    /// Acquire the container's exclusive lock within the configured timeout.
    pub fn write_lock(&self, id: &ContainerId) -> Result<WriteGuard<ContainerState>> {
        let entry = self.entry(id)?;
        entry.write(self.lock_timeout).ok_or_else(|| lock_timeout(id))
    }

    /// Snapshot a single container, failing when it is not registered.
    pub fn snapshot(&self, id: &ContainerId) -> Result<Container> {
        Ok(self.read_lock(id)?.snapshot())
    }

    /// Snapshot a single container, `None` when it is not registered.
    pub fn get(&self, id: &ContainerId) -> Result<Option<Container>> {
        match self.snapshot(id) {
            Ok(container) => Ok(Some(container)),
            Err(RegistryError::ContainerNotRegistered(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Snapshot all containers, or the subset matching `filter`.
    ///
    /// Requested identities that are not registered are silently absent from
    /// the result; the caller decides whether that is an error.
    pub fn get_all(&self, filter: Option<&BTreeSet<ContainerId>>) -> Result<Vec<Container>> {
        let entries: Vec<(ContainerId, Arc<TimedRwLock<ContainerState>>)> = {
            let containers = self.containers.read();
            containers
                .iter()
                .filter(|(id, _)| filter.map_or(true, |wanted| wanted.contains(*id)))
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect()
        };
        let mut snapshots = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let state = entry.read(self.lock_timeout).ok_or_else(|| lock_timeout(&id))?;
            snapshots.push(state.snapshot());
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }
}

fn lock_timeout(id: &ContainerId) -> RegistryError {
    RegistryError::LockTimeout {
        kind: CONTAINER_LOCK,
        id: id.to_string(),
    }
}
