//! ---
//! corral_section: "03-registry-state"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Registry-owned mutable state and immutable snapshots."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};

use corral_common::{ContainerId, ProfileId, VersionId};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Lifecycle states of a managed container.
///
/// Transitions are monotonic except `Started` ⇄ `Stopped`; `Destroyed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Created,
    Started,
    Stopped,
    Destroyed,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Created => "created",
            Lifecycle::Started => "started",
            Lifecycle::Stopped => "stopped",
            Lifecycle::Destroyed => "destroyed",
        }
    }
}

/// Canonical mutable state of a container, owned by the container registry.
///
/// Only the container service mutates this type, through registry write
/// guards; every other caller receives [`Container`] snapshots.
#[derive(Debug)]
pub struct ContainerState {
    id: ContainerId,
    parent: Option<ContainerId>,
    children: BTreeSet<ContainerId>,
    lifecycle: Lifecycle,
    version: Option<VersionId>,
    profiles: BTreeSet<ProfileId>,
    attributes: BTreeMap<String, String>,
}

impl ContainerState {
    /// Construct a fresh container in the `Created` state.
    pub fn new(
        id: ContainerId,
        parent: Option<ContainerId>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            parent,
            children: BTreeSet::new(),
            lifecycle: Lifecycle::Created,
            version: None,
            profiles: BTreeSet::new(),
            attributes,
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn parent(&self) -> Option<&ContainerId> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &BTreeSet<ContainerId> {
        &self.children
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn version(&self) -> Option<&VersionId> {
        self.version.as_ref()
    }

    pub fn profiles(&self) -> &BTreeSet<ProfileId> {
        &self.profiles
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.lifecycle == Lifecycle::Destroyed {
            return Err(RegistryError::ContainerDestroyed(self.id.clone()));
        }
        Ok(())
    }

    /// Apply a lifecycle transition, enforcing the state machine.
    pub fn transition(&mut self, to: Lifecycle) -> Result<()> {
        self.ensure_live()?;
        let allowed = match (self.lifecycle, to) {
            (Lifecycle::Created, Lifecycle::Started) => true,
            (Lifecycle::Stopped, Lifecycle::Started) => true,
            (Lifecycle::Started, Lifecycle::Stopped) => true,
            (_, Lifecycle::Destroyed) => true,
            _ => false,
        };
        if !allowed {
            return Err(RegistryError::InvalidTransition {
                id: self.id.clone(),
                from: self.lifecycle,
                to,
            });
        }
        if to == Lifecycle::Destroyed && !self.children.is_empty() {
            return Err(RegistryError::HasChildren {
                id: self.id.clone(),
                children: self.children.iter().cloned().collect(),
            });
        }
        self.lifecycle = to;
        Ok(())
    }

    /// Replace the current profile version reference.
    pub fn set_version(&mut self, version: Option<VersionId>) -> Result<()> {
        self.ensure_live()?;
        self.version = version;
        Ok(())
    }

    /// Record a profile as assigned.
    pub fn assign_profile(&mut self, profile: ProfileId) -> Result<()> {
        self.ensure_live()?;
        self.profiles.insert(profile);
        Ok(())
    }

    /// Remove a profile from the assigned set.
    pub fn unassign_profile(&mut self, profile: &ProfileId) -> Result<()> {
        self.ensure_live()?;
        self.profiles.remove(profile);
        Ok(())
    }

    /// Set or replace an attribute value.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.ensure_live()?;
        self.attributes.insert(key.into(), value.into());
        Ok(())
    }

    /// Link a child container.
    pub fn add_child(&mut self, child: ContainerId) -> Result<()> {
        self.ensure_live()?;
        self.children.insert(child);
        Ok(())
    }

    /// Unlink a child container. Permitted in any state; unlinking happens
    /// while the child is being removed from the registry.
    pub fn remove_child(&mut self, child: &ContainerId) {
        self.children.remove(child);
    }

    /// Produce an immutable, deep point-in-time copy.
    pub fn snapshot(&self) -> Container {
        Container {
            id: self.id.clone(),
            parent: self.parent.clone(),
            children: self.children.clone(),
            lifecycle: self.lifecycle,
            version: self.version.clone(),
            profiles: self.profiles.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

/// Immutable snapshot of a container, safe to retain across time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub parent: Option<ContainerId>,
    pub children: BTreeSet<ContainerId>,
    pub lifecycle: Lifecycle,
    pub version: Option<VersionId>,
    pub profiles: BTreeSet<ProfileId>,
    pub attributes: BTreeMap<String, String>,
}
