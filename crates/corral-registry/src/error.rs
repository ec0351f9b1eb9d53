//! ---
//! corral_section: "03-registry-state"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Registry-owned mutable state and immutable snapshots."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use corral_common::{ContainerId, ProfileId, VersionId};
use thiserror::Error;

use crate::container::Lifecycle;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised by the container and profile registries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("container '{0}' is already registered")]
    ContainerExists(ContainerId),
    #[error("container '{0}' is not registered")]
    ContainerNotRegistered(ContainerId),
    #[error("profile version '{0}' is already registered")]
    VersionExists(VersionId),
    #[error("profile version '{0}' is not registered")]
    VersionNotRegistered(VersionId),
    #[error("profile '{profile}' already exists in version '{version}'")]
    ProfileExists {
        version: VersionId,
        profile: ProfileId,
    },
    #[error("profile '{profile}' does not exist in version '{version}'")]
    ProfileNotFound {
        version: VersionId,
        profile: ProfileId,
    },
    #[error("parent profile '{parent}' does not exist in version '{version}'")]
    ParentMissing {
        version: VersionId,
        parent: ProfileId,
    },
    #[error("{kind} lock on '{id}' not obtained in time")]
    LockTimeout { kind: &'static str, id: String },
    #[error("container '{0}' is destroyed")]
    ContainerDestroyed(ContainerId),
    #[error("invalid lifecycle transition {from:?} -> {to:?} for container '{id}'")]
    InvalidTransition {
        id: ContainerId,
        from: Lifecycle,
        to: Lifecycle,
    },
    #[error("container '{id}' has active children: {children:?}")]
    HasChildren {
        id: ContainerId,
        children: Vec<ContainerId>,
    },
    #[error("profile version '{version}' is still referenced by container '{container}'")]
    VersionReferenced {
        version: VersionId,
        container: ContainerId,
    },
    #[error("profile '{profile}' is still assigned to container '{container}'")]
    ProfileReferenced {
        profile: ProfileId,
        container: ContainerId,
    },
    #[error("profile inheritance cycle detected at '{0}'")]
    InheritanceCycle(ProfileId),
}

impl RegistryError {
    /// Whether the error indicates transient contention rather than an
    /// invalid request; safe to retry.
    pub fn is_busy(&self) -> bool {
        matches!(self, RegistryError::LockTimeout { .. })
    }
}
