//! ---
//! corral_section: "04-provisioning-orchestration"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Orchestration services coupling containers, profiles, and provisioning."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use corral_common::{ContainerId, IdentityError, ProfileId};
use corral_registry::RegistryError;
use thiserror::Error;

use crate::permit::PermitError;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the orchestration services.
///
/// Callers can tell transient contention (`is_busy`) apart from invalid
/// requests; busy errors are safe to retry, the rest are not.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed identity supplied by the caller.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// Registry-level failure: unknown/duplicate entities, state conflicts,
    /// lock timeouts.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Permit-level failure: service inactive or permit contention.
    #[error(transparent)]
    Permit(#[from] PermitError),
    /// The container has no current profile version to resolve against.
    #[error("container '{0}' has no profile version set")]
    VersionUnset(ContainerId),
    /// A profile item failed validation before being stored.
    #[error("invalid profile item: {0}")]
    InvalidProfileItem(String),
    /// Applying a profile's configuration to the backing store failed.
    #[error("provisioning profile '{profile}' on container '{container}' failed")]
    Provisioning {
        container: ContainerId,
        profile: ProfileId,
        #[source]
        source: anyhow::Error,
    },
}

impl CoreError {
    /// Whether the error indicates transient contention rather than an
    /// invalid request; safe to retry.
    pub fn is_busy(&self) -> bool {
        match self {
            CoreError::Registry(err) => err.is_busy(),
            CoreError::Permit(err) => err.is_busy(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_classification_covers_lock_and_permit_timeouts() {
        let lock: CoreError = RegistryError::LockTimeout {
            kind: "container",
            id: "cnt-a".to_owned(),
        }
        .into();
        assert!(lock.is_busy());

        let permit: CoreError = PermitError::Timeout("container-service").into();
        assert!(permit.is_busy());

        let invalid: CoreError = IdentityError::Empty.into();
        assert!(!invalid.is_busy());
    }
}
