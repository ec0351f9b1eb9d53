//! ---
//! corral_section: "03-registry-state"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Registry-owned mutable state and immutable snapshots."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use corral_common::{ProfileId, VersionId};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::locks::{ReadGuard, TimedRwLock, WriteGuard};
use crate::profile::{Profile, ProfileState, ProfileVersion, ProfileVersionState};

const VERSION_LOCK: &str = "profile-version";

/// Owner of the per-version [`ProfileVersionState`] nodes.
///
/// The version lock guards the whole version, including its profile map;
/// profiles within one version are structurally small and always touched as a
/// set, so they do not carry locks of their own.
#[derive(Debug)]
pub struct ProfileRegistry {
    versions: RwLock<HashMap<VersionId, Arc<TimedRwLock<ProfileVersionState>>>>,
    lock_timeout: Duration,
}

impl ProfileRegistry {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Register a new, empty profile version.
    pub fn add_version(&self, id: VersionId) -> Result<()> {
        let mut versions = self.versions.write();
        if versions.contains_key(&id) {
            return Err(RegistryError::VersionExists(id));
        }
        versions.insert(
            id.clone(),
            Arc::new(TimedRwLock::new(ProfileVersionState::new(id.clone()))),
        );
        debug!(version = %id, "profile version registered");
        Ok(())
    }

    /// Remove a profile version.
    ///
    /// The live-reference check happens under both the registry map lock and
    /// the version's write lock, so a container cannot attach between the
    /// check and the removal.
    pub fn remove_version(&self, id: &VersionId) -> Result<()> {
        let mut versions = self.versions.write();
        let entry = versions
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::VersionNotRegistered(id.clone()))?;
        {
            let state = entry
                .write(self.lock_timeout)
                .ok_or_else(|| lock_timeout(id))?;
            if let Some(container) = state.containers().iter().next() {
                return Err(RegistryError::VersionReferenced {
                    version: id.clone(),
                    container: container.clone(),
                });
            }
        }
        versions.remove(id);
        debug!(version = %id, "profile version removed");
        Ok(())
    }

    /// Whether a version is registered.
    pub fn contains_version(&self, id: &VersionId) -> bool {
        self.versions.read().contains_key(id)
    }

    /// All registered version identities.
    pub fn versions(&self) -> Vec<VersionId> {
        let mut ids: Vec<VersionId> = self.versions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn entry(&self, id: &VersionId) -> Result<Arc<TimedRwLock<ProfileVersionState>>> {
        self.versions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::VersionNotRegistered(id.clone()))
    }

    /// Acquire the version's shared lock within the configured timeout.
    pub fn read_lock(&self, id: &VersionId) -> Result<ReadGuard<ProfileVersionState>> {
        let entry = self.entry(id)?;
        entry.read(self.lock_timeout).ok_or_else(|| lock_timeout(id))
    }

    /// Acquire the version's exclusive lock within the configured timeout.
    pub fn write_lock(&self, id: &VersionId) -> Result<WriteGuard<ProfileVersionState>> {
        let entry = self.entry(id)?;
        entry.write(self.lock_timeout).ok_or_else(|| lock_timeout(id))
    }

    /// Snapshot a whole version, failing when it is not registered.
    pub fn snapshot_version(&self, id: &VersionId) -> Result<ProfileVersion> {
        Ok(self.read_lock(id)?.snapshot())
    }

    /// Add a profile to a version.
    pub fn add_profile(&self, version: &VersionId, profile: ProfileState) -> Result<()> {
        let mut state = self.write_lock(version)?;
        state.add_profile(profile)
    }

    /// Remove a profile from a version, refusing while still assigned.
    pub fn remove_profile(&self, version: &VersionId, id: &ProfileId) -> Result<()> {
        let mut state = self.write_lock(version)?;
        state.remove_profile(id)
    }

    /// Snapshot a single profile, failing when version or profile is absent.
    pub fn get_profile(&self, version: &VersionId, id: &ProfileId) -> Result<Profile> {
        let state = self.read_lock(version)?;
        Ok(state.profile_required(id)?.snapshot())
    }

    /// Snapshots of all profiles in a version.
    pub fn profiles(&self, version: &VersionId) -> Result<Vec<Profile>> {
        Ok(self.read_lock(version)?.profile_snapshots())
    }
}

fn lock_timeout(id: &VersionId) -> RegistryError {
    RegistryError::LockTimeout {
        kind: VERSION_LOCK,
        id: id.to_string(),
    }
}
