//! ---
//! corral_section: "04-provisioning-orchestration"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Orchestration services coupling containers, profiles, and provisioning."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::sync::Arc;

use corral_common::{ProfileId, VersionId};
use corral_events::{EventDispatcher, FleetListener, ProfileEvent};
use corral_registry::{
    Profile, ProfileItem, ProfileRegistry, ProfileState, ProfileVersion, ProfileVersionState,
    ReadGuard, WriteGuard,
};
use tracing::info;

use crate::error::{CoreError, Result};

/// Orchestrator for profile-version and profile CRUD. The only writer of
/// profile state.
///
/// Mutations serialise per version through the version's write lock; reads
/// proceed concurrently under the read lock.
pub struct ProfileService {
    profiles: Arc<ProfileRegistry>,
    dispatcher: Arc<EventDispatcher>,
}

impl ProfileService {
    pub fn new(profiles: Arc<ProfileRegistry>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            profiles,
            dispatcher,
        }
    }

    /// Register a new, empty profile version.
    pub fn add_profile_version(&self, id: VersionId) -> Result<ProfileVersion> {
        self.profiles.add_version(id.clone())?;
        info!(version = %id, "profile version added");
        Ok(self.profiles.snapshot_version(&id)?)
    }

    /// Remove a profile version; fails while any container references it.
    pub fn remove_profile_version(&self, id: &VersionId) -> Result<()> {
        self.profiles.remove_version(id)?;
        info!(version = %id, "profile version removed");
        Ok(())
    }

    /// Snapshot a whole version.
    pub fn profile_version(&self, id: &VersionId) -> Result<ProfileVersion> {
        Ok(self.profiles.snapshot_version(id)?)
    }

    /// All registered version identities.
    pub fn profile_versions(&self) -> Vec<VersionId> {
        self.profiles.versions()
    }

    /// Add a profile to a version. Parents must already exist in the same
    /// version; declaration order of parents is preserved.
    pub fn add_profile(
        &self,
        version: &VersionId,
        id: ProfileId,
        parents: impl IntoIterator<Item = ProfileId>,
        items: impl IntoIterator<Item = ProfileItem>,
    ) -> Result<Profile> {
        let items = validated_items(items)?;
        let state = ProfileState::new(id.clone(), version.clone())
            .with_parents(parents)
            .with_items(items);
        self.profiles.add_profile(version, state)?;
        info!(version = %version, profile = %id, "profile added");
        Ok(self.profiles.get_profile(version, &id)?)
    }

    /// Remove a profile; fails while any container has it assigned.
    pub fn remove_profile(&self, version: &VersionId, id: &ProfileId) -> Result<()> {
        self.profiles.remove_profile(version, id)?;
        info!(version = %version, profile = %id, "profile removed");
        Ok(())
    }

    /// Snapshot a single profile.
    pub fn profile(&self, version: &VersionId, id: &ProfileId) -> Result<Profile> {
        Ok(self.profiles.get_profile(version, id)?)
    }

    /// Snapshots of all profiles in a version.
    pub fn profiles(&self, version: &VersionId) -> Result<Vec<Profile>> {
        Ok(self.profiles.profiles(version)?)
    }

    /// Replace a profile's item set atomically under the version write lock.
    ///
    /// The submitted snapshot names the version and profile; its item map is
    /// the new content. On success an `UPDATED` profile event is dispatched
    /// (the container service re-provisions affected containers from it); on
    /// failure an `ERROR` event is dispatched and the failure re-raised.
    pub fn update_profile(
        &self,
        profile: &Profile,
        listener: Option<Arc<dyn FleetListener>>,
    ) -> Result<Profile> {
        let updated = {
            let mut version_state = self.profiles.write_lock(&profile.version)?;
            match self.apply_update(&mut version_state, profile) {
                Ok(updated) => updated,
                Err(err) => {
                    // Announce the failure against the last known snapshot
                    // when the profile still resolves.
                    if let Some(state) = version_state.profile(&profile.id) {
                        self.dispatcher.dispatch_with(
                            ProfileEvent::error(state.snapshot(), err.to_string()),
                            listener,
                        );
                    }
                    return Err(err);
                }
            }
        };
        self.dispatcher
            .dispatch_with(ProfileEvent::updated(updated.clone()), listener);
        info!(version = %profile.version, profile = %profile.id, "profile updated");
        Ok(updated)
    }

    fn apply_update(
        &self,
        version_state: &mut ProfileVersionState,
        profile: &Profile,
    ) -> Result<Profile> {
        let items = validated_items(profile.items.values().cloned())?;
        let state = version_state.profile_required_mut(&profile.id)?;
        state.replace_items(items);
        Ok(state.snapshot())
    }

    /// Resolve the effective profile (own items merged with transitive
    /// parents). Read-only; fails on inheritance cycles.
    pub fn effective_profile(&self, version: &VersionId, id: &ProfileId) -> Result<Profile> {
        let state = self.profiles.read_lock(version)?;
        Ok(state.effective_profile(id)?)
    }

    /// Deep immutable copy of a profile, suitable as a builder seed for
    /// [`ProfileService::update_profile`].
    pub fn copy_profile(&self, version: &VersionId, id: &ProfileId) -> Result<Profile> {
        Ok(self.profiles.get_profile(version, id)?)
    }

    /// Deep immutable copy of a whole version.
    pub fn copy_profile_version(&self, id: &VersionId) -> Result<ProfileVersion> {
        Ok(self.profiles.snapshot_version(id)?)
    }

    /// Acquire a version's shared lock (bounded wait).
    pub fn version_read_lock(&self, id: &VersionId) -> Result<ReadGuard<ProfileVersionState>> {
        Ok(self.profiles.read_lock(id)?)
    }

    /// Acquire a version's exclusive lock (bounded wait).
    pub fn version_write_lock(&self, id: &VersionId) -> Result<WriteGuard<ProfileVersionState>> {
        Ok(self.profiles.write_lock(id)?)
    }
}

fn validated_items(items: impl IntoIterator<Item = ProfileItem>) -> Result<Vec<ProfileItem>> {
    let items: Vec<ProfileItem> = items.into_iter().collect();
    for item in &items {
        if item.pid().trim().is_empty() {
            return Err(CoreError::InvalidProfileItem(
                "item pid must not be empty".to_owned(),
            ));
        }
    }
    Ok(items)
}
