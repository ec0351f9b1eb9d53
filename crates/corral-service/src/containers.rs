//! ---
//! corral_section: "04-provisioning-orchestration"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Orchestration services coupling containers, profiles, and provisioning."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use corral_common::{ContainerId, ProfileId, VersionId};
use corral_events::{
    EventDispatcher, FleetListener, ProfileEvent, ProfileEventStatus, ProvisioningEvent,
    ProvisioningStatus,
};
use corral_registry::{
    Container, ContainerRegistry, ContainerState, Lifecycle, ProfileRegistry, ProfileVersionState,
    ReadGuard, RegistryError, WriteGuard,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::configstore::ConfigStore;
use crate::error::{CoreError, Result};

/// Attribute carrying the registration token a container presents when
/// joining the fleet. Inherited from the parent, generated for roots.
pub const TOKEN_ATTRIBUTE: &str = "corral.token";

/// Immutable options consumed by [`ContainerService::create_container`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    name: ContainerId,
    attributes: BTreeMap<String, String>,
}

impl CreateOptions {
    /// Build options around a validated symbolic name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: ContainerId::new(name)?,
            attributes: BTreeMap::new(),
        })
    }

    /// Attach an attribute seeded onto the new container.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &ContainerId {
        &self.name
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// Orchestrator for container lifecycle, version switching, and profile
/// assignment. The only writer of container state.
///
/// Lock ordering rule: every compound operation acquires the container's
/// write lock first, then any profile-version lock it needs, and releases in
/// reverse order. The update-propagation path follows the same order.
pub struct ContainerService {
    containers: Arc<ContainerRegistry>,
    profiles: Arc<ProfileRegistry>,
    dispatcher: Arc<EventDispatcher>,
    store: Arc<dyn ConfigStore>,
    default_version: VersionId,
    default_profile: ProfileId,
}

impl std::fmt::Debug for ContainerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerService")
            .field("default_version", &self.default_version)
            .field("default_profile", &self.default_profile)
            .finish_non_exhaustive()
    }
}

impl ContainerService {
    pub fn new(
        containers: Arc<ContainerRegistry>,
        profiles: Arc<ProfileRegistry>,
        dispatcher: Arc<EventDispatcher>,
        store: Arc<dyn ConfigStore>,
        default_version: VersionId,
        default_profile: ProfileId,
    ) -> Self {
        Self {
            containers,
            profiles,
            dispatcher,
            store,
            default_version,
            default_profile,
        }
    }

    /// Register a new container in the `Created` state.
    ///
    /// No provisioning happens at creation. The container inherits its
    /// parent's registration token, or receives a fresh one as a root.
    pub fn create_container(
        &self,
        parent: Option<&ContainerId>,
        options: CreateOptions,
    ) -> Result<Container> {
        let token = match parent {
            Some(parent_id) => self
                .containers
                .read_lock(parent_id)?
                .attribute(TOKEN_ATTRIBUTE)
                .map(str::to_owned),
            None => None,
        };
        let token = token.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut attributes = options.attributes;
        attributes.insert(TOKEN_ATTRIBUTE.to_owned(), token);
        let state = ContainerState::new(options.name.clone(), parent.cloned(), attributes);
        let snapshot = state.snapshot();
        self.containers.add(parent, state)?;
        info!(container = %snapshot.id, parent = parent.map(|p| p.as_str()).unwrap_or(""), "container created");
        Ok(snapshot)
    }

    /// Start a container, resolving the default version and profile when none
    /// are set yet.
    pub fn start_container(
        &self,
        id: &ContainerId,
        listener: Option<Arc<dyn FleetListener>>,
    ) -> Result<Container> {
        let mut guard = self.containers.write_lock(id)?;
        if !matches!(guard.lifecycle(), Lifecycle::Created | Lifecycle::Stopped) {
            return Err(RegistryError::InvalidTransition {
                id: id.clone(),
                from: guard.lifecycle(),
                to: Lifecycle::Started,
            }
            .into());
        }
        if guard.version().is_none() {
            let default_version = self.default_version.clone();
            self.set_version_locked(&mut guard, &default_version, listener.as_ref())?;
        }
        if guard.profiles().is_empty() {
            let defaults = BTreeSet::from([self.default_profile.clone()]);
            self.add_profiles_locked(&mut guard, &defaults, listener.as_ref())?;
        }
        guard.transition(Lifecycle::Started)?;
        let snapshot = guard.snapshot();
        info!(container = %id, version = %snapshot.version.as_ref().map(|v| v.as_str()).unwrap_or(""), "container started");
        Ok(snapshot)
    }

    /// Stop a started container. Profiles stay assigned; only the run state
    /// changes.
    pub fn stop_container(&self, id: &ContainerId) -> Result<Container> {
        let mut guard = self.containers.write_lock(id)?;
        guard.transition(Lifecycle::Stopped)?;
        info!(container = %id, "container stopped");
        Ok(guard.snapshot())
    }

    /// Destroy a container: unprovision every assigned profile, remove it
    /// from the registry, and mark it terminal.
    pub fn destroy_container(&self, id: &ContainerId) -> Result<Container> {
        let mut guard = self.containers.write_lock(id)?;
        if !guard.children().is_empty() {
            return Err(RegistryError::HasChildren {
                id: id.clone(),
                children: guard.children().iter().cloned().collect(),
            }
            .into());
        }
        if let Some(version) = guard.version().cloned() {
            let mut version_state = self.profiles.write_lock(&version)?;
            for profile in guard.profiles().clone() {
                self.unprovision_locked(id, &mut version_state, &profile, None)?;
                guard.unassign_profile(&profile)?;
            }
            version_state.disassociate_container(id);
            drop(version_state);
            guard.set_version(None)?;
        }
        guard.transition(Lifecycle::Destroyed)?;
        let snapshot = guard.snapshot();
        let parent = guard.parent().cloned();
        drop(guard);
        self.containers.remove(id, parent.as_ref())?;
        info!(container = %id, "container destroyed");
        Ok(snapshot)
    }

    /// Switch a container to a different profile version.
    ///
    /// The assigned profiles are resolved against the new version before
    /// anything is torn down, so a failed switch leaves the container
    /// untouched; then every profile is unprovisioned against the old version
    /// and provisioned against the new one.
    pub fn set_profile_version(
        &self,
        id: &ContainerId,
        version: &VersionId,
        listener: Option<Arc<dyn FleetListener>>,
    ) -> Result<Container> {
        let mut guard = self.containers.write_lock(id)?;
        self.set_version_locked(&mut guard, version, listener.as_ref())?;
        let snapshot = guard.snapshot();
        info!(container = %id, version = %version, "profile version set");
        Ok(snapshot)
    }

    /// Provision and assign additional profiles from the container's current
    /// version.
    pub fn add_profiles(
        &self,
        id: &ContainerId,
        profiles: &BTreeSet<ProfileId>,
        listener: Option<Arc<dyn FleetListener>>,
    ) -> Result<Container> {
        let mut guard = self.containers.write_lock(id)?;
        self.add_profiles_locked(&mut guard, profiles, listener.as_ref())?;
        let snapshot = guard.snapshot();
        info!(container = %id, count = profiles.len(), "profiles added");
        Ok(snapshot)
    }

    /// Unprovision and unassign profiles from the container's current
    /// version.
    pub fn remove_profiles(
        &self,
        id: &ContainerId,
        profiles: &BTreeSet<ProfileId>,
        listener: Option<Arc<dyn FleetListener>>,
    ) -> Result<Container> {
        let mut guard = self.containers.write_lock(id)?;
        let container_id = guard.id().clone();
        let version = guard
            .version()
            .cloned()
            .ok_or_else(|| CoreError::VersionUnset(container_id.clone()))?;
        let mut version_state = self.profiles.write_lock(&version)?;
        for profile in profiles {
            version_state.profile_required(profile)?;
        }
        for profile in profiles {
            self.unprovision_locked(&container_id, &mut version_state, profile, listener.as_ref())?;
            guard.unassign_profile(profile)?;
        }
        drop(version_state);
        let snapshot = guard.snapshot();
        info!(container = %id, count = profiles.len(), "profiles removed");
        Ok(snapshot)
    }

    /// Snapshot a single container, failing when it is not registered.
    pub fn container(&self, id: &ContainerId) -> Result<Container> {
        Ok(self.containers.snapshot(id)?)
    }

    /// Snapshot a single container, `None` when it is not registered.
    pub fn find_container(&self, id: &ContainerId) -> Result<Option<Container>> {
        Ok(self.containers.get(id)?)
    }

    /// Snapshot all containers, or the subset matching `filter`.
    pub fn list_containers(
        &self,
        filter: Option<&BTreeSet<ContainerId>>,
    ) -> Result<Vec<Container>> {
        Ok(self.containers.get_all(filter)?)
    }

    /// All registered container identities.
    pub fn container_ids(&self) -> Vec<ContainerId> {
        self.containers.identities()
    }

    /// Acquire a container's shared lock (bounded wait).
    pub fn container_read_lock(&self, id: &ContainerId) -> Result<ReadGuard<ContainerState>> {
        Ok(self.containers.read_lock(id)?)
    }

    /// Acquire a container's exclusive lock (bounded wait).
    pub fn container_write_lock(&self, id: &ContainerId) -> Result<WriteGuard<ContainerState>> {
        Ok(self.containers.write_lock(id)?)
    }

    fn set_version_locked(
        &self,
        guard: &mut WriteGuard<ContainerState>,
        new_version: &VersionId,
        listener: Option<&Arc<dyn FleetListener>>,
    ) -> Result<()> {
        let container_id = guard.id().clone();
        if guard.version() == Some(new_version) {
            debug!(container = %container_id, version = %new_version, "version unchanged");
            return Ok(());
        }
        let assigned: Vec<ProfileId> = guard.profiles().iter().cloned().collect();

        // Resolve against the new version before tearing anything down, so a
        // failed switch leaves the container's version unchanged.
        {
            let new_state = self.profiles.read_lock(new_version)?;
            for profile in &assigned {
                new_state.profile_required(profile)?;
            }
        }

        if let Some(old_version) = guard.version().cloned() {
            let mut old_state = self.profiles.write_lock(&old_version)?;
            for profile in &assigned {
                self.unprovision_locked(&container_id, &mut old_state, profile, listener)?;
            }
            old_state.disassociate_container(&container_id);
        }

        let mut new_state = self.profiles.write_lock(new_version)?;
        for profile in &assigned {
            self.provision_locked(&container_id, &mut new_state, profile, listener)?;
        }
        new_state.associate_container(container_id);
        drop(new_state);
        guard.set_version(Some(new_version.clone()))?;
        Ok(())
    }

    fn add_profiles_locked(
        &self,
        guard: &mut WriteGuard<ContainerState>,
        profiles: &BTreeSet<ProfileId>,
        listener: Option<&Arc<dyn FleetListener>>,
    ) -> Result<()> {
        let container_id = guard.id().clone();
        let version = guard
            .version()
            .cloned()
            .ok_or_else(|| CoreError::VersionUnset(container_id.clone()))?;
        let mut version_state = self.profiles.write_lock(&version)?;
        for profile in profiles {
            version_state.profile_required(profile)?;
        }
        for profile in profiles {
            self.provision_locked(&container_id, &mut version_state, profile, listener)?;
            guard.assign_profile(profile.clone())?;
        }
        Ok(())
    }

    /// Apply a profile's effective configuration to the store and record the
    /// association. Caller holds the container write lock and the version
    /// write lock.
    fn provision_locked(
        &self,
        container: &ContainerId,
        version_state: &mut ProfileVersionState,
        profile: &ProfileId,
        listener: Option<&Arc<dyn FleetListener>>,
    ) -> Result<()> {
        let version_id = version_state.id().clone();
        self.emit(
            ProvisioningEvent::new(
                ProvisioningStatus::Provisioning,
                container.clone(),
                profile.clone(),
                version_id.clone(),
            ),
            listener,
        );
        let effective = version_state.effective_profile(profile)?;
        for item in effective.items.values() {
            if let Err(source) = self.store.apply(item.pid(), item.properties()) {
                self.emit(
                    ProvisioningEvent::error(
                        container.clone(),
                        profile.clone(),
                        version_id.clone(),
                        source.to_string(),
                    ),
                    listener,
                );
                return Err(CoreError::Provisioning {
                    container: container.clone(),
                    profile: profile.clone(),
                    source,
                });
            }
        }
        version_state
            .profile_required_mut(profile)?
            .associate(container.clone());
        self.emit(
            ProvisioningEvent::new(
                ProvisioningStatus::Provisioned,
                container.clone(),
                profile.clone(),
                version_id,
            ),
            listener,
        );
        debug!(container = %container, profile = %profile, "profile provisioned");
        Ok(())
    }

    /// Remove the container/profile association. Caller holds the container
    /// write lock and the version write lock.
    fn unprovision_locked(
        &self,
        container: &ContainerId,
        version_state: &mut ProfileVersionState,
        profile: &ProfileId,
        listener: Option<&Arc<dyn FleetListener>>,
    ) -> Result<()> {
        let version_id = version_state.id().clone();
        self.emit(
            ProvisioningEvent::new(
                ProvisioningStatus::Removing,
                container.clone(),
                profile.clone(),
                version_id.clone(),
            ),
            listener,
        );
        version_state
            .profile_required_mut(profile)?
            .disassociate(container);
        self.emit(
            ProvisioningEvent::new(
                ProvisioningStatus::Removed,
                container.clone(),
                profile.clone(),
                version_id,
            ),
            listener,
        );
        debug!(container = %container, profile = %profile, "profile unprovisioned");
        Ok(())
    }

    fn emit(&self, event: ProvisioningEvent, listener: Option<&Arc<dyn FleetListener>>) {
        self.dispatcher.dispatch_with(event, listener.cloned());
    }

    /// React to a profile `UPDATED` event: re-provision the profile on every
    /// container that currently runs it, each under its own write lock so one
    /// slow container does not block propagation to the others.
    pub(crate) fn handle_profile_updated(&self, event: &ProfileEvent) {
        if event.status != ProfileEventStatus::Updated {
            return;
        }
        let profile = event.profile.id.clone();
        let version = event.profile.version.clone();
        for container in &event.profile.containers {
            if let Err(err) = self.reprovision(container, &profile, &version) {
                warn!(
                    container = %container,
                    profile = %profile,
                    error = %err,
                    "profile update propagation failed"
                );
            }
        }
    }

    fn reprovision(
        &self,
        container: &ContainerId,
        profile: &ProfileId,
        version: &VersionId,
    ) -> Result<()> {
        // Container lock first, then the version lock, matching the compound
        // operations.
        let guard = self.containers.write_lock(container)?;
        if guard.version() != Some(version) || !guard.profiles().contains(profile) {
            debug!(container = %container, profile = %profile, "assignment changed; skipping update propagation");
            return Ok(());
        }
        let mut version_state = self.profiles.write_lock(version)?;
        self.unprovision_locked(container, &mut version_state, profile, None)?;
        self.provision_locked(container, &mut version_state, profile, None)?;
        Ok(())
    }
}

/// Dispatcher subscriber forwarding profile `UPDATED` events into the
/// container service. Holds a weak reference so the runtime owns the service
/// lifetime.
pub(crate) struct UpdatePropagator {
    service: Weak<ContainerService>,
}

impl UpdatePropagator {
    pub(crate) fn new(service: &Arc<ContainerService>) -> Self {
        Self {
            service: Arc::downgrade(service),
        }
    }
}

impl FleetListener for UpdatePropagator {
    fn on_profile(&self, event: &ProfileEvent) -> anyhow::Result<()> {
        if let Some(service) = self.service.upgrade() {
            service.handle_profile_updated(event);
        }
        Ok(())
    }
}
