//! ---
//! corral_section: "03-registry-state"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Registry-owned mutable state and immutable snapshots."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use corral_common::{ContainerId, ProfileId, VersionId};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// One opaque configuration item carried by a profile, keyed by its
/// persistent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileItem {
    pid: String,
    properties: BTreeMap<String, String>,
    /// When set, this item replaces a same-pid item inherited from an
    /// earlier-declared parent during effective-profile resolution.
    #[serde(default)]
    overrides: bool,
}

impl ProfileItem {
    pub fn new(pid: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self {
            pid: pid.into(),
            properties,
            overrides: false,
        }
    }

    /// Mark the item as an explicit override.
    pub fn overriding(mut self) -> Self {
        self.overrides = true;
        self
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn is_override(&self) -> bool {
        self.overrides
    }
}

/// Canonical mutable state of one profile, nested under its owning
/// [`ProfileVersionState`] and mutated only through that version's write lock.
#[derive(Debug)]
pub struct ProfileState {
    id: ProfileId,
    version: VersionId,
    parents: IndexSet<ProfileId>,
    items: BTreeMap<String, ProfileItem>,
    containers: BTreeSet<ContainerId>,
}

impl ProfileState {
    pub fn new(id: ProfileId, version: VersionId) -> Self {
        Self {
            id,
            version,
            parents: IndexSet::new(),
            items: BTreeMap::new(),
            containers: BTreeSet::new(),
        }
    }

    /// Declare parent profiles, preserving declaration order.
    pub fn with_parents(mut self, parents: impl IntoIterator<Item = ProfileId>) -> Self {
        self.parents = parents.into_iter().collect();
        self
    }

    /// Seed configuration items.
    pub fn with_items(mut self, items: impl IntoIterator<Item = ProfileItem>) -> Self {
        self.items = items
            .into_iter()
            .map(|item| (item.pid().to_owned(), item))
            .collect();
        self
    }

    pub fn id(&self) -> &ProfileId {
        &self.id
    }

    pub fn version(&self) -> &VersionId {
        &self.version
    }

    pub fn parents(&self) -> &IndexSet<ProfileId> {
        &self.parents
    }

    pub fn items(&self) -> &BTreeMap<String, ProfileItem> {
        &self.items
    }

    pub fn containers(&self) -> &BTreeSet<ContainerId> {
        &self.containers
    }

    /// Replace the item set wholesale. Used by profile updates, which are
    /// atomic under the owning version's write lock.
    pub fn replace_items(&mut self, items: impl IntoIterator<Item = ProfileItem>) {
        self.items = items
            .into_iter()
            .map(|item| (item.pid().to_owned(), item))
            .collect();
    }

    /// Record that a container has this profile provisioned.
    pub fn associate(&mut self, container: ContainerId) {
        self.containers.insert(container);
    }

    /// Remove a container's provisioning association.
    pub fn disassociate(&mut self, container: &ContainerId) {
        self.containers.remove(container);
    }

    /// Produce an immutable, deep point-in-time copy.
    pub fn snapshot(&self) -> Profile {
        Profile {
            id: self.id.clone(),
            version: self.version.clone(),
            parents: self.parents.iter().cloned().collect(),
            items: self.items.clone(),
            containers: self.containers.clone(),
        }
    }
}

/// Immutable snapshot of a profile, safe to retain across time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub version: VersionId,
    /// Parent profiles in declaration order.
    pub parents: Vec<ProfileId>,
    pub items: BTreeMap<String, ProfileItem>,
    pub containers: BTreeSet<ContainerId>,
}

/// Canonical mutable state of one profile version: the set of profiles it
/// holds and the containers currently pinned to it.
#[derive(Debug)]
pub struct ProfileVersionState {
    id: VersionId,
    profiles: BTreeMap<ProfileId, ProfileState>,
    containers: BTreeSet<ContainerId>,
}

impl ProfileVersionState {
    pub fn new(id: VersionId) -> Self {
        Self {
            id,
            profiles: BTreeMap::new(),
            containers: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &VersionId {
        &self.id
    }

    pub fn containers(&self) -> &BTreeSet<ContainerId> {
        &self.containers
    }

    /// Record that a container now references this version.
    pub fn associate_container(&mut self, container: ContainerId) {
        self.containers.insert(container);
    }

    /// Remove a container's reference to this version.
    pub fn disassociate_container(&mut self, container: &ContainerId) {
        self.containers.remove(container);
    }

    /// Add a profile to this version. Parent references must name profiles
    /// already present in the same version.
    pub fn add_profile(&mut self, profile: ProfileState) -> Result<()> {
        if self.profiles.contains_key(profile.id()) {
            return Err(RegistryError::ProfileExists {
                version: self.id.clone(),
                profile: profile.id().clone(),
            });
        }
        for parent in profile.parents() {
            if !self.profiles.contains_key(parent) {
                return Err(RegistryError::ParentMissing {
                    version: self.id.clone(),
                    parent: parent.clone(),
                });
            }
        }
        self.profiles.insert(profile.id().clone(), profile);
        Ok(())
    }

    /// Remove a profile, refusing while any container still has it assigned.
    pub fn remove_profile(&mut self, id: &ProfileId) -> Result<()> {
        let profile = self
            .profiles
            .get(id)
            .ok_or_else(|| RegistryError::ProfileNotFound {
                version: self.id.clone(),
                profile: id.clone(),
            })?;
        if let Some(container) = profile.containers().iter().next() {
            return Err(RegistryError::ProfileReferenced {
                profile: id.clone(),
                container: container.clone(),
            });
        }
        self.profiles.remove(id);
        Ok(())
    }

    pub fn profile(&self, id: &ProfileId) -> Option<&ProfileState> {
        self.profiles.get(id)
    }

    pub fn profile_mut(&mut self, id: &ProfileId) -> Option<&mut ProfileState> {
        self.profiles.get_mut(id)
    }

    /// Look up a profile, failing when it is absent.
    pub fn profile_required(&self, id: &ProfileId) -> Result<&ProfileState> {
        self.profiles
            .get(id)
            .ok_or_else(|| RegistryError::ProfileNotFound {
                version: self.id.clone(),
                profile: id.clone(),
            })
    }

    /// Mutable lookup, failing when the profile is absent.
    pub fn profile_required_mut(&mut self, id: &ProfileId) -> Result<&mut ProfileState> {
        let version = self.id.clone();
        self.profiles
            .get_mut(id)
            .ok_or(RegistryError::ProfileNotFound {
                version,
                profile: id.clone(),
            })
    }

    /// Identities of all profiles in this version.
    pub fn profile_ids(&self) -> Vec<ProfileId> {
        self.profiles.keys().cloned().collect()
    }

    /// Snapshots of all profiles in this version.
    pub fn profile_snapshots(&self) -> Vec<Profile> {
        self.profiles.values().map(ProfileState::snapshot).collect()
    }

    /// Resolve the effective profile: the profile's own items merged with its
    /// transitive parents, depth-first in declaration order.
    ///
    /// The profile's own items always win. Among parents, the first-declared
    /// parent wins; a later parent's item replaces an already-merged parent
    /// item only when that item is explicitly flagged as an override.
    /// Inheritance cycles fail with [`RegistryError::InheritanceCycle`].
    pub fn effective_profile(&self, id: &ProfileId) -> Result<Profile> {
        let root = self.profile_required(id)?;
        let mut merged = root.items().clone();
        let own_pids: BTreeSet<String> = merged.keys().cloned().collect();
        let mut path: IndexSet<ProfileId> = IndexSet::new();
        path.insert(id.clone());
        for parent in root.parents() {
            self.merge_parent(parent, &mut path, &mut merged, &own_pids)?;
        }
        Ok(Profile {
            id: root.id().clone(),
            version: self.id.clone(),
            parents: root.parents().iter().cloned().collect(),
            items: merged,
            containers: root.containers().clone(),
        })
    }

    fn merge_parent(
        &self,
        id: &ProfileId,
        path: &mut IndexSet<ProfileId>,
        merged: &mut BTreeMap<String, ProfileItem>,
        own_pids: &BTreeSet<String>,
    ) -> Result<()> {
        if !path.insert(id.clone()) {
            return Err(RegistryError::InheritanceCycle(id.clone()));
        }
        let profile = self.profile_required(id)?;
        for (pid, item) in profile.items() {
            if own_pids.contains(pid) {
                continue;
            }
            match merged.entry(pid.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(item.clone());
                }
                Entry::Occupied(mut slot) => {
                    if item.is_override() {
                        slot.insert(item.clone());
                    }
                }
            }
        }
        for parent in profile.parents() {
            self.merge_parent(parent, path, merged, own_pids)?;
        }
        path.shift_remove(id);
        Ok(())
    }

    /// Produce an immutable, deep point-in-time copy of the whole version.
    pub fn snapshot(&self) -> ProfileVersion {
        ProfileVersion {
            id: self.id.clone(),
            profiles: self
                .profiles
                .iter()
                .map(|(id, profile)| (id.clone(), profile.snapshot()))
                .collect(),
            containers: self.containers.clone(),
        }
    }
}

/// Immutable snapshot of a profile version, safe to retain across time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileVersion {
    pub id: VersionId,
    pub profiles: BTreeMap<ProfileId, Profile>,
    pub containers: BTreeSet<ContainerId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version() -> ProfileVersionState {
        ProfileVersionState::new(VersionId::new("1.0").unwrap())
    }

    fn pid(name: &str) -> ProfileId {
        ProfileId::new(name).unwrap()
    }

    fn item(pid: &str, key: &str, value: &str) -> ProfileItem {
        let mut properties = BTreeMap::new();
        properties.insert(key.to_owned(), value.to_owned());
        ProfileItem::new(pid, properties)
    }

    fn add(version: &mut ProfileVersionState, name: &str, parents: &[&str], items: Vec<ProfileItem>) {
        let state = ProfileState::new(pid(name), version.id().clone())
            .with_parents(parents.iter().map(|p| pid(p)))
            .with_items(items);
        version.add_profile(state).unwrap();
    }

    #[test]
    fn duplicate_profile_rejected() {
        let mut version = version();
        add(&mut version, "base", &[], vec![]);
        let err = version
            .add_profile(ProfileState::new(pid("base"), version.id().clone()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ProfileExists { .. }));
    }

    #[test]
    fn parents_must_exist_in_same_version() {
        let mut version = version();
        let orphan = ProfileState::new(pid("web"), version.id().clone())
            .with_parents(vec![pid("missing")]);
        let err = version.add_profile(orphan).unwrap_err();
        assert!(matches!(err, RegistryError::ParentMissing { .. }));
    }

    #[test]
    fn remove_refused_while_assigned() {
        let mut version = version();
        add(&mut version, "base", &[], vec![]);
        version
            .profile_required_mut(&pid("base"))
            .unwrap()
            .associate(ContainerId::new("cnt-a").unwrap());

        let err = version.remove_profile(&pid("base")).unwrap_err();
        assert!(matches!(err, RegistryError::ProfileReferenced { .. }));

        version
            .profile_required_mut(&pid("base"))
            .unwrap()
            .disassociate(&ContainerId::new("cnt-a").unwrap());
        version.remove_profile(&pid("base")).unwrap();
    }

    #[test]
    fn effective_profile_prefers_own_items_then_first_parent() {
        let mut version = version();
        add(&mut version, "base-a", &[], vec![item("net", "mtu", "1500")]);
        add(&mut version, "base-b", &[], vec![item("net", "mtu", "9000")]);
        add(
            &mut version,
            "web",
            &["base-a", "base-b"],
            vec![item("svc", "port", "8080")],
        );

        let effective = version.effective_profile(&pid("web")).unwrap();
        assert_eq!(
            effective.items["net"].properties().get("mtu").unwrap(),
            "1500"
        );
        assert_eq!(
            effective.items["svc"].properties().get("port").unwrap(),
            "8080"
        );
    }

    #[test]
    fn later_parent_wins_only_with_override_flag() {
        let mut version = version();
        add(&mut version, "base-a", &[], vec![item("net", "mtu", "1500")]);
        add(
            &mut version,
            "base-b",
            &[],
            vec![item("net", "mtu", "9000").overriding()],
        );
        add(&mut version, "web", &["base-a", "base-b"], vec![]);

        let effective = version.effective_profile(&pid("web")).unwrap();
        assert_eq!(
            effective.items["net"].properties().get("mtu").unwrap(),
            "9000"
        );
    }

    #[test]
    fn own_items_survive_overriding_parent() {
        let mut version = version();
        add(
            &mut version,
            "base",
            &[],
            vec![item("net", "mtu", "9000").overriding()],
        );
        add(
            &mut version,
            "web",
            &["base"],
            vec![item("net", "mtu", "1500")],
        );

        let effective = version.effective_profile(&pid("web")).unwrap();
        assert_eq!(
            effective.items["net"].properties().get("mtu").unwrap(),
            "1500"
        );
    }

    #[test]
    fn diamond_inheritance_is_not_a_cycle() {
        let mut version = version();
        add(&mut version, "root", &[], vec![item("sys", "tz", "utc")]);
        add(&mut version, "left", &["root"], vec![]);
        add(&mut version, "right", &["root"], vec![]);
        add(&mut version, "leaf", &["left", "right"], vec![]);

        let effective = version.effective_profile(&pid("leaf")).unwrap();
        assert_eq!(effective.items["sys"].properties().get("tz").unwrap(), "utc");
    }

    #[test]
    fn inheritance_cycle_detected() {
        let mut version = version();
        add(&mut version, "a", &[], vec![]);
        add(&mut version, "b", &["a"], vec![]);
        // Rewire a -> b after the fact to build the cycle.
        let a = version.profile_required_mut(&pid("a")).unwrap();
        a.parents = [pid("b")].into_iter().collect();

        let err = version.effective_profile(&pid("b")).unwrap_err();
        assert!(matches!(err, RegistryError::InheritanceCycle(_)));
    }

    #[test]
    fn version_snapshot_is_deep() {
        let mut version = version();
        add(&mut version, "base", &[], vec![item("net", "mtu", "1500")]);
        let snapshot = version.snapshot();

        version
            .profile_required_mut(&pid("base"))
            .unwrap()
            .replace_items(vec![item("net", "mtu", "9000")]);

        assert_eq!(
            snapshot.profiles[&pid("base")].items["net"]
                .properties()
                .get("mtu")
                .unwrap(),
            "1500"
        );
    }
}
