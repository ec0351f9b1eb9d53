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
use std::sync::Arc;
use std::time::Duration;

use corral_common::{ContainerId, ProfileId, VersionId};
use corral_events::EventDispatcher;
use corral_registry::{ContainerRegistry, ProfileItem, ProfileRegistry};
use corral_service::{ContainerService, CreateOptions, MemoryConfigStore, ProfileService};

fn vid(name: &str) -> VersionId {
    VersionId::new(name).unwrap()
}

fn pid(name: &str) -> ProfileId {
    ProfileId::new(name).unwrap()
}

fn cid(name: &str) -> ContainerId {
    ContainerId::new(name).unwrap()
}

fn services() -> (Arc<ContainerService>, Arc<ProfileService>, Arc<EventDispatcher>) {
    let container_registry = Arc::new(ContainerRegistry::new(Duration::from_secs(5)));
    let profile_registry = Arc::new(ProfileRegistry::new(Duration::from_secs(5)));
    let dispatcher = Arc::new(EventDispatcher::new(4));
    dispatcher.start();
    let containers = Arc::new(ContainerService::new(
        container_registry,
        profile_registry.clone(),
        dispatcher.clone(),
        Arc::new(MemoryConfigStore::new()),
        vid("1.0"),
        pid("default"),
    ));
    let profiles = Arc::new(ProfileService::new(profile_registry, dispatcher.clone()));
    profiles.add_profile_version(vid("1.0")).unwrap();
    for name in ["default", "web", "db", "cache", "metrics"] {
        profiles
            .add_profile(
                &vid("1.0"),
                pid(name),
                Vec::new(),
                vec![ProfileItem::new(
                    format!("corral.{name}"),
                    BTreeMap::new(),
                )],
            )
            .unwrap();
    }
    (containers, profiles, dispatcher)
}

#[test]
fn concurrent_add_profiles_serialise_to_the_union() {
    let (containers, _profiles, dispatcher) = services();
    containers
        .create_container(None, CreateOptions::new("cnt-a").unwrap())
        .unwrap();
    containers.start_container(&cid("cnt-a"), None).unwrap();

    let first: BTreeSet<ProfileId> = [pid("web"), pid("db")].into_iter().collect();
    let second: BTreeSet<ProfileId> = [pid("cache"), pid("metrics")].into_iter().collect();

    std::thread::scope(|scope| {
        let containers_a = containers.clone();
        let containers_b = containers.clone();
        let set_a = first.clone();
        let set_b = second.clone();
        let a = scope.spawn(move || containers_a.add_profiles(&cid("cnt-a"), &set_a, None));
        let b = scope.spawn(move || containers_b.add_profiles(&cid("cnt-a"), &set_b, None));
        a.join().unwrap().unwrap();
        b.join().unwrap().unwrap();
    });

    let container = containers.container(&cid("cnt-a")).unwrap();
    let mut expected: BTreeSet<ProfileId> = first.union(&second).cloned().collect();
    expected.insert(pid("default"));
    assert_eq!(container.profiles, expected);
    dispatcher.drain();
}

#[test]
fn operations_on_distinct_containers_proceed_concurrently() {
    let (containers, _profiles, dispatcher) = services();
    for name in ["cnt-a", "cnt-b"] {
        containers
            .create_container(None, CreateOptions::new(name).unwrap())
            .unwrap();
    }

    // Hold cnt-a's write lock while starting cnt-b; the start must not be
    // blocked by the unrelated lock.
    let guard = containers.container_write_lock(&cid("cnt-a")).unwrap();
    let started = std::thread::scope(|scope| {
        let containers = containers.clone();
        scope
            .spawn(move || containers.start_container(&cid("cnt-b"), None))
            .join()
            .unwrap()
    });
    drop(guard);
    started.unwrap();
    dispatcher.drain();
}

#[test]
fn snapshot_survives_later_mutation() {
    let (containers, _profiles, dispatcher) = services();
    containers
        .create_container(None, CreateOptions::new("cnt-a").unwrap())
        .unwrap();
    let before = containers.container(&cid("cnt-a")).unwrap();

    containers.start_container(&cid("cnt-a"), None).unwrap();
    containers
        .add_profiles(&cid("cnt-a"), &BTreeSet::from([pid("web")]), None)
        .unwrap();

    assert!(before.version.is_none());
    assert!(before.profiles.is_empty());
    dispatcher.drain();
}
