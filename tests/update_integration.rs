//! ---
//! corral_section: "05-testing-qa-runbook"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Profile update propagation scenarios."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use std::collections::BTreeSet;

use corral_common::{ContainerId, ProfileId};
use corral_events::{FleetListener, ProvisioningEvent, ProvisioningStatus};
use corral_registry::ProfileItem;
use corral_service::{ConfigStore, CreateOptions};
use corral_tests::{default_profile, default_version, started_runtime};
use parking_lot::Mutex;

fn cid(name: &str) -> ContainerId {
    ContainerId::new(name).unwrap()
}

fn item(pid: &str, key: &str, value: &str) -> ProfileItem {
    let mut properties = BTreeMap::new();
    properties.insert(key.to_owned(), value.to_owned());
    ProfileItem::new(pid, properties)
}

/// Records provisioning events per container, in delivery order.
#[derive(Default)]
struct PerContainerRecorder {
    seen: Mutex<BTreeMap<String, Vec<ProvisioningStatus>>>,
}

impl FleetListener for PerContainerRecorder {
    fn on_provisioning(&self, event: &ProvisioningEvent) -> anyhow::Result<()> {
        self.seen
            .lock()
            .entry(event.container.to_string())
            .or_default()
            .push(event.status);
        Ok(())
    }
}

#[test]
fn profile_update_reprovisions_every_running_container() {
    let (runtime, store) = started_runtime();
    {
        let containers = runtime.container_service().unwrap();
        for name in ["cnt-a", "cnt-b"] {
            containers
                .create_container(None, CreateOptions::new(name).unwrap())
                .unwrap();
            containers.start_container(&cid(name), None).unwrap();
        }
    }
    runtime.dispatcher().drain();

    let recorder = Arc::new(PerContainerRecorder::default());
    let subscription = runtime
        .dispatcher()
        .subscribe(recorder.clone() as Arc<dyn FleetListener>);

    {
        let profiles = runtime.profile_service().unwrap();
        let mut seed = profiles
            .copy_profile(&default_version(), &default_profile())
            .unwrap();
        seed.items.clear();
        seed.items.insert(
            "corral.base".to_owned(),
            item("corral.base", "heartbeat", "1s"),
        );
        profiles.update_profile(&seed, None).unwrap();
    }
    runtime.dispatcher().drain();

    // Both containers received a full unprovision+reprovision cycle,
    // independently ordered per container.
    let seen = recorder.seen.lock().clone();
    for name in ["cnt-a", "cnt-b"] {
        let cycle = seen.get(name).unwrap_or_else(|| {
            panic!("container {name} received no propagation events: {seen:?}")
        });
        assert_eq!(
            cycle,
            &vec![
                ProvisioningStatus::Removing,
                ProvisioningStatus::Removed,
                ProvisioningStatus::Provisioning,
                ProvisioningStatus::Provisioned,
            ],
            "unexpected cycle for {name}: {cycle:?}"
        );
    }

    // The updated content is what provisioning wrote back to the store.
    let applied = store.properties("corral.base").unwrap().unwrap();
    assert_eq!(applied.get("heartbeat").map(String::as_str), Some("1s"));

    // And the stored profile reads back with the updated item set.
    {
        let profiles = runtime.profile_service().unwrap();
        let profile = profiles
            .profile(&default_version(), &default_profile())
            .unwrap();
        assert_eq!(
            profile.items["corral.base"]
                .properties()
                .get("heartbeat")
                .map(String::as_str),
            Some("1s")
        );
    }

    runtime.dispatcher().unsubscribe(subscription);
    runtime.stop().unwrap();
}

#[test]
fn effective_profile_merges_parent_items_for_provisioning() {
    let (runtime, store) = started_runtime();
    {
        let profiles = runtime.profile_service().unwrap();
        let mut seed = profiles
            .copy_profile(&default_version(), &default_profile())
            .unwrap();
        seed.items.insert(
            "corral.base".to_owned(),
            item("corral.base", "heartbeat", "5s"),
        );
        profiles.update_profile(&seed, None).unwrap();
        profiles
            .add_profile(
                &default_version(),
                ProfileId::new("web").unwrap(),
                vec![default_profile()],
                vec![item("corral.web", "port", "8080")],
            )
            .unwrap();

        let effective = profiles
            .effective_profile(&default_version(), &ProfileId::new("web").unwrap())
            .unwrap();
        assert!(effective.items.contains_key("corral.base"));
        assert!(effective.items.contains_key("corral.web"));
    }

    {
        let containers = runtime.container_service().unwrap();
        containers
            .create_container(None, CreateOptions::new("cnt-a").unwrap())
            .unwrap();
        containers.start_container(&cid("cnt-a"), None).unwrap();
        let wanted: BTreeSet<ProfileId> = [ProfileId::new("web").unwrap()].into_iter().collect();
        containers
            .add_profiles(&cid("cnt-a"), &wanted, None)
            .unwrap();
    }
    runtime.dispatcher().drain();

    // Provisioning `web` applied the inherited base item too.
    assert!(store.properties("corral.web").unwrap().is_some());
    assert!(store.properties("corral.base").unwrap().is_some());

    runtime.stop().unwrap();
}
