//! ---
//! corral_section: "04-provisioning-orchestration"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Orchestration services coupling containers, profiles, and provisioning."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use parking_lot::RwLock;
use tracing::debug;

/// Keys carrying store bookkeeping, excluded from idempotence comparison.
pub const INTERNAL_KEY_PREFIX: &str = "corral.internal.";

/// Boundary to the backing configuration admin service.
///
/// Provisioning applies a profile's configuration items through this trait;
/// how configuration is physically persisted is outside the core.
pub trait ConfigStore: Send + Sync {
    /// Create or update the configuration identified by `pid`.
    ///
    /// Idempotent by value: re-applying content identical to what is stored
    /// (ignoring internal metadata keys) is a no-op.
    fn apply(&self, pid: &str, properties: &BTreeMap<String, String>) -> Result<()>;

    /// Current properties for `pid`, or `None` when never applied.
    fn properties(&self, pid: &str) -> Result<Option<BTreeMap<String, String>>>;
}

fn without_internal(properties: &BTreeMap<String, String>) -> BTreeMap<&String, &String> {
    properties
        .iter()
        .filter(|(key, _)| !key.starts_with(INTERNAL_KEY_PREFIX))
        .collect()
}

/// In-memory configuration store used by the daemon and test suites.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All pids that currently hold configuration.
    pub fn pids(&self) -> Vec<String> {
        let mut pids: Vec<String> = self.entries.read().keys().cloned().collect();
        pids.sort();
        pids
    }
}

impl ConfigStore for MemoryConfigStore {
    fn apply(&self, pid: &str, properties: &BTreeMap<String, String>) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(pid) {
            if without_internal(existing) == without_internal(properties) {
                debug!(pid, "configuration unchanged; skipping update");
                return Ok(());
            }
        }
        // Replace caller-visible keys, carrying existing internal keys over.
        let mut next: BTreeMap<String, String> = properties
            .iter()
            .filter(|(key, _)| !key.starts_with(INTERNAL_KEY_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(existing) = entries.get(pid) {
            for (key, value) in existing {
                if key.starts_with(INTERNAL_KEY_PREFIX) {
                    next.insert(key.clone(), value.clone());
                }
            }
        }
        entries.insert(pid.to_owned(), next);
        debug!(pid, "configuration applied");
        Ok(())
    }

    fn properties(&self, pid: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.entries.read().get(pid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn apply_then_read_back() {
        let store = MemoryConfigStore::new();
        store.apply("svc.web", &props(&[("port", "8080")])).unwrap();
        let read = store.properties("svc.web").unwrap().unwrap();
        assert_eq!(read.get("port").map(String::as_str), Some("8080"));
        assert_eq!(store.pids(), vec!["svc.web".to_owned()]);
    }

    #[test]
    fn identical_reapply_ignores_internal_keys() {
        let store = MemoryConfigStore::new();
        store.apply("svc.web", &props(&[("port", "8080")])).unwrap();
        // Same caller-visible content with extra internal metadata is a no-op.
        store
            .apply(
                "svc.web",
                &props(&[("port", "8080"), ("corral.internal.rev", "17")]),
            )
            .unwrap();
        let read = store.properties("svc.web").unwrap().unwrap();
        assert!(!read.contains_key("corral.internal.rev"));
    }

    #[test]
    fn changed_content_replaces_visible_keys() {
        let store = MemoryConfigStore::new();
        store
            .apply("svc.web", &props(&[("port", "8080"), ("host", "a")]))
            .unwrap();
        store.apply("svc.web", &props(&[("port", "9090")])).unwrap();
        let read = store.properties("svc.web").unwrap().unwrap();
        assert_eq!(read.get("port").map(String::as_str), Some("9090"));
        assert!(!read.contains_key("host"));
    }
}
