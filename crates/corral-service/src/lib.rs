//! ---
//! corral_section: "04-provisioning-orchestration"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Orchestration services coupling containers, profiles, and provisioning."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
//! Orchestration layer of the Corral fleet manager.
//!
//! The container service is the only writer of container state and the
//! profile service the only writer of profile state; both work through the
//! registries' timed locks and announce changes via the event dispatcher.
//! Access to either service goes through a permit manager so in-flight
//! operations are protected from concurrent reconfiguration.

pub mod configstore;
pub mod containers;
pub mod error;
pub mod permit;
pub mod profiles;
pub mod runtime;

pub use configstore::{ConfigStore, MemoryConfigStore, INTERNAL_KEY_PREFIX};
pub use containers::{ContainerService, CreateOptions, TOKEN_ATTRIBUTE};
pub use error::{CoreError, Result};
pub use permit::{Permit, PermitError, PermitManager};
pub use profiles::ProfileService;
pub use runtime::FleetRuntime;
