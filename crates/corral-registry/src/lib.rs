//! ---
//! corral_section: "03-registry-state"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Registry-owned mutable state and immutable snapshots."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
//! Container and profile registries.
//!
//! Registries hold the canonical mutable state structs keyed by identity;
//! everything outside the orchestrating services receives immutable deep-copy
//! snapshots. Each entity is guarded by its own timed read/write lock, so
//! operations on unrelated entities proceed fully concurrently.

pub mod container;
pub mod container_registry;
pub mod error;
pub mod locks;
pub mod profile;
pub mod profile_registry;

pub use container::{Container, ContainerState, Lifecycle};
pub use container_registry::ContainerRegistry;
pub use error::{RegistryError, Result};
pub use locks::{ReadGuard, TimedRwLock, WriteGuard};
pub use profile::{Profile, ProfileItem, ProfileState, ProfileVersion, ProfileVersionState};
pub use profile_registry::ProfileRegistry;
