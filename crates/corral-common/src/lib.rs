//! ---
//! corral_section: "01-core-functionality"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Shared primitives and utilities for the fleet runtime."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
//! Core shared primitives for the Corral fleet-manager workspace.
//! This crate exposes the identity model, configuration loading, and
//! logging bootstrap consumed across the workspace.

pub mod config;
pub mod identity;
pub mod logging;

pub use config::{AppConfig, LoadedAppConfig, LoggingConfig};
pub use identity::{ContainerId, IdentityError, ProfileId, VersionId};
pub use logging::{init_tracing, LogFormat};
