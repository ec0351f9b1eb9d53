//! ---
//! corral_section: "02-events-messaging"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Typed lifecycle events and asynchronous dispatch."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Typed event families and the asynchronous event dispatcher.
//!
//! Provisioning, profile, and component lifecycle events are fanned out to a
//! dynamic set of subscribers on a bounded worker pool. Delivery to one
//! listener preserves submission order; distinct listeners are unordered
//! relative to each other.

pub mod dispatcher;
pub mod events;

pub use dispatcher::{EventDispatcher, SubscriptionId};
pub use events::{
    Component, ComponentEvent, ComponentStatus, Event, FleetListener, ProfileEvent,
    ProfileEventStatus, ProvisioningEvent, ProvisioningStatus,
};
