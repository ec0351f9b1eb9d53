//! ---
//! corral_section: "02-events-messaging"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Typed lifecycle events and asynchronous dispatch."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use anyhow::Result;
use chrono::{DateTime, Utc};
use corral_common::{ContainerId, ProfileId, VersionId};
use corral_registry::Profile;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phases of the provisioning protocol for one container/profile pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    /// Configuration application has started.
    Provisioning,
    /// Configuration was applied and the association recorded.
    Provisioned,
    /// The association is being removed.
    Removing,
    /// The association was removed.
    Removed,
    /// Configuration application failed.
    Error,
}

/// Event emitted while provisioning or unprovisioning a profile on a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningEvent {
    /// Event identifier for deduplication and tracing.
    pub id: Uuid,
    /// Protocol phase.
    pub status: ProvisioningStatus,
    /// Container being (un)provisioned.
    pub container: ContainerId,
    /// Profile being applied or removed.
    pub profile: ProfileId,
    /// Profile version the profile was resolved against.
    pub version: VersionId,
    /// Failure cause, present for [`ProvisioningStatus::Error`].
    #[serde(default)]
    pub error: Option<String>,
    /// Timestamp when the event was created.
    pub timestamp: DateTime<Utc>,
}

impl ProvisioningEvent {
    /// Construct a provisioning event for the given protocol phase.
    pub fn new(
        status: ProvisioningStatus,
        container: ContainerId,
        profile: ProfileId,
        version: VersionId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status,
            container,
            profile,
            version,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Construct an error event carrying the failure cause.
    pub fn error(
        container: ContainerId,
        profile: ProfileId,
        version: VersionId,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: ProvisioningStatus::Error,
            container,
            profile,
            version,
            error: Some(cause.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of a profile mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileEventStatus {
    /// The profile's item set was replaced.
    Updated,
    /// The mutation failed.
    Error,
}

/// Event emitted when a profile is mutated through the profile service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEvent {
    /// Event identifier for deduplication and tracing.
    pub id: Uuid,
    /// Mutation outcome.
    pub status: ProfileEventStatus,
    /// Point-in-time snapshot of the profile the event refers to.
    pub profile: Profile,
    /// Failure cause, present for [`ProfileEventStatus::Error`].
    #[serde(default)]
    pub error: Option<String>,
    /// Timestamp when the event was created.
    pub timestamp: DateTime<Utc>,
}

impl ProfileEvent {
    /// Construct an `UPDATED` event around the given snapshot.
    pub fn updated(profile: Profile) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: ProfileEventStatus::Updated,
            profile,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Construct an `ERROR` event around the given snapshot.
    pub fn error(profile: Profile, cause: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: ProfileEventStatus::Error,
            profile,
            error: Some(cause.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Components participating in the runtime lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// The container orchestration service.
    ContainerService,
    /// The profile service.
    ProfileService,
    /// The event dispatcher itself.
    Dispatcher,
}

/// Lifecycle status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// The component became available.
    Activated,
    /// The component was taken out of service.
    Deactivated,
    /// The component failed.
    Error,
}

/// Event emitted on component activation/deactivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEvent {
    /// Event identifier for deduplication and tracing.
    pub id: Uuid,
    /// Lifecycle status.
    pub status: ComponentStatus,
    /// Component the event refers to.
    pub component: Component,
    /// Failure cause, present for [`ComponentStatus::Error`].
    #[serde(default)]
    pub error: Option<String>,
    /// Timestamp when the event was created.
    pub timestamp: DateTime<Utc>,
}

impl ComponentEvent {
    /// Construct a component lifecycle event.
    pub fn new(status: ComponentStatus, component: Component) -> Self {
        Self {
            id: Uuid::new_v4(),
            status,
            component,
            error: None,
            timestamp: Utc::now(),
        }
    }
}

/// Envelope carried through the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Provisioning protocol event.
    Provisioning(ProvisioningEvent),
    /// Profile mutation event.
    Profile(ProfileEvent),
    /// Component lifecycle event.
    Component(ComponentEvent),
}

impl Event {
    /// The event family as a static string, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Provisioning(_) => "provisioning",
            Event::Profile(_) => "profile",
            Event::Component(_) => "component",
        }
    }
}

impl From<ProvisioningEvent> for Event {
    fn from(event: ProvisioningEvent) -> Self {
        Event::Provisioning(event)
    }
}

impl From<ProfileEvent> for Event {
    fn from(event: ProfileEvent) -> Self {
        Event::Profile(event)
    }
}

impl From<ComponentEvent> for Event {
    fn from(event: ComponentEvent) -> Self {
        Event::Component(event)
    }
}

/// Receiver for fleet events.
///
/// Implementations must be cheap to call; delivery happens on the dispatcher
/// pool. A returned error is logged by the dispatcher and never propagated to
/// the publisher or other listeners.
pub trait FleetListener: Send + Sync {
    /// Called for every provisioning protocol event.
    fn on_provisioning(&self, _event: &ProvisioningEvent) -> Result<()> {
        Ok(())
    }

    /// Called for every profile mutation event.
    fn on_profile(&self, _event: &ProfileEvent) -> Result<()> {
        Ok(())
    }

    /// Called for every component lifecycle event.
    fn on_component(&self, _event: &ComponentEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> ProvisioningEvent {
        ProvisioningEvent::new(
            ProvisioningStatus::Provisioned,
            ContainerId::new("cnt-a").unwrap(),
            ProfileId::new("default").unwrap(),
            VersionId::new("1.0").unwrap(),
        )
    }

    #[test]
    fn envelope_json_round_trip() {
        let event = Event::from(sample_event());
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
        assert_eq!(event.kind(), "provisioning");
    }

    #[test]
    fn error_event_carries_cause() {
        let event = ProvisioningEvent::error(
            ContainerId::new("cnt-a").unwrap(),
            ProfileId::new("default").unwrap(),
            VersionId::new("1.0").unwrap(),
            "store rejected update",
        );
        assert_eq!(event.status, ProvisioningStatus::Error);
        assert_eq!(event.error.as_deref(), Some("store rejected update"));
    }
}
