//! ---
//! corral_section: "04-provisioning-orchestration"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Orchestration services coupling containers, profiles, and provisioning."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::sync::Arc;

use corral_common::AppConfig;
use corral_events::{
    Component, ComponentEvent, ComponentStatus, EventDispatcher, SubscriptionId,
};
use corral_registry::{ContainerRegistry, ProfileRegistry};
use parking_lot::Mutex;
use tracing::info;

use crate::configstore::ConfigStore;
use crate::containers::{ContainerService, UpdatePropagator};
use crate::error::Result;
use crate::permit::{Permit, PermitManager};
use crate::profiles::ProfileService;

const CONTAINER_SERVICE: &str = "container-service";
const PROFILE_SERVICE: &str = "profile-service";

/// Wires the registries, services, permit managers, and event dispatcher
/// into one runtime with an ordered lifecycle.
///
/// `start` activates components registries-first, then services, then the
/// dispatcher pool; `stop` reverses the order and drains in-flight events.
/// Both are idempotent.
pub struct FleetRuntime {
    config: AppConfig,
    dispatcher: Arc<EventDispatcher>,
    container_service: Arc<ContainerService>,
    profile_service: Arc<ProfileService>,
    container_permits: Arc<PermitManager<ContainerService>>,
    profile_permits: Arc<PermitManager<ProfileService>>,
    propagator_subscription: Mutex<Option<SubscriptionId>>,
    started: Mutex<bool>,
}

impl FleetRuntime {
    /// Construct the runtime around a configuration store implementation.
    pub fn new(config: AppConfig, store: Arc<dyn ConfigStore>) -> Self {
        let containers = Arc::new(ContainerRegistry::new(config.lock_timeout));
        let profiles = Arc::new(ProfileRegistry::new(config.lock_timeout));
        let dispatcher = Arc::new(EventDispatcher::new(config.dispatcher_workers));
        let container_service = Arc::new(ContainerService::new(
            containers,
            profiles.clone(),
            dispatcher.clone(),
            store,
            config.default_version.clone(),
            config.default_profile.clone(),
        ));
        let profile_service = Arc::new(ProfileService::new(profiles, dispatcher.clone()));
        Self {
            config,
            dispatcher,
            container_service,
            profile_service,
            container_permits: Arc::new(PermitManager::new(CONTAINER_SERVICE)),
            profile_permits: Arc::new(PermitManager::new(PROFILE_SERVICE)),
            propagator_subscription: Mutex::new(None),
            started: Mutex::new(false),
        }
    }

    /// Activate all components. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut started = self.started.lock();
        if *started {
            return Ok(());
        }

        // Registries carry no lifecycle of their own. Services activate
        // before the dispatcher pool spins up; activation events queue and
        // flush once the workers run.
        self.container_permits
            .activate(self.container_service.clone(), self.config.permit_timeout)?;
        self.dispatcher.dispatch(ComponentEvent::new(
            ComponentStatus::Activated,
            Component::ContainerService,
        ));
        self.profile_permits
            .activate(self.profile_service.clone(), self.config.permit_timeout)?;
        self.dispatcher.dispatch(ComponentEvent::new(
            ComponentStatus::Activated,
            Component::ProfileService,
        ));

        let propagator = Arc::new(UpdatePropagator::new(&self.container_service));
        *self.propagator_subscription.lock() = Some(self.dispatcher.subscribe(propagator));

        self.dispatcher.start();
        self.dispatcher.dispatch(ComponentEvent::new(
            ComponentStatus::Activated,
            Component::Dispatcher,
        ));

        *started = true;
        info!("fleet runtime started");
        Ok(())
    }

    /// Deactivate all components in reverse order, draining the dispatcher.
    /// Idempotent.
    pub fn stop(&self) -> Result<()> {
        let mut started = self.started.lock();
        if !*started {
            return Ok(());
        }

        if let Some(subscription) = self.propagator_subscription.lock().take() {
            self.dispatcher.unsubscribe(subscription);
        }

        self.profile_permits.deactivate(self.config.permit_timeout)?;
        self.dispatcher.dispatch(ComponentEvent::new(
            ComponentStatus::Deactivated,
            Component::ProfileService,
        ));
        self.container_permits.deactivate(self.config.permit_timeout)?;
        self.dispatcher.dispatch(ComponentEvent::new(
            ComponentStatus::Deactivated,
            Component::ContainerService,
        ));

        self.dispatcher.dispatch(ComponentEvent::new(
            ComponentStatus::Deactivated,
            Component::Dispatcher,
        ));
        self.dispatcher.stop();

        *started = false;
        info!("fleet runtime stopped");
        Ok(())
    }

    /// Acquire a shared permit for the container service.
    pub fn container_service(&self) -> Result<Permit<ContainerService>> {
        Ok(self.container_permits.acquire(self.config.permit_timeout)?)
    }

    /// Acquire a shared permit for the profile service.
    pub fn profile_service(&self) -> Result<Permit<ProfileService>> {
        Ok(self.profile_permits.acquire(self.config.permit_timeout)?)
    }

    /// Permit manager guarding the container service.
    pub fn container_permits(&self) -> &Arc<PermitManager<ContainerService>> {
        &self.container_permits
    }

    /// Permit manager guarding the profile service.
    pub fn profile_permits(&self) -> &Arc<PermitManager<ProfileService>> {
        &self.profile_permits
    }

    /// The shared event dispatcher, for listener registration.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Effective runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl Drop for FleetRuntime {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
