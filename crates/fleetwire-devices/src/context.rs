//! Shared handles passed to every component of the communication subsystem.

use std::sync::Arc;

use fleetwire_core::config::FleetwireConfig;
use fleetwire_core::{DeviceEventManagement, DeviceManagement};
use fleetwire_storage::AssignmentCache;

use crate::assignment::AssignmentLifecycle;
use crate::command::{
    router_from_config, CommandRouter, CommandTargetResolver, DefaultCommandTargetResolver,
    NoOpCommandRouter, OutboundCommandProcessor, SystemCommandDelivery,
};
use crate::mapping::DeviceElementMappings;

/// Store handles, lifecycle services and the outbound command path.
pub struct CommunicationContext {
    pub device_management: Arc<dyn DeviceManagement>,
    pub device_events: Arc<dyn DeviceEventManagement>,
    pub assignments: Arc<AssignmentLifecycle>,
    pub mappings: Arc<DeviceElementMappings>,
    pub router: Arc<dyn CommandRouter>,
    pub resolver: Arc<dyn CommandTargetResolver>,
    pub outbound: Arc<OutboundCommandProcessor>,
    /// Where acknowledgements and other system commands go
    pub system_commands: Arc<dyn SystemCommandDelivery>,
}

impl CommunicationContext {
    pub fn builder(
        device_management: Arc<dyn DeviceManagement>,
        device_events: Arc<dyn DeviceEventManagement>,
    ) -> CommunicationContextBuilder {
        CommunicationContextBuilder {
            device_management,
            device_events,
            cache: None,
            router: None,
            resolver: None,
            system_commands: None,
        }
    }
}

pub struct CommunicationContextBuilder {
    device_management: Arc<dyn DeviceManagement>,
    device_events: Arc<dyn DeviceEventManagement>,
    cache: Option<Arc<AssignmentCache>>,
    router: Option<Arc<dyn CommandRouter>>,
    resolver: Option<Arc<dyn CommandTargetResolver>>,
    system_commands: Option<Arc<dyn SystemCommandDelivery>>,
}

impl CommunicationContextBuilder {
    /// Apply the routing and cache settings from `config`.
    pub fn with_config(mut self, config: &FleetwireConfig) -> Self {
        self.router = Some(router_from_config(&config.routing));
        self.cache = AssignmentCache::new(config.storage.assignment_cache_capacity as usize)
            .map(Arc::new);
        self
    }

    pub fn with_cache(mut self, cache: Arc<AssignmentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn CommandRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CommandTargetResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Override system command delivery (defaults to the outbound router).
    pub fn with_system_commands(mut self, delivery: Arc<dyn SystemCommandDelivery>) -> Self {
        self.system_commands = Some(delivery);
        self
    }

    pub fn build(self) -> Arc<CommunicationContext> {
        let mut lifecycle = AssignmentLifecycle::new(self.device_management.clone());
        if let Some(cache) = self.cache {
            lifecycle = lifecycle.with_cache(cache);
        }
        let assignments = Arc::new(lifecycle);

        let router = self
            .router
            .unwrap_or_else(|| Arc::new(NoOpCommandRouter));
        let resolver = self.resolver.unwrap_or_else(|| {
            Arc::new(DefaultCommandTargetResolver::new(assignments.clone()))
        });
        let outbound = Arc::new(OutboundCommandProcessor::new(
            self.device_management.clone(),
            assignments.clone(),
            resolver.clone(),
            router.clone(),
        ));
        let system_commands = self
            .system_commands
            .unwrap_or_else(|| outbound.clone());

        Arc::new(CommunicationContext {
            mappings: Arc::new(DeviceElementMappings::new(self.device_management.clone())),
            device_management: self.device_management,
            device_events: self.device_events,
            assignments,
            router,
            resolver,
            outbound,
            system_commands,
        })
    }
}
