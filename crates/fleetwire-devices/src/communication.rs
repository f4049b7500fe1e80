//! Device communication subsystem: the registration manager, telemetry
//! handler and inbound processing strategy wired around one context.

use std::sync::Arc;

use fleetwire_core::config::FleetwireConfig;
use fleetwire_core::error::Result;

use crate::context::CommunicationContext;
use crate::dispatch::{DispatchTable, InboundRequestHandler};
use crate::inbound::{InboundMetrics, InboundProcessingStrategy};
use crate::registration::RegistrationManager;
use crate::request::DecodedDeviceRequest;
use crate::telemetry::TelemetryHandler;

pub struct DeviceCommunication {
    context: Arc<CommunicationContext>,
    registration: Arc<RegistrationManager>,
    strategy: InboundProcessingStrategy,
}

impl DeviceCommunication {
    /// Wire the standard dispatch table: onboarding requests go to the
    /// registration manager, everything else to the telemetry handler.
    pub fn new(context: Arc<CommunicationContext>, config: &FleetwireConfig) -> Self {
        let registration = Arc::new(RegistrationManager::new(
            context.clone(),
            config.registration.clone(),
        ));
        let telemetry = Arc::new(TelemetryHandler::new(context.clone()));
        let dispatch = DispatchTable::standard(registration.clone(), telemetry);
        Self::with_handler(context, registration, config, Arc::new(dispatch))
    }

    /// Use a custom next stage behind the inbound queue.
    pub fn with_handler(
        context: Arc<CommunicationContext>,
        registration: Arc<RegistrationManager>,
        config: &FleetwireConfig,
        handler: Arc<dyn InboundRequestHandler>,
    ) -> Self {
        Self {
            strategy: InboundProcessingStrategy::new(config.inbound.clone(), handler),
            context,
            registration,
        }
    }

    pub fn context(&self) -> &Arc<CommunicationContext> {
        &self.context
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        &self.registration
    }

    pub fn strategy(&self) -> &InboundProcessingStrategy {
        &self.strategy
    }

    /// Verify registration settings, then start the worker pool.
    pub fn start(&self) -> Result<()> {
        self.registration.start()?;
        self.strategy.start()
    }

    pub async fn enqueue(&self, request: DecodedDeviceRequest) -> Result<()> {
        self.strategy.enqueue(request).await
    }

    pub fn metrics(&self) -> InboundMetrics {
        self.strategy.metrics()
    }

    pub async fn stop(&self) {
        self.strategy.stop().await;
    }
}
