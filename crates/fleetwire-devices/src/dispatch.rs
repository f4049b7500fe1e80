//! Dispatch of decoded requests to their handlers by request kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use fleetwire_core::error::{Error, Result};

use crate::request::{DecodedDeviceRequest, RequestKind};

/// Next stage for dequeued requests.
#[async_trait]
pub trait InboundRequestHandler: Send + Sync {
    async fn handle(&self, request: DecodedDeviceRequest) -> Result<()>;
}

/// Table mapping each request kind to the handler that processes it.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<RequestKind, Arc<dyn InboundRequestHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Onboarding kinds go to `registration`, everything else to `telemetry`.
    pub fn standard(
        registration: Arc<dyn InboundRequestHandler>,
        telemetry: Arc<dyn InboundRequestHandler>,
    ) -> Self {
        RequestKind::ALL
            .iter()
            .fold(Self::new(), |table, kind| {
                let handler = if kind.is_onboarding() {
                    registration.clone()
                } else {
                    telemetry.clone()
                };
                table.with_handler(*kind, handler)
            })
    }

    pub fn with_handler(mut self, kind: RequestKind, handler: Arc<dyn InboundRequestHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handler_for(&self, kind: RequestKind) -> Option<&Arc<dyn InboundRequestHandler>> {
        self.handlers.get(&kind)
    }
}

#[async_trait]
impl InboundRequestHandler for DispatchTable {
    async fn handle(&self, request: DecodedDeviceRequest) -> Result<()> {
        let kind = request.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| Error::Processing(format!("no handler registered for {}", kind)))?;
        handler.handle(request).await
    }
}
