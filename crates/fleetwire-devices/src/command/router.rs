//! Command routers map a target to a named destination.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use fleetwire_core::config::RoutingConfig;
use fleetwire_core::error::{Error, Result};

use super::destination::{CommandDestination, EncodedCommandDestination};
use super::target::{CommandPayload, CommandTarget};

/// Routes commands to destinations.
#[async_trait]
pub trait CommandRouter: Send + Sync {
    async fn route_command(&self, payload: &CommandPayload, target: &CommandTarget) -> Result<()>;
}

/// Router that logs and drops every command.
///
/// Used when no destination is configured.
#[derive(Debug, Default, Clone)]
pub struct NoOpCommandRouter;

#[async_trait]
impl CommandRouter for NoOpCommandRouter {
    async fn route_command(&self, payload: &CommandPayload, target: &CommandTarget) -> Result<()> {
        tracing::warn!(
            hardware_id = %target.hardware_id(),
            "No command router configured, dropping {}",
            payload.description()
        );
        Ok(())
    }
}

/// Routes by specification token, falling back to a default destination.
pub struct SpecificationMappingRouter {
    /// Specification token -> destination id
    mappings: HashMap<String, String>,
    default_destination: Option<String>,
    destinations: HashMap<String, Arc<dyn CommandDestination>>,
}

impl SpecificationMappingRouter {
    pub fn new() -> Self {
        Self {
            mappings: HashMap::new(),
            default_destination: None,
            destinations: HashMap::new(),
        }
    }

    /// Router configured from the `[routing]` section with the built-in
    /// logging destination registered.
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            mappings: config.specification_mappings.clone(),
            default_destination: config.default_destination.clone(),
            destinations: HashMap::new(),
        }
        .with_destination(Arc::new(EncodedCommandDestination::logging()))
    }

    pub fn with_destination(mut self, destination: Arc<dyn CommandDestination>) -> Self {
        self.destinations
            .insert(destination.destination_id().to_string(), destination);
        self
    }

    pub fn with_mapping(
        mut self,
        specification_token: impl Into<String>,
        destination_id: impl Into<String>,
    ) -> Self {
        self.mappings
            .insert(specification_token.into(), destination_id.into());
        self
    }

    pub fn with_default_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.default_destination = Some(destination_id.into());
        self
    }

    /// Destination id for a specification token.
    pub fn destination_for(&self, specification_token: &str) -> Option<&str> {
        self.mappings
            .get(specification_token)
            .or(self.default_destination.as_ref())
            .map(String::as_str)
    }
}

impl Default for SpecificationMappingRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRouter for SpecificationMappingRouter {
    async fn route_command(&self, payload: &CommandPayload, target: &CommandTarget) -> Result<()> {
        let specification = target.specification_token();
        let destination_id = self.destination_for(specification).ok_or_else(|| {
            Error::Transport(format!(
                "no destination mapped for specification {}",
                specification
            ))
        })?;
        let destination = self.destinations.get(destination_id).ok_or_else(|| {
            Error::Transport(format!("unknown command destination '{}'", destination_id))
        })?;

        tracing::debug!(
            hardware_id = %target.hardware_id(),
            destination = %destination_id,
            "Routing {}",
            payload.description()
        );
        destination.deliver_command(payload, target).await
    }
}

/// Build the router described by the `[routing]` section.
///
/// Without any destination configured commands are logged and dropped.
pub fn router_from_config(config: &RoutingConfig) -> Arc<dyn CommandRouter> {
    if config.is_configured() {
        Arc::new(SpecificationMappingRouter::from_config(config))
    } else {
        tracing::warn!("No command destinations configured, using no-op command router");
        Arc::new(NoOpCommandRouter)
    }
}
