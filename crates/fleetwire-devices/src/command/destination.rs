//! Command destinations: encode a payload and hand it to a transport.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use fleetwire_core::error::Result;

use super::target::{CommandPayload, CommandTarget};

/// Id of the built-in logging destination.
pub const LOG_DESTINATION_ID: &str = "log";

/// Protocol-specific delivery endpoint.
#[async_trait]
pub trait CommandDestination: Send + Sync {
    fn destination_id(&self) -> &str;

    async fn deliver_command(&self, payload: &CommandPayload, target: &CommandTarget)
        -> Result<()>;
}

/// Turns a payload into the bytes sent on the wire.
pub trait CommandExecutionEncoder: Send + Sync {
    fn encode(&self, payload: &CommandPayload, target: &CommandTarget) -> Result<Vec<u8>>;
}

/// Sends encoded bytes to the device.
#[async_trait]
pub trait CommandDeliveryProvider: Send + Sync {
    async fn deliver(&self, target: &CommandTarget, encoded: &[u8]) -> Result<()>;
}

#[derive(Serialize)]
struct Envelope<'a> {
    hardware_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    nested_hardware_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nested_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignment_token: Option<&'a str>,
    #[serde(flatten)]
    payload: &'a CommandPayload,
}

/// Encodes payloads as a JSON envelope addressed to the gateway.
#[derive(Debug, Default, Clone)]
pub struct JsonCommandEncoder;

impl CommandExecutionEncoder for JsonCommandEncoder {
    fn encode(&self, payload: &CommandPayload, target: &CommandTarget) -> Result<Vec<u8>> {
        let envelope = Envelope {
            hardware_id: &target.nesting.gateway.hardware_id,
            nested_hardware_id: target.nesting.nested.as_ref().map(|d| d.hardware_id.as_str()),
            nested_path: target.nesting.path.as_deref(),
            assignment_token: target.assignment.as_ref().map(|a| a.token.as_str()),
            payload,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

/// Writes encoded commands to the log instead of a transport.
#[derive(Debug, Default, Clone)]
pub struct LoggingDeliveryProvider;

#[async_trait]
impl CommandDeliveryProvider for LoggingDeliveryProvider {
    async fn deliver(&self, target: &CommandTarget, encoded: &[u8]) -> Result<()> {
        tracing::info!(
            hardware_id = %target.nesting.gateway.hardware_id,
            bytes = encoded.len(),
            payload = %String::from_utf8_lossy(encoded),
            "Delivered command"
        );
        Ok(())
    }
}

/// Destination composed of an encoder and a delivery provider.
pub struct EncodedCommandDestination {
    id: String,
    encoder: Arc<dyn CommandExecutionEncoder>,
    provider: Arc<dyn CommandDeliveryProvider>,
}

impl EncodedCommandDestination {
    pub fn new(
        id: impl Into<String>,
        encoder: Arc<dyn CommandExecutionEncoder>,
        provider: Arc<dyn CommandDeliveryProvider>,
    ) -> Self {
        Self {
            id: id.into(),
            encoder,
            provider,
        }
    }

    /// JSON-encoding destination that logs instead of sending.
    pub fn logging() -> Self {
        Self::new(
            LOG_DESTINATION_ID,
            Arc::new(JsonCommandEncoder),
            Arc::new(LoggingDeliveryProvider),
        )
    }
}

#[async_trait]
impl CommandDestination for EncodedCommandDestination {
    fn destination_id(&self) -> &str {
        &self.id
    }

    async fn deliver_command(
        &self,
        payload: &CommandPayload,
        target: &CommandTarget,
    ) -> Result<()> {
        let encoded = self.encoder.encode(payload, target)?;
        self.provider.deliver(target, &encoded).await
    }
}
