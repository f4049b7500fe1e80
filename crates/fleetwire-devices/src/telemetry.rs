//! Telemetry handler: stores events and stream data against the sending
//! device's current assignment.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use fleetwire_core::error::{Error, ErrorCode, Result};
use fleetwire_core::model::{
    DeviceAssignment, DeviceEvent, DeviceEventPayload, DeviceStream, DeviceStreamData,
};

use crate::command::SystemCommand;
use crate::context::CommunicationContext;
use crate::dispatch::InboundRequestHandler;
use crate::request::{
    DecodedDeviceRequest, DeviceRequest, EventRequest, SendStreamDataRequest, StreamCreateRequest,
    StreamDataRequest,
};

/// Handles every non-onboarding request kind.
pub struct TelemetryHandler {
    context: Arc<CommunicationContext>,
}

impl TelemetryHandler {
    pub fn new(context: Arc<CommunicationContext>) -> Self {
        Self { context }
    }

    /// Current assignment of the sending device.
    fn current_assignment(&self, hardware_id: &str) -> Result<DeviceAssignment> {
        self.context
            .assignments
            .get_current_assignment(hardware_id)?
            .ok_or_else(|| {
                Error::reference(
                    ErrorCode::DeviceNotAssigned,
                    format!("device {} has no current assignment", hardware_id),
                )
            })
    }

    fn record_event<T>(
        &self,
        hardware_id: &str,
        request: &EventRequest<T>,
        payload: impl FnOnce(&T) -> DeviceEventPayload,
    ) -> Result<DeviceEvent> {
        let assignment = self.current_assignment(hardware_id)?;
        let received_date = Utc::now();
        let event = DeviceEvent {
            id: uuid::Uuid::new_v4().to_string(),
            hardware_id: hardware_id.to_string(),
            assignment_token: assignment.token.clone(),
            site_token: assignment.site_token.clone(),
            asset: assignment.asset.clone(),
            event_date: request.event_date.unwrap_or(received_date),
            received_date,
            payload: payload(&request.data),
            metadata: request.metadata.clone(),
        };

        let stored = self.context.device_events.add_device_event(event)?;
        self.context.assignments.record_device_event(&stored)?;
        tracing::debug!(
            hardware_id = %hardware_id,
            assignment = %stored.assignment_token,
            event_type = stored.payload.type_name(),
            "Stored device event"
        );
        Ok(stored)
    }

    fn create_stream(&self, hardware_id: &str, request: &StreamCreateRequest) -> Result<()> {
        let assignment = self.current_assignment(hardware_id)?;
        let stream = self.context.device_events.create_device_stream(DeviceStream {
            assignment_token: assignment.token,
            stream_id: request.stream_id.clone(),
            content_type: request.content_type.clone(),
            metadata: request.metadata.clone(),
            created_date: Utc::now(),
        })?;
        tracing::info!(
            hardware_id = %hardware_id,
            stream = %stream.stream_id,
            "Created device stream"
        );
        Ok(())
    }

    fn add_stream_data(&self, hardware_id: &str, request: &StreamDataRequest) -> Result<()> {
        let assignment = self.current_assignment(hardware_id)?;
        self.context
            .device_events
            .add_device_stream_data(DeviceStreamData {
                assignment_token: assignment.token,
                stream_id: request.stream_id.clone(),
                sequence_number: request.sequence_number,
                data: request.data.clone(),
                received_date: Utc::now(),
            })?;
        Ok(())
    }

    /// Send a stored chunk back to the device. A missing chunk is sent as
    /// empty data so the device can tell it apart from a lost reply.
    async fn send_stream_data(
        &self,
        hardware_id: &str,
        request: &SendStreamDataRequest,
    ) -> Result<()> {
        let assignment = self.current_assignment(hardware_id)?;
        let data = self
            .context
            .device_events
            .get_device_stream_data(
                &assignment.token,
                &request.stream_id,
                request.sequence_number,
            )?
            .map(|chunk| chunk.data)
            .unwrap_or_default();

        self.context
            .system_commands
            .deliver_system_command(
                hardware_id,
                SystemCommand::SendDeviceStreamData {
                    stream_id: request.stream_id.clone(),
                    sequence_number: request.sequence_number,
                    data,
                },
            )
            .await
    }
}

#[async_trait]
impl InboundRequestHandler for TelemetryHandler {
    async fn handle(&self, request: DecodedDeviceRequest) -> Result<()> {
        let hardware_id = request.hardware_id.as_str();
        match &request.request {
            DeviceRequest::Measurements(r) => self
                .record_event(hardware_id, r, |m| DeviceEventPayload::Measurements(m.clone()))
                .map(|_| ()),
            DeviceRequest::Location(r) => self
                .record_event(hardware_id, r, |l| DeviceEventPayload::Location(*l))
                .map(|_| ()),
            DeviceRequest::Alert(r) => self
                .record_event(hardware_id, r, |a| DeviceEventPayload::Alert(a.clone()))
                .map(|_| ()),
            DeviceRequest::StateChange(r) => self
                .record_event(hardware_id, r, |s| DeviceEventPayload::StateChange(s.clone()))
                .map(|_| ()),
            DeviceRequest::CommandResponse(r) => self
                .record_event(hardware_id, r, |c| {
                    DeviceEventPayload::CommandResponse(c.clone())
                })
                .map(|_| ()),
            DeviceRequest::Stream(r) => self.create_stream(hardware_id, r),
            DeviceRequest::StreamData(r) => self.add_stream_data(hardware_id, r),
            DeviceRequest::SendStreamData(r) => self.send_stream_data(hardware_id, r).await,
            DeviceRequest::Registration(_) | DeviceRequest::Mapping(_) => Err(Error::Processing(
                format!("telemetry handler can not handle {} requests", request.kind()),
            )),
        }
    }
}

