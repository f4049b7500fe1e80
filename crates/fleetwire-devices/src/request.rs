//! Decoded device requests.
//!
//! Protocol decoders turn raw transport payloads into a
//! [`DecodedDeviceRequest`]; this is the only input the inbound processing
//! strategy accepts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetwire_core::model::{Alert, CommandResponse, Location, Measurements, StateChange};

/// Kinds of inbound requests, used as dispatch keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Registration,
    Mapping,
    Measurements,
    Location,
    Alert,
    StateChange,
    CommandResponse,
    Stream,
    StreamData,
    SendStreamData,
}

impl RequestKind {
    pub const ALL: [RequestKind; 10] = [
        RequestKind::Registration,
        RequestKind::Mapping,
        RequestKind::Measurements,
        RequestKind::Location,
        RequestKind::Alert,
        RequestKind::StateChange,
        RequestKind::CommandResponse,
        RequestKind::Stream,
        RequestKind::StreamData,
        RequestKind::SendStreamData,
    ];

    /// Onboarding kinds handled by the registration manager.
    pub fn is_onboarding(&self) -> bool {
        matches!(self, Self::Registration | Self::Mapping)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Device-asserted registration data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationRequest {
    pub specification_token: String,
    /// Explicit site; auto-assignment applies when absent
    #[serde(default)]
    pub site_token: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Whether a mapping request attaches or detaches a component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum MappingAction {
    #[default]
    Create,
    Delete,
}

/// Attach or detach a component device in a slot of the originating
/// (composite) device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceMappingRequest {
    /// Hardware id of the component device
    pub hardware_id: String,
    pub schema_path: String,
    #[serde(default)]
    pub action: MappingAction,
}

/// Telemetry payload with its optional event date and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRequest<T> {
    pub data: T,
    /// When the event happened on the device; defaults to the receive time
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl<T> EventRequest<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            event_date: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_event_date(mut self, event_date: DateTime<Utc>) -> Self {
        self.event_date = Some(event_date);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamCreateRequest {
    pub stream_id: String,
    pub content_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamDataRequest {
    pub stream_id: String,
    pub sequence_number: u64,
    pub data: Vec<u8>,
}

/// Ask the platform to send a stored chunk back to the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendStreamDataRequest {
    pub stream_id: String,
    pub sequence_number: u64,
}

/// Request body, one variant per [`RequestKind`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DeviceRequest {
    Registration(RegistrationRequest),
    Mapping(DeviceMappingRequest),
    Measurements(EventRequest<Measurements>),
    Location(EventRequest<Location>),
    Alert(EventRequest<Alert>),
    StateChange(EventRequest<StateChange>),
    CommandResponse(EventRequest<CommandResponse>),
    Stream(StreamCreateRequest),
    StreamData(StreamDataRequest),
    SendStreamData(SendStreamDataRequest),
}

impl DeviceRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Registration(_) => RequestKind::Registration,
            Self::Mapping(_) => RequestKind::Mapping,
            Self::Measurements(_) => RequestKind::Measurements,
            Self::Location(_) => RequestKind::Location,
            Self::Alert(_) => RequestKind::Alert,
            Self::StateChange(_) => RequestKind::StateChange,
            Self::CommandResponse(_) => RequestKind::CommandResponse,
            Self::Stream(_) => RequestKind::Stream,
            Self::StreamData(_) => RequestKind::StreamData,
            Self::SendStreamData(_) => RequestKind::SendStreamData,
        }
    }
}

/// Protocol-independent representation of an inbound device message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodedDeviceRequest {
    /// Hardware id of the device that sent the message
    pub hardware_id: String,
    /// Transport-specific id of the originating message, if any
    #[serde(default)]
    pub originator: Option<String>,
    pub request: DeviceRequest,
}

impl DecodedDeviceRequest {
    pub fn new(hardware_id: impl Into<String>, request: DeviceRequest) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            originator: None,
            request,
        }
    }

    pub fn registration(
        hardware_id: impl Into<String>,
        specification_token: impl Into<String>,
        site_token: Option<String>,
    ) -> Self {
        Self::new(
            hardware_id,
            DeviceRequest::Registration(RegistrationRequest {
                specification_token: specification_token.into(),
                site_token,
                metadata: HashMap::new(),
            }),
        )
    }

    /// Attach `component` into `schema_path` of the composite `hardware_id`.
    pub fn mapping(
        hardware_id: impl Into<String>,
        component: impl Into<String>,
        schema_path: impl Into<String>,
    ) -> Self {
        Self::new(
            hardware_id,
            DeviceRequest::Mapping(DeviceMappingRequest {
                hardware_id: component.into(),
                schema_path: schema_path.into(),
                action: MappingAction::Create,
            }),
        )
    }

    pub fn measurements<I, K>(hardware_id: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let values = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::new(
            hardware_id,
            DeviceRequest::Measurements(EventRequest::new(Measurements { values })),
        )
    }

    pub fn kind(&self) -> RequestKind {
        self.request.kind()
    }
}
