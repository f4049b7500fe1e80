//! Device events, command invocations and streams.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assignment::AssetReference;

/// Severity of an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

/// Where an alert was raised.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum AlertSource {
    #[default]
    Device,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Measurements {
    pub values: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    #[serde(default)]
    pub source: AlertSource,
    #[serde(default)]
    pub level: AlertLevel,
    /// Alert type, e.g. `engine.overheat`
    pub alert_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateChange {
    pub category: String,
    pub state_type: String,
    #[serde(default)]
    pub previous_state: Option<String>,
    pub new_state: String,
}

/// Response sent by a device for a previously delivered command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    /// Id of the invocation event being answered
    pub originating_event_id: String,
    #[serde(default)]
    pub response: Option<String>,
}

/// Payload of a stored device event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DeviceEventPayload {
    Measurements(Measurements),
    Location(Location),
    Alert(Alert),
    StateChange(StateChange),
    CommandResponse(CommandResponse),
}

impl DeviceEventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Measurements(_) => "measurements",
            Self::Location(_) => "location",
            Self::Alert(_) => "alert",
            Self::StateChange(_) => "state_change",
            Self::CommandResponse(_) => "command_response",
        }
    }
}

/// Event recorded against a device assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEvent {
    pub id: String,
    pub hardware_id: String,
    pub assignment_token: String,
    pub site_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetReference>,
    /// When the event happened on the device
    pub event_date: DateTime<Utc>,
    /// When the platform received it
    pub received_date: DateTime<Utc>,
    pub payload: DeviceEventPayload,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Request to execute a specification command against an assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceCommandInvocation {
    pub id: String,
    /// Assignment that originated the invocation
    pub assignment_token: String,
    pub command_token: String,
    #[serde(default)]
    pub parameter_values: HashMap<String, String>,
    #[serde(default)]
    pub initiator: Option<String>,
    pub event_date: DateTime<Utc>,
}

impl DeviceCommandInvocation {
    pub fn new(assignment_token: impl Into<String>, command_token: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            assignment_token: assignment_token.into(),
            command_token: command_token.into(),
            parameter_values: HashMap::new(),
            initiator: None,
            event_date: Utc::now(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameter_values.insert(name.into(), value.into());
        self
    }
}

/// Binary stream owned by an assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceStream {
    pub assignment_token: String,
    pub stream_id: String,
    pub content_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_date: DateTime<Utc>,
}

/// One chunk of stream data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceStreamData {
    pub assignment_token: String,
    pub stream_id: String,
    pub sequence_number: u64,
    pub data: Vec<u8>,
    pub received_date: DateTime<Utc>,
}
