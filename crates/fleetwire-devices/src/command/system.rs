//! System commands sent back to devices by the platform itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fleetwire_core::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegistrationAckReason {
    NewRegistration,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegistrationFailureReason {
    NewDevicesNotAllowed,
    InvalidSpecificationToken,
    SiteTokenRequired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceMappingResult {
    MappingCreated,
    MappingDeleted,
    /// Slot already occupied or component already has a parent
    MappingFailedDueToExisting,
    MappingFailed,
}

/// Command generated by the platform rather than by a specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SystemCommand {
    RegistrationAck {
        reason: RegistrationAckReason,
    },
    RegistrationFailure {
        reason: RegistrationFailureReason,
        message: String,
    },
    DeviceMappingAck {
        result: DeviceMappingResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    SendDeviceStreamData {
        stream_id: String,
        sequence_number: u64,
        data: Vec<u8>,
    },
}

impl SystemCommand {
    pub fn registration_failure(
        reason: RegistrationFailureReason,
        message: impl Into<String>,
    ) -> Self {
        Self::RegistrationFailure {
            reason,
            message: message.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RegistrationAck { .. } => "RegistrationAck",
            Self::RegistrationFailure { .. } => "RegistrationFailure",
            Self::DeviceMappingAck { .. } => "DeviceMappingAck",
            Self::SendDeviceStreamData { .. } => "SendDeviceStreamData",
        }
    }
}

/// Delivers system commands to a device by hardware id.
#[async_trait]
pub trait SystemCommandDelivery: Send + Sync {
    async fn deliver_system_command(&self, hardware_id: &str, command: SystemCommand)
        -> Result<()>;
}
