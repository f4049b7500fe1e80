//! Unified error handling for fleetwire.
//!
//! Every fallible operation in the workspace returns [`Result`]. Errors raised by
//! synchronous API calls carry a stable [`ErrorCode`] so callers can branch on
//! the failure without parsing messages.

use serde::{Deserialize, Serialize};

/// Stable error codes attached to validation, conflict and reference errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A required field was missing from a request.
    IncompleteData,
    /// Associated assignment without asset module id or asset id.
    InvalidAssetReferenceId,
    /// Device already has an active assignment.
    DeviceAlreadyAssigned,
    /// Composite device already has a mapping for the schema path.
    DeviceElementMappingExists,
    /// Component device is already mapped under another parent.
    DeviceParentMappingExists,
    /// No mapping exists for the schema path.
    DeviceElementMappingDoesNotExist,
    /// Schema path does not resolve against the specification schema.
    InvalidDeviceElementSchemaPath,
    /// Hardware id of an existing device can not be changed.
    DeviceHardwareIdCanNotBeChanged,
    /// Site of an assigned device can not be changed.
    DeviceSiteCanNotBeChangedIfAssigned,
    DuplicateHardwareId,
    /// Command with the same name and namespace already exists.
    DuplicateCommand,
    DuplicateSiteToken,
    DuplicateSpecificationToken,
    DuplicateStreamId,
    DuplicateAssignmentToken,
    InvalidHardwareId,
    InvalidSiteToken,
    InvalidSpecificationToken,
    InvalidDeviceAssignmentToken,
    InvalidCommandToken,
    InvalidStreamId,
    /// Device has no current assignment.
    DeviceNotAssigned,
    /// Requested assignment status change is not allowed.
    InvalidAssignmentStatusTransition,
}

impl ErrorCode {
    /// Get the code as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncompleteData => "IncompleteData",
            Self::InvalidAssetReferenceId => "InvalidAssetReferenceId",
            Self::DeviceAlreadyAssigned => "DeviceAlreadyAssigned",
            Self::DeviceElementMappingExists => "DeviceElementMappingExists",
            Self::DeviceParentMappingExists => "DeviceParentMappingExists",
            Self::DeviceElementMappingDoesNotExist => "DeviceElementMappingDoesNotExist",
            Self::InvalidDeviceElementSchemaPath => "InvalidDeviceElementSchemaPath",
            Self::DeviceHardwareIdCanNotBeChanged => "DeviceHardwareIdCanNotBeChanged",
            Self::DeviceSiteCanNotBeChangedIfAssigned => "DeviceSiteCanNotBeChangedIfAssigned",
            Self::DuplicateHardwareId => "DuplicateHardwareId",
            Self::DuplicateCommand => "DuplicateCommand",
            Self::DuplicateSiteToken => "DuplicateSiteToken",
            Self::DuplicateSpecificationToken => "DuplicateSpecificationToken",
            Self::DuplicateStreamId => "DuplicateStreamId",
            Self::DuplicateAssignmentToken => "DuplicateAssignmentToken",
            Self::InvalidHardwareId => "InvalidHardwareId",
            Self::InvalidSiteToken => "InvalidSiteToken",
            Self::InvalidSpecificationToken => "InvalidSpecificationToken",
            Self::InvalidDeviceAssignmentToken => "InvalidDeviceAssignmentToken",
            Self::InvalidCommandToken => "InvalidCommandToken",
            Self::InvalidStreamId => "InvalidStreamId",
            Self::DeviceNotAssigned => "DeviceNotAssigned",
            Self::InvalidAssignmentStatusTransition => "InvalidAssignmentStatusTransition",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for fleetwire.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Missing or invalid required field, rejected before any mutation.
    #[error("Validation error [{code}]: {message}")]
    Validation { code: ErrorCode, message: String },

    /// Duplicate assignment, mapping, command or record.
    #[error("Conflict [{code}]: {message}")]
    Conflict { code: ErrorCode, message: String },

    /// Unknown hardware id, site, specification, assignment or command.
    #[error("Reference error [{code}]: {message}")]
    Reference { code: ErrorCode, message: String },

    /// Enqueue cancelled or downstream delivery failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Failure while running a dequeued request through its handler.
    #[error("Processing error: {0}")]
    Processing(String),

    /// Storage/database errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn reference(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Reference {
            code,
            message: message.into(),
        }
    }

    /// Stable code for validation, conflict and reference errors.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Validation { code, .. }
            | Self::Conflict { code, .. }
            | Self::Reference { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check whether this error carries the given code.
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_exposed() {
        let err = Error::conflict(ErrorCode::DeviceAlreadyAssigned, "device dev-1 is assigned");
        assert_eq!(err.code(), Some(ErrorCode::DeviceAlreadyAssigned));
        assert!(err.has_code(ErrorCode::DeviceAlreadyAssigned));
        assert!(err.to_string().contains("DeviceAlreadyAssigned"));
    }

    #[test]
    fn test_transport_has_no_code() {
        let err = Error::Transport("queue closed".to_string());
        assert!(err.code().is_none());
        assert_eq!(err.to_string(), "Transport error: queue closed");
    }
}
