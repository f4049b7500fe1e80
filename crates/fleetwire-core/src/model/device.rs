//! Devices and their element mappings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status indicator for a device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum DeviceStatus {
    #[default]
    Ok,
    HardwareFailure,
    Unavailable,
}

/// Records which component device occupies a named slot of a composite device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceElementMapping {
    /// Hardware id of the nested (component) device
    pub hardware_id: String,
    /// Path of the slot in the parent's element schema
    pub schema_path: String,
}

impl DeviceElementMapping {
    pub fn new(hardware_id: impl Into<String>, schema_path: impl Into<String>) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            schema_path: schema_path.into(),
        }
    }
}

/// A physical device known to the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    /// Stable natural key supplied by the device
    pub hardware_id: String,
    pub specification_token: String,
    pub site_token: String,
    /// Set when the device is nested under a composite device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hardware_id: Option<String>,
    /// Token of the current assignment; `None` iff unassigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_token: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub comments: Option<String>,
    /// Ordered element mappings (composite devices only)
    #[serde(default)]
    pub device_element_mappings: Vec<DeviceElementMapping>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub updated_date: Option<DateTime<Utc>>,
    /// Soft-delete marker
    #[serde(default)]
    pub deleted: bool,
}

impl Device {
    /// Stand-in record for a device that is not registered, so replies such
    /// as registration failures can still be addressed to it.
    pub fn unregistered(hardware_id: impl Into<String>) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            specification_token: String::new(),
            site_token: String::new(),
            parent_hardware_id: None,
            assignment_token: None,
            status: DeviceStatus::default(),
            comments: None,
            device_element_mappings: Vec::new(),
            metadata: HashMap::new(),
            created_date: Utc::now(),
            updated_date: None,
            deleted: false,
        }
    }

    /// Whether the device currently has an assignment.
    pub fn is_assigned(&self) -> bool {
        self.assignment_token.is_some()
    }

    /// Find the mapping occupying `schema_path`, if any.
    pub fn mapping_for_path(&self, schema_path: &str) -> Option<&DeviceElementMapping> {
        self.device_element_mappings
            .iter()
            .find(|m| m.schema_path == schema_path)
    }
}

/// Request used both to create a device and to update one.
///
/// On update only the fields that are set override the stored values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceCreateRequest {
    pub hardware_id: Option<String>,
    pub specification_token: Option<String>,
    pub site_token: Option<String>,
    pub parent_hardware_id: Option<String>,
    /// Clear the parent reference (applied before `parent_hardware_id`)
    pub remove_parent_hardware_id: bool,
    pub device_element_mappings: Option<Vec<DeviceElementMapping>>,
    pub comments: Option<String>,
    pub status: Option<DeviceStatus>,
    pub metadata: Option<HashMap<String, String>>,
}

impl DeviceCreateRequest {
    /// Request for creating a device with the required fields set.
    pub fn new(
        hardware_id: impl Into<String>,
        specification_token: impl Into<String>,
        site_token: impl Into<String>,
    ) -> Self {
        Self {
            hardware_id: Some(hardware_id.into()),
            specification_token: Some(specification_token.into()),
            site_token: Some(site_token.into()),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }
}
