//! Device assignments: time-bounded bindings of a device to a site and,
//! optionally, an external asset.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an assignment references an external asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceAssignmentType {
    Associated,
    Unassociated,
}

/// Assignment status.
///
/// Transitions are monotonic: `Active -> {Missing, Released}`,
/// `Missing -> Released`. `Released` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceAssignmentStatus {
    Active,
    Missing,
    Released,
}

impl DeviceAssignmentStatus {
    /// Check whether moving from `self` to `next` is allowed.
    ///
    /// Setting the current status again is always allowed.
    pub fn can_transition_to(&self, next: DeviceAssignmentStatus) -> bool {
        use DeviceAssignmentStatus::*;
        matches!(
            (self, next),
            (Active, _) | (Missing, Missing) | (Missing, Released) | (Released, Released)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released)
    }
}

/// Reference to an asset held by an external asset module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetReference {
    pub asset_module_id: String,
    pub asset_id: String,
}

/// Last known location reported through an assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
}

/// Rolling state derived from events recorded against an assignment.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DeviceAssignmentState {
    pub last_interaction_date: Option<DateTime<Utc>>,
    pub last_location: Option<LocationSnapshot>,
    /// Latest value per measurement name
    pub latest_measurements: HashMap<String, f64>,
    /// Latest alert message per alert type
    pub latest_alerts: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceAssignment {
    pub token: String,
    pub device_hardware_id: String,
    /// Copied from the device when the assignment is created
    pub site_token: String,
    pub assignment_type: DeviceAssignmentType,
    pub status: DeviceAssignmentStatus,
    /// Required iff `assignment_type == Associated`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetReference>,
    pub active_date: DateTime<Utc>,
    #[serde(default)]
    pub released_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: DeviceAssignmentState,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub updated_date: Option<DateTime<Utc>>,
    /// Soft-delete marker
    #[serde(default)]
    pub deleted: bool,
}

impl DeviceAssignment {
    pub fn is_active(&self) -> bool {
        self.status == DeviceAssignmentStatus::Active && !self.deleted
    }
}

/// Request for creating an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAssignmentCreateRequest {
    /// Explicit token; generated when absent
    #[serde(default)]
    pub token: Option<String>,
    pub device_hardware_id: String,
    pub assignment_type: DeviceAssignmentType,
    #[serde(default)]
    pub asset_module_id: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DeviceAssignmentCreateRequest {
    /// Request for an assignment that does not reference an asset.
    pub fn unassociated(device_hardware_id: impl Into<String>) -> Self {
        Self {
            token: None,
            device_hardware_id: device_hardware_id.into(),
            assignment_type: DeviceAssignmentType::Unassociated,
            asset_module_id: None,
            asset_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Request for an assignment bound to an asset.
    pub fn associated(
        device_hardware_id: impl Into<String>,
        asset_module_id: impl Into<String>,
        asset_id: impl Into<String>,
    ) -> Self {
        Self {
            token: None,
            device_hardware_id: device_hardware_id.into(),
            assignment_type: DeviceAssignmentType::Associated,
            asset_module_id: Some(asset_module_id.into()),
            asset_id: Some(asset_id.into()),
            metadata: HashMap::new(),
        }
    }
}

/// Partial update of an assignment. Unset fields keep their stored value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceAssignmentUpdate {
    pub metadata: Option<HashMap<String, String>>,
    pub status: Option<DeviceAssignmentStatus>,
    pub state: Option<DeviceAssignmentState>,
}
