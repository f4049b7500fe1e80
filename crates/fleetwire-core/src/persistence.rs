//! Store-independent create/update logic.
//!
//! Every store implementation funnels requests through these functions so
//! validation and field handling are identical regardless of backend.

use chrono::Utc;

use crate::error::{Error, ErrorCode, Result};
use crate::model::{
    AssetReference, Device, DeviceAssignment, DeviceAssignmentCreateRequest, DeviceAssignmentState,
    DeviceAssignmentStatus, DeviceAssignmentType, DeviceCommand, DeviceCreateRequest,
    DeviceSpecification, DeviceStatus,
};

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::validation(
            ErrorCode::IncompleteData,
            format!("{} is required", field),
        )),
    }
}

/// Build a new device from a create request.
pub fn device_create_logic(request: &DeviceCreateRequest) -> Result<Device> {
    let hardware_id = required(&request.hardware_id, "hardware_id")?;
    let site_token = required(&request.site_token, "site_token")?;
    let specification_token = required(&request.specification_token, "specification_token")?;

    Ok(Device {
        hardware_id: hardware_id.to_string(),
        specification_token: specification_token.to_string(),
        site_token: site_token.to_string(),
        parent_hardware_id: request.parent_hardware_id.clone(),
        assignment_token: None,
        status: request.status.unwrap_or(DeviceStatus::Ok),
        comments: request.comments.clone(),
        device_element_mappings: request.device_element_mappings.clone().unwrap_or_default(),
        metadata: request.metadata.clone().unwrap_or_default(),
        created_date: Utc::now(),
        updated_date: None,
        deleted: false,
    })
}

/// Apply an update request to an existing device.
///
/// Only fields present in the request override stored values. The device is
/// left untouched when validation fails.
pub fn device_update_logic(request: &DeviceCreateRequest, target: &mut Device) -> Result<()> {
    if let Some(hardware_id) = &request.hardware_id {
        if *hardware_id != target.hardware_id {
            return Err(Error::validation(
                ErrorCode::DeviceHardwareIdCanNotBeChanged,
                format!("hardware id of {} can not be changed", target.hardware_id),
            ));
        }
    }
    if let Some(site_token) = &request.site_token {
        if *site_token != target.site_token && target.is_assigned() {
            return Err(Error::validation(
                ErrorCode::DeviceSiteCanNotBeChangedIfAssigned,
                format!(
                    "site of {} can not be changed while it is assigned",
                    target.hardware_id
                ),
            ));
        }
    }

    if let Some(site_token) = &request.site_token {
        target.site_token = site_token.clone();
    }
    if let Some(specification_token) = &request.specification_token {
        target.specification_token = specification_token.clone();
    }
    if request.remove_parent_hardware_id {
        target.parent_hardware_id = None;
    }
    if let Some(parent) = &request.parent_hardware_id {
        target.parent_hardware_id = Some(parent.clone());
    }
    if let Some(mappings) = &request.device_element_mappings {
        target.device_element_mappings = mappings.clone();
    }
    if let Some(comments) = &request.comments {
        target.comments = Some(comments.clone());
    }
    if let Some(status) = request.status {
        target.status = status;
    }
    if let Some(metadata) = &request.metadata {
        target.metadata = metadata.clone();
    }
    target.updated_date = Some(Utc::now());
    Ok(())
}

/// Build a new Active assignment for `device`.
///
/// Does not check whether the device is already assigned; that check is the
/// conditional write on the device record.
pub fn assignment_create_logic(
    request: &DeviceAssignmentCreateRequest,
    device: &Device,
) -> Result<DeviceAssignment> {
    let asset = match request.assignment_type {
        DeviceAssignmentType::Associated => {
            let module = request.asset_module_id.as_deref().filter(|s| !s.is_empty());
            let asset = request.asset_id.as_deref().filter(|s| !s.is_empty());
            match (module, asset) {
                (Some(module), Some(asset)) => Some(AssetReference {
                    asset_module_id: module.to_string(),
                    asset_id: asset.to_string(),
                }),
                _ => {
                    return Err(Error::validation(
                        ErrorCode::InvalidAssetReferenceId,
                        "associated assignment requires asset_module_id and asset_id",
                    ))
                }
            }
        }
        DeviceAssignmentType::Unassociated => None,
    };

    let now = Utc::now();
    Ok(DeviceAssignment {
        token: request
            .token
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        device_hardware_id: device.hardware_id.clone(),
        site_token: device.site_token.clone(),
        assignment_type: request.assignment_type,
        status: DeviceAssignmentStatus::Active,
        asset,
        active_date: now,
        released_date: None,
        state: DeviceAssignmentState::default(),
        metadata: request.metadata.clone(),
        created_date: now,
        updated_date: None,
        deleted: false,
    })
}

/// Check that `path` names a slot in the composite specification's schema.
pub fn element_schema_path_logic(specification: &DeviceSpecification, path: &str) -> Result<()> {
    let resolved = specification
        .device_element_schema
        .as_ref()
        .filter(|_| specification.is_composite())
        .and_then(|schema| schema.resolve_slot(path));
    match resolved {
        Some(_) => Ok(()),
        None => Err(Error::validation(
            ErrorCode::InvalidDeviceElementSchemaPath,
            format!(
                "path '{}' is not valid for specification {}",
                path, specification.token
            ),
        )),
    }
}

/// Reject a command whose name+namespace already exists in the specification.
pub fn device_command_create_logic(
    existing: &[DeviceCommand],
    command: &DeviceCommand,
) -> Result<()> {
    if command.name.is_empty() {
        return Err(Error::validation(
            ErrorCode::IncompleteData,
            "command name is required",
        ));
    }
    let qualified = command.qualified_name();
    if existing
        .iter()
        .any(|c| c.token != command.token && c.qualified_name() == qualified)
    {
        return Err(Error::conflict(
            ErrorCode::DuplicateCommand,
            format!(
                "command {} already exists for specification {}",
                qualified, command.specification_token
            ),
        ));
    }
    Ok(())
}
