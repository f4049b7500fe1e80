//! Device element mappings: placing component devices into the named slots
//! of a composite device.

use std::sync::Arc;

use fleetwire_core::error::{Error, ErrorCode, Result};
use fleetwire_core::model::{Device, DeviceElementMapping};
use fleetwire_core::persistence;
use fleetwire_core::storage::unknown_device;
use fleetwire_core::DeviceManagement;

/// Attach and detach component devices.
///
/// Each operation performs two related writes (the component's parent and
/// the composite's mapping list), each atomic on its own record.
pub struct DeviceElementMappings {
    management: Arc<dyn DeviceManagement>,
}

impl DeviceElementMappings {
    pub fn new(management: Arc<dyn DeviceManagement>) -> Self {
        Self { management }
    }

    fn require_device(&self, hardware_id: &str) -> Result<Device> {
        self.management
            .get_device(hardware_id)?
            .ok_or_else(|| unknown_device(hardware_id))
    }

    /// Map `mapping.hardware_id` into `mapping.schema_path` of `composite_id`.
    pub fn create_device_element_mapping(
        &self,
        composite_id: &str,
        mapping: &DeviceElementMapping,
    ) -> Result<Device> {
        let composite = self.require_device(composite_id)?;
        let component = self.require_device(&mapping.hardware_id)?;
        if composite.hardware_id == component.hardware_id {
            return Err(Error::validation(
                ErrorCode::IncompleteData,
                format!("device {} can not be mapped into itself", composite_id),
            ));
        }

        if let Some(parent) = &component.parent_hardware_id {
            return Err(Error::conflict(
                ErrorCode::DeviceParentMappingExists,
                format!(
                    "device {} is already mapped under {}",
                    component.hardware_id, parent
                ),
            ));
        }

        let specification = self
            .management
            .get_device_specification(&composite.specification_token)?
            .ok_or_else(|| {
                Error::reference(
                    ErrorCode::InvalidSpecificationToken,
                    format!("specification {} not found", composite.specification_token),
                )
            })?;
        persistence::element_schema_path_logic(&specification, &mapping.schema_path)?;

        if composite.mapping_for_path(&mapping.schema_path).is_some() {
            return Err(Error::conflict(
                ErrorCode::DeviceElementMappingExists,
                format!(
                    "device {} already has a mapping for '{}'",
                    composite_id, mapping.schema_path
                ),
            ));
        }

        // Claim the component first; a concurrent mapping of the same
        // component fails here
        self.management
            .swap_device_parent(&mapping.hardware_id, None, Some(composite_id))?;

        match self
            .management
            .add_device_element_mapping(composite_id, mapping)
        {
            Ok(updated) => {
                tracing::info!(
                    hardware_id = %composite_id,
                    component = %mapping.hardware_id,
                    path = %mapping.schema_path,
                    "Created device element mapping"
                );
                Ok(updated)
            }
            Err(e) => {
                if let Err(revert) = self.management.swap_device_parent(
                    &mapping.hardware_id,
                    Some(composite_id),
                    None,
                ) {
                    tracing::error!(
                        component = %mapping.hardware_id,
                        "Failed to clear parent after mapping failed: {}",
                        revert
                    );
                }
                Err(e)
            }
        }
    }

    /// Remove the mapping at `schema_path` of `composite_id`.
    ///
    /// The component's parent is cleared when the component still exists
    /// and still points at this composite.
    pub fn delete_device_element_mapping(
        &self,
        composite_id: &str,
        schema_path: &str,
    ) -> Result<Device> {
        let (updated, removed) = self
            .management
            .remove_device_element_mapping(composite_id, schema_path)?;

        match self
            .management
            .swap_device_parent(&removed.hardware_id, Some(composite_id), None)
        {
            Ok(_) => {}
            Err(e) if e.has_code(ErrorCode::InvalidHardwareId) => {
                tracing::debug!(
                    component = %removed.hardware_id,
                    "Mapped device no longer exists"
                );
            }
            Err(e) if e.has_code(ErrorCode::DeviceParentMappingExists) => {
                tracing::warn!(
                    component = %removed.hardware_id,
                    "Mapped device has a different parent, leaving it unchanged"
                );
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            hardware_id = %composite_id,
            component = %removed.hardware_id,
            path = %schema_path,
            "Deleted device element mapping"
        );
        Ok(updated)
    }
}
