//! Store traits consumed by the device communication subsystem.
//!
//! Backends implement a small set of record primitives; everything that
//! involves validation or conditional updates is built on top of
//! [`DeviceManagement::modify_device`] and
//! [`DeviceManagement::modify_device_assignment`], which backends must
//! execute atomically per record.

use chrono::Utc;

use crate::error::{Error, ErrorCode, Result};
use crate::model::{
    Device, DeviceAssignment, DeviceAssignmentStatus, DeviceCommand, DeviceCreateRequest,
    DeviceElementMapping, DeviceEvent, DeviceSpecification, DeviceStream, DeviceStreamData, Site,
};
use crate::persistence;

/// Closure applied to a device inside an atomic read-modify-write.
pub type DeviceMutation<'a> = &'a mut dyn FnMut(&mut Device) -> Result<()>;

/// Closure applied to an assignment inside an atomic read-modify-write.
pub type AssignmentMutation<'a> = &'a mut dyn FnMut(&mut DeviceAssignment) -> Result<()>;

pub fn unknown_device(hardware_id: &str) -> Error {
    Error::reference(
        ErrorCode::InvalidHardwareId,
        format!("device {} not found", hardware_id),
    )
}

/// Devices, assignments, specifications, commands and sites.
pub trait DeviceManagement: Send + Sync {
    // Sites

    /// Insert a site. Fails with `DuplicateSiteToken` when the token exists.
    fn insert_site(&self, site: Site) -> Result<Site>;

    fn get_site(&self, token: &str) -> Result<Option<Site>>;

    /// All sites ordered by creation date.
    fn list_sites(&self) -> Result<Vec<Site>>;

    fn remove_site(&self, token: &str) -> Result<Option<Site>>;

    // Specifications and commands

    /// Insert a specification. Fails with `DuplicateSpecificationToken` when the token exists.
    fn insert_device_specification(
        &self,
        specification: DeviceSpecification,
    ) -> Result<DeviceSpecification>;

    fn get_device_specification(&self, token: &str) -> Result<Option<DeviceSpecification>>;

    fn insert_device_command(&self, command: DeviceCommand) -> Result<DeviceCommand>;

    fn get_device_command(&self, token: &str) -> Result<Option<DeviceCommand>>;

    fn list_device_commands(&self, specification_token: &str) -> Result<Vec<DeviceCommand>>;

    // Devices

    /// Insert a device. Fails with `DuplicateHardwareId` when it exists.
    fn insert_device(&self, device: Device) -> Result<Device>;

    fn get_device(&self, hardware_id: &str) -> Result<Option<Device>>;

    fn list_devices(&self) -> Result<Vec<Device>>;

    /// Atomically read, mutate and write back a device.
    ///
    /// Nothing is written when the mutation fails. Fails with
    /// `InvalidHardwareId` when the device does not exist.
    fn modify_device(&self, hardware_id: &str, mutation: DeviceMutation<'_>) -> Result<Device>;

    fn remove_device(&self, hardware_id: &str) -> Result<Option<Device>>;

    // Assignments

    /// Insert an assignment. Fails with `DuplicateAssignmentToken` when the token exists.
    fn insert_device_assignment(&self, assignment: DeviceAssignment) -> Result<DeviceAssignment>;

    fn get_device_assignment(&self, token: &str) -> Result<Option<DeviceAssignment>>;

    /// Assignments (including deleted ones) for a device, oldest first.
    fn list_device_assignments(&self, hardware_id: &str) -> Result<Vec<DeviceAssignment>>;

    /// Atomically read, mutate and write back an assignment.
    ///
    /// Fails with `InvalidDeviceAssignmentToken` when it does not exist.
    fn modify_device_assignment(
        &self,
        token: &str,
        mutation: AssignmentMutation<'_>,
    ) -> Result<DeviceAssignment>;

    fn remove_device_assignment(&self, token: &str) -> Result<Option<DeviceAssignment>>;

    // Provided operations

    fn create_site(&self, site: Site) -> Result<Site> {
        if site.token.is_empty() {
            return Err(Error::validation(
                ErrorCode::IncompleteData,
                "site token is required",
            ));
        }
        self.insert_site(site)
    }

    /// First site by creation date, used for auto-assignment.
    fn first_site(&self) -> Result<Option<Site>> {
        Ok(self.list_sites()?.into_iter().next())
    }

    fn create_device_specification(
        &self,
        specification: DeviceSpecification,
    ) -> Result<DeviceSpecification> {
        if specification.token.is_empty() {
            return Err(Error::validation(
                ErrorCode::IncompleteData,
                "specification token is required",
            ));
        }
        self.insert_device_specification(specification)
    }

    /// Create a command, rejecting a duplicate name+namespace in the specification.
    fn create_device_command(&self, command: DeviceCommand) -> Result<DeviceCommand> {
        if self
            .get_device_specification(&command.specification_token)?
            .is_none()
        {
            return Err(Error::reference(
                ErrorCode::InvalidSpecificationToken,
                format!("specification {} not found", command.specification_token),
            ));
        }
        let existing = self.list_device_commands(&command.specification_token)?;
        persistence::device_command_create_logic(&existing, &command)?;
        self.insert_device_command(command)
    }

    fn create_device(&self, request: &DeviceCreateRequest) -> Result<Device> {
        let device = persistence::device_create_logic(request)?;
        self.insert_device(device)
    }

    fn update_device(&self, hardware_id: &str, request: &DeviceCreateRequest) -> Result<Device> {
        self.modify_device(hardware_id, &mut |device: &mut Device| {
            persistence::device_update_logic(request, device)
        })
    }

    /// Soft delete marks the device deleted; `force` removes the record
    /// together with the references other records hold to it.
    fn delete_device(&self, hardware_id: &str, force: bool) -> Result<Device> {
        if force {
            let removed = self
                .remove_device(hardware_id)?
                .ok_or_else(|| unknown_device(hardware_id))?;
            self.release_device_references(&removed)?;
            return Ok(removed);
        }
        self.modify_device(hardware_id, &mut |device: &mut Device| {
            device.deleted = true;
            device.updated_date = Some(Utc::now());
            Ok(())
        })
    }

    /// Clear what still points at a removed device: the parent of each of
    /// its components, its slot in its own parent, and its current
    /// assignment, which is released.
    fn release_device_references(&self, device: &Device) -> Result<()> {
        for mapping in &device.device_element_mappings {
            match self.swap_device_parent(&mapping.hardware_id, Some(&device.hardware_id), None) {
                Ok(_) => {}
                Err(e)
                    if e.has_code(ErrorCode::InvalidHardwareId)
                        || e.has_code(ErrorCode::DeviceParentMappingExists) => {}
                Err(e) => return Err(e),
            }
        }

        if let Some(parent) = &device.parent_hardware_id {
            let result = self.modify_device(parent, &mut |composite: &mut Device| {
                let before = composite.device_element_mappings.len();
                composite
                    .device_element_mappings
                    .retain(|m| m.hardware_id != device.hardware_id);
                if composite.device_element_mappings.len() != before {
                    composite.updated_date = Some(Utc::now());
                }
                Ok(())
            });
            match result {
                Ok(_) => {}
                Err(e) if e.has_code(ErrorCode::InvalidHardwareId) => {}
                Err(e) => return Err(e),
            }
        }

        if let Some(token) = &device.assignment_token {
            let result =
                self.modify_device_assignment(token, &mut |assignment: &mut DeviceAssignment| {
                    if !assignment.status.is_terminal() {
                        let now = Utc::now();
                        assignment.status = DeviceAssignmentStatus::Released;
                        assignment.released_date = Some(now);
                        assignment.updated_date = Some(now);
                    }
                    Ok(())
                });
            match result {
                Ok(_) => {}
                Err(e) if e.has_code(ErrorCode::InvalidDeviceAssignmentToken) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Conditionally replace the device's assignment token.
    ///
    /// Succeeds only when the current token equals `expected`; otherwise fails
    /// with `DeviceAlreadyAssigned` and leaves the device unchanged.
    fn swap_device_assignment(
        &self,
        hardware_id: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<Device> {
        self.modify_device(hardware_id, &mut |device: &mut Device| {
            if device.assignment_token.as_deref() != expected {
                return Err(Error::conflict(
                    ErrorCode::DeviceAlreadyAssigned,
                    format!(
                        "device {} is assigned to {}",
                        device.hardware_id,
                        device.assignment_token.as_deref().unwrap_or("nothing")
                    ),
                ));
            }
            device.assignment_token = new.map(str::to_string);
            device.updated_date = Some(Utc::now());
            Ok(())
        })
    }

    /// Clear the assignment token if it still points at `token`.
    ///
    /// Returns `Ok(None)` when the device no longer exists.
    fn clear_device_assignment(&self, hardware_id: &str, token: &str) -> Result<Option<Device>> {
        let result = self.modify_device(hardware_id, &mut |device: &mut Device| {
            if device.assignment_token.as_deref() == Some(token) {
                device.assignment_token = None;
                device.updated_date = Some(Utc::now());
            }
            Ok(())
        });
        match result {
            Ok(device) => Ok(Some(device)),
            Err(e) if e.has_code(ErrorCode::InvalidHardwareId) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Conditionally replace the device's parent.
    ///
    /// Fails with `DeviceParentMappingExists` when the current parent differs
    /// from `expected`.
    fn swap_device_parent(
        &self,
        hardware_id: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<Device> {
        self.modify_device(hardware_id, &mut |device: &mut Device| {
            if device.parent_hardware_id.as_deref() != expected {
                return Err(Error::conflict(
                    ErrorCode::DeviceParentMappingExists,
                    format!(
                        "device {} is already mapped under {}",
                        device.hardware_id,
                        device.parent_hardware_id.as_deref().unwrap_or("nothing")
                    ),
                ));
            }
            device.parent_hardware_id = new.map(str::to_string);
            device.updated_date = Some(Utc::now());
            Ok(())
        })
    }

    /// Append a mapping unless its schema path is already occupied.
    fn add_device_element_mapping(
        &self,
        hardware_id: &str,
        mapping: &DeviceElementMapping,
    ) -> Result<Device> {
        self.modify_device(hardware_id, &mut |device: &mut Device| {
            if device.mapping_for_path(&mapping.schema_path).is_some() {
                return Err(Error::conflict(
                    ErrorCode::DeviceElementMappingExists,
                    format!(
                        "device {} already has a mapping for '{}'",
                        device.hardware_id, mapping.schema_path
                    ),
                ));
            }
            device.device_element_mappings.push(mapping.clone());
            device.updated_date = Some(Utc::now());
            Ok(())
        })
    }

    /// Remove the mapping at `schema_path`, returning the updated device and the removed entry.
    fn remove_device_element_mapping(
        &self,
        hardware_id: &str,
        schema_path: &str,
    ) -> Result<(Device, DeviceElementMapping)> {
        let mut removed = None;
        let device = self.modify_device(hardware_id, &mut |device: &mut Device| {
            let index = device
                .device_element_mappings
                .iter()
                .position(|m| m.schema_path == schema_path)
                .ok_or_else(|| {
                    Error::reference(
                        ErrorCode::DeviceElementMappingDoesNotExist,
                        format!(
                            "device {} has no mapping for '{}'",
                            device.hardware_id, schema_path
                        ),
                    )
                })?;
            removed = Some(device.device_element_mappings.remove(index));
            device.updated_date = Some(Utc::now());
            Ok(())
        })?;
        let mapping = removed.ok_or_else(|| {
            Error::Storage(format!("mapping removal for {} was not applied", hardware_id))
        })?;
        Ok((device, mapping))
    }
}

/// Events and streams recorded against assignments.
pub trait DeviceEventManagement: Send + Sync {
    fn add_device_event(&self, event: DeviceEvent) -> Result<DeviceEvent>;

    fn get_device_event(&self, id: &str) -> Result<Option<DeviceEvent>>;

    /// Events for an assignment, oldest first.
    fn list_device_events(&self, assignment_token: &str) -> Result<Vec<DeviceEvent>>;

    /// Create a stream. Fails with `DuplicateStreamId` when it exists.
    fn create_device_stream(&self, stream: DeviceStream) -> Result<DeviceStream>;

    fn get_device_stream(
        &self,
        assignment_token: &str,
        stream_id: &str,
    ) -> Result<Option<DeviceStream>>;

    /// Append a chunk. Fails with `InvalidStreamId` when the stream does not exist.
    fn add_device_stream_data(&self, data: DeviceStreamData) -> Result<DeviceStreamData>;

    fn get_device_stream_data(
        &self,
        assignment_token: &str,
        stream_id: &str,
        sequence_number: u64,
    ) -> Result<Option<DeviceStreamData>>;
}
