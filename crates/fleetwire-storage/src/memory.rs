//! In-process store backed by hash maps.
//!
//! Each table sits behind its own `parking_lot::RwLock`; read-modify-write
//! operations hold the table's write lock for their whole duration, which
//! gives per-record atomicity.

use std::collections::HashMap;

use parking_lot::RwLock;

use fleetwire_core::error::{Error, ErrorCode, Result};
use fleetwire_core::model::{
    Device, DeviceAssignment, DeviceCommand, DeviceEvent, DeviceSpecification, DeviceStream,
    DeviceStreamData, Site,
};
use fleetwire_core::storage::{
    unknown_device, AssignmentMutation, DeviceEventManagement, DeviceManagement, DeviceMutation,
};

type StreamKey = (String, String);
type StreamDataKey = (String, String, u64);

/// Non-persistent store used for tests and when no database path is configured.
#[derive(Default)]
pub struct MemoryDeviceStore {
    sites: RwLock<HashMap<String, Site>>,
    specifications: RwLock<HashMap<String, DeviceSpecification>>,
    commands: RwLock<HashMap<String, DeviceCommand>>,
    devices: RwLock<HashMap<String, Device>>,
    assignments: RwLock<HashMap<String, DeviceAssignment>>,
    /// Events in insertion order
    events: RwLock<Vec<DeviceEvent>>,
    streams: RwLock<HashMap<StreamKey, DeviceStream>>,
    stream_data: RwLock<HashMap<StreamDataKey, DeviceStreamData>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_unique<T>(
    table: &RwLock<HashMap<String, T>>,
    key: &str,
    value: T,
    code: ErrorCode,
) -> Result<T>
where
    T: Clone,
{
    let mut table = table.write();
    if table.contains_key(key) {
        return Err(Error::conflict(code, format!("{} already exists", key)));
    }
    table.insert(key.to_string(), value.clone());
    Ok(value)
}

impl DeviceManagement for MemoryDeviceStore {
    fn insert_site(&self, site: Site) -> Result<Site> {
        let token = site.token.clone();
        insert_unique(&self.sites, &token, site, ErrorCode::DuplicateSiteToken)
    }

    fn get_site(&self, token: &str) -> Result<Option<Site>> {
        Ok(self.sites.read().get(token).cloned())
    }

    fn list_sites(&self) -> Result<Vec<Site>> {
        let mut sites: Vec<Site> = self.sites.read().values().cloned().collect();
        sites.sort_by(|a, b| {
            a.created_date
                .cmp(&b.created_date)
                .then_with(|| a.token.cmp(&b.token))
        });
        Ok(sites)
    }

    fn remove_site(&self, token: &str) -> Result<Option<Site>> {
        Ok(self.sites.write().remove(token))
    }

    fn insert_device_specification(
        &self,
        specification: DeviceSpecification,
    ) -> Result<DeviceSpecification> {
        let token = specification.token.clone();
        insert_unique(
            &self.specifications,
            &token,
            specification,
            ErrorCode::DuplicateSpecificationToken,
        )
    }

    fn get_device_specification(&self, token: &str) -> Result<Option<DeviceSpecification>> {
        Ok(self.specifications.read().get(token).cloned())
    }

    fn insert_device_command(&self, command: DeviceCommand) -> Result<DeviceCommand> {
        let token = command.token.clone();
        insert_unique(&self.commands, &token, command, ErrorCode::DuplicateCommand)
    }

    fn get_device_command(&self, token: &str) -> Result<Option<DeviceCommand>> {
        Ok(self.commands.read().get(token).cloned())
    }

    fn list_device_commands(&self, specification_token: &str) -> Result<Vec<DeviceCommand>> {
        let mut commands: Vec<DeviceCommand> = self
            .commands
            .read()
            .values()
            .filter(|c| c.specification_token == specification_token)
            .cloned()
            .collect();
        commands.sort_by(|a, b| a.qualified_name().cmp(&b.qualified_name()));
        Ok(commands)
    }

    fn insert_device(&self, device: Device) -> Result<Device> {
        let hardware_id = device.hardware_id.clone();
        insert_unique(
            &self.devices,
            &hardware_id,
            device,
            ErrorCode::DuplicateHardwareId,
        )
    }

    fn get_device(&self, hardware_id: &str) -> Result<Option<Device>> {
        Ok(self.devices.read().get(hardware_id).cloned())
    }

    fn list_devices(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.hardware_id.cmp(&b.hardware_id));
        Ok(devices)
    }

    fn modify_device(&self, hardware_id: &str, mutation: DeviceMutation<'_>) -> Result<Device> {
        let mut devices = self.devices.write();
        let stored = devices
            .get_mut(hardware_id)
            .ok_or_else(|| unknown_device(hardware_id))?;
        let mut updated = stored.clone();
        mutation(&mut updated)?;
        *stored = updated.clone();
        Ok(updated)
    }

    fn remove_device(&self, hardware_id: &str) -> Result<Option<Device>> {
        Ok(self.devices.write().remove(hardware_id))
    }

    fn insert_device_assignment(&self, assignment: DeviceAssignment) -> Result<DeviceAssignment> {
        let token = assignment.token.clone();
        insert_unique(
            &self.assignments,
            &token,
            assignment,
            ErrorCode::DuplicateAssignmentToken,
        )
    }

    fn get_device_assignment(&self, token: &str) -> Result<Option<DeviceAssignment>> {
        Ok(self.assignments.read().get(token).cloned())
    }

    fn list_device_assignments(&self, hardware_id: &str) -> Result<Vec<DeviceAssignment>> {
        let mut assignments: Vec<DeviceAssignment> = self
            .assignments
            .read()
            .values()
            .filter(|a| a.device_hardware_id == hardware_id)
            .cloned()
            .collect();
        assignments.sort_by(|a, b| {
            a.created_date
                .cmp(&b.created_date)
                .then_with(|| a.token.cmp(&b.token))
        });
        Ok(assignments)
    }

    fn modify_device_assignment(
        &self,
        token: &str,
        mutation: AssignmentMutation<'_>,
    ) -> Result<DeviceAssignment> {
        let mut assignments = self.assignments.write();
        let stored = assignments.get_mut(token).ok_or_else(|| {
            Error::reference(
                ErrorCode::InvalidDeviceAssignmentToken,
                format!("assignment {} not found", token),
            )
        })?;
        let mut updated = stored.clone();
        mutation(&mut updated)?;
        *stored = updated.clone();
        Ok(updated)
    }

    fn remove_device_assignment(&self, token: &str) -> Result<Option<DeviceAssignment>> {
        Ok(self.assignments.write().remove(token))
    }
}

impl DeviceEventManagement for MemoryDeviceStore {
    fn add_device_event(&self, event: DeviceEvent) -> Result<DeviceEvent> {
        self.events.write().push(event.clone());
        Ok(event)
    }

    fn get_device_event(&self, id: &str) -> Result<Option<DeviceEvent>> {
        Ok(self.events.read().iter().find(|e| e.id == id).cloned())
    }

    fn list_device_events(&self, assignment_token: &str) -> Result<Vec<DeviceEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.assignment_token == assignment_token)
            .cloned()
            .collect())
    }

    fn create_device_stream(&self, stream: DeviceStream) -> Result<DeviceStream> {
        let key = (stream.assignment_token.clone(), stream.stream_id.clone());
        let mut streams = self.streams.write();
        if streams.contains_key(&key) {
            return Err(Error::conflict(
                ErrorCode::DuplicateStreamId,
                format!("stream {} already exists for {}", key.1, key.0),
            ));
        }
        streams.insert(key, stream.clone());
        Ok(stream)
    }

    fn get_device_stream(
        &self,
        assignment_token: &str,
        stream_id: &str,
    ) -> Result<Option<DeviceStream>> {
        let key = (assignment_token.to_string(), stream_id.to_string());
        Ok(self.streams.read().get(&key).cloned())
    }

    fn add_device_stream_data(&self, data: DeviceStreamData) -> Result<DeviceStreamData> {
        if self
            .get_device_stream(&data.assignment_token, &data.stream_id)?
            .is_none()
        {
            return Err(Error::reference(
                ErrorCode::InvalidStreamId,
                format!("stream {} not found for {}", data.stream_id, data.assignment_token),
            ));
        }
        let key = (
            data.assignment_token.clone(),
            data.stream_id.clone(),
            data.sequence_number,
        );
        self.stream_data.write().insert(key, data.clone());
        Ok(data)
    }

    fn get_device_stream_data(
        &self,
        assignment_token: &str,
        stream_id: &str,
        sequence_number: u64,
    ) -> Result<Option<DeviceStreamData>> {
        let key = (
            assignment_token.to_string(),
            stream_id.to_string(),
            sequence_number,
        );
        Ok(self.stream_data.read().get(&key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwire_core::model::DeviceCreateRequest;

    #[test]
    fn test_failed_mutation_leaves_record_untouched() {
        let store = MemoryDeviceStore::new();
        store
            .create_device(&DeviceCreateRequest::new("dev-1", "spec-1", "site-1"))
            .unwrap();

        let result = store.modify_device("dev-1", &mut |device: &mut Device| {
            device.site_token = "site-2".into();
            Err(Error::Processing("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.get_device("dev-1").unwrap().unwrap().site_token, "site-1");
    }

    #[test]
    fn test_duplicate_hardware_id() {
        let store = MemoryDeviceStore::new();
        let request = DeviceCreateRequest::new("dev-1", "spec-1", "site-1");
        store.create_device(&request).unwrap();
        let err = store.create_device(&request).unwrap_err();
        assert!(err.has_code(ErrorCode::DuplicateHardwareId));
    }
}
