//! Persistent device store using redb.
//!
//! Records are stored as JSON strings, one table per record type. Every
//! read-modify-write runs inside a single write transaction, so concurrent
//! writers to the same record are serialized by redb.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use fleetwire_core::error::{ErrorCode, Result as CoreResult};
use fleetwire_core::model::{
    Device, DeviceAssignment, DeviceCommand, DeviceEvent, DeviceSpecification, DeviceStream,
    DeviceStreamData, Site,
};
use fleetwire_core::storage::{
    unknown_device, AssignmentMutation, DeviceEventManagement, DeviceManagement, DeviceMutation,
};

use crate::error::{CoreError, Result};

type JsonTable = TableDefinition<'static, &'static str, &'static str>;

// key = site token, value = Site (JSON)
const SITES_TABLE: JsonTable = TableDefinition::new("sites");

// key = specification token, value = DeviceSpecification (JSON)
const SPECIFICATIONS_TABLE: JsonTable = TableDefinition::new("device_specifications");

// key = command token, value = DeviceCommand (JSON)
const COMMANDS_TABLE: JsonTable = TableDefinition::new("device_commands");

// key = hardware id, value = Device (JSON)
const DEVICES_TABLE: JsonTable = TableDefinition::new("devices");

// key = assignment token, value = DeviceAssignment (JSON)
const ASSIGNMENTS_TABLE: JsonTable = TableDefinition::new("device_assignments");

// key = event id, value = DeviceEvent (JSON)
const EVENTS_TABLE: JsonTable = TableDefinition::new("device_events");

// key = (assignment token, stream id), value = DeviceStream (JSON)
const STREAMS_TABLE: TableDefinition<(&str, &str), &str> = TableDefinition::new("device_streams");

// key = (assignment token, stream id, sequence number), value = DeviceStreamData (JSON)
const STREAM_DATA_TABLE: TableDefinition<(&str, &str, u64), &str> =
    TableDefinition::new("device_stream_data");

/// redb-backed implementation of the store traits.
pub struct RedbDeviceStore {
    db: Arc<Database>,
    path: String,
}

impl RedbDeviceStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };

        // Make sure every table exists so read transactions never fail on a fresh file
        let write_txn = db.begin_write()?;
        {
            let _sites = write_txn.open_table(SITES_TABLE)?;
            let _specifications = write_txn.open_table(SPECIFICATIONS_TABLE)?;
            let _commands = write_txn.open_table(COMMANDS_TABLE)?;
            let _devices = write_txn.open_table(DEVICES_TABLE)?;
            let _assignments = write_txn.open_table(ASSIGNMENTS_TABLE)?;
            let _events = write_txn.open_table(EVENTS_TABLE)?;
            let _streams = write_txn.open_table(STREAMS_TABLE)?;
            let _stream_data = write_txn.open_table(STREAM_DATA_TABLE)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path_ref.display(), "Opened device store");

        Ok(Self {
            db: Arc::new(db),
            path: path_ref.to_string_lossy().to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> Result<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(def)?;
        let json = table.get(key)?.map(|v| v.value().to_string());
        let record = match json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(record)
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable) -> Result<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(def)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_key, value) = entry?;
            records.push(serde_json::from_str(value.value())?);
        }
        Ok(records)
    }

    fn insert_new_json<T: Serialize>(
        &self,
        def: JsonTable,
        key: &str,
        record: &T,
        code: ErrorCode,
    ) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(def)?;
            let exists = table.get(key)?.is_some();
            if exists {
                return Err(CoreError::conflict(code, format!("{} already exists", key)).into());
            }
            table.insert(key, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> Result<Option<T>> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(def)?;
            let removed = table.remove(key)?.map(|v| v.value().to_string());
            removed
        };
        write_txn.commit()?;
        let record = match removed {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(record)
    }

    fn modify_json<T>(
        &self,
        def: JsonTable,
        key: &str,
        missing: impl FnOnce() -> CoreError,
        mutation: &mut dyn FnMut(&mut T) -> CoreResult<()>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(def)?;
            let current = table.get(key)?.map(|v| v.value().to_string());
            let json = current.ok_or_else(missing)?;
            let mut record: T = serde_json::from_str(&json)?;
            // Dropping the uncommitted transaction on error discards the write
            mutation(&mut record)?;
            let json = serde_json::to_string(&record)?;
            table.insert(key, json.as_str())?;
            record
        };
        write_txn.commit()?;
        Ok(updated)
    }

    fn get_stream(&self, assignment_token: &str, stream_id: &str) -> Result<Option<DeviceStream>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STREAMS_TABLE)?;
        let json = table
            .get((assignment_token, stream_id))?
            .map(|v| v.value().to_string());
        let stream = match json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(stream)
    }

    fn insert_stream(&self, stream: &DeviceStream) -> Result<()> {
        let json = serde_json::to_string(stream)?;
        let key = (stream.assignment_token.as_str(), stream.stream_id.as_str());
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STREAMS_TABLE)?;
            let exists = table.get(key)?.is_some();
            if exists {
                return Err(CoreError::conflict(
                    ErrorCode::DuplicateStreamId,
                    format!("stream {} already exists for {}", key.1, key.0),
                )
                .into());
            }
            table.insert(key, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn insert_stream_data(&self, data: &DeviceStreamData) -> Result<()> {
        let json = serde_json::to_string(data)?;
        let write_txn = self.db.begin_write()?;
        {
            let streams = write_txn.open_table(STREAMS_TABLE)?;
            let exists = streams
                .get((data.assignment_token.as_str(), data.stream_id.as_str()))?
                .is_some();
            if !exists {
                return Err(CoreError::reference(
                    ErrorCode::InvalidStreamId,
                    format!(
                        "stream {} not found for {}",
                        data.stream_id, data.assignment_token
                    ),
                )
                .into());
            }
            let mut table = write_txn.open_table(STREAM_DATA_TABLE)?;
            table.insert(
                (
                    data.assignment_token.as_str(),
                    data.stream_id.as_str(),
                    data.sequence_number,
                ),
                json.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_stream_data(
        &self,
        assignment_token: &str,
        stream_id: &str,
        sequence_number: u64,
    ) -> Result<Option<DeviceStreamData>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STREAM_DATA_TABLE)?;
        let json = table
            .get((assignment_token, stream_id, sequence_number))?
            .map(|v| v.value().to_string());
        let data = match json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(data)
    }
}

fn unknown_assignment(token: &str) -> CoreError {
    CoreError::reference(
        ErrorCode::InvalidDeviceAssignmentToken,
        format!("assignment {} not found", token),
    )
}

impl DeviceManagement for RedbDeviceStore {
    fn insert_site(&self, site: Site) -> CoreResult<Site> {
        self.insert_new_json(SITES_TABLE, &site.token, &site, ErrorCode::DuplicateSiteToken)?;
        Ok(site)
    }

    fn get_site(&self, token: &str) -> CoreResult<Option<Site>> {
        Ok(self.get_json(SITES_TABLE, token)?)
    }

    fn list_sites(&self) -> CoreResult<Vec<Site>> {
        let mut sites: Vec<Site> = self.list_json(SITES_TABLE)?;
        sites.sort_by(|a, b| {
            a.created_date
                .cmp(&b.created_date)
                .then_with(|| a.token.cmp(&b.token))
        });
        Ok(sites)
    }

    fn remove_site(&self, token: &str) -> CoreResult<Option<Site>> {
        Ok(self.remove_json(SITES_TABLE, token)?)
    }

    fn insert_device_specification(
        &self,
        specification: DeviceSpecification,
    ) -> CoreResult<DeviceSpecification> {
        self.insert_new_json(
            SPECIFICATIONS_TABLE,
            &specification.token,
            &specification,
            ErrorCode::DuplicateSpecificationToken,
        )?;
        Ok(specification)
    }

    fn get_device_specification(&self, token: &str) -> CoreResult<Option<DeviceSpecification>> {
        Ok(self.get_json(SPECIFICATIONS_TABLE, token)?)
    }

    fn insert_device_command(&self, command: DeviceCommand) -> CoreResult<DeviceCommand> {
        self.insert_new_json(
            COMMANDS_TABLE,
            &command.token,
            &command,
            ErrorCode::DuplicateCommand,
        )?;
        Ok(command)
    }

    fn get_device_command(&self, token: &str) -> CoreResult<Option<DeviceCommand>> {
        Ok(self.get_json(COMMANDS_TABLE, token)?)
    }

    fn list_device_commands(&self, specification_token: &str) -> CoreResult<Vec<DeviceCommand>> {
        let commands: Vec<DeviceCommand> = self.list_json(COMMANDS_TABLE)?;
        let mut commands: Vec<DeviceCommand> = commands
            .into_iter()
            .filter(|c| c.specification_token == specification_token)
            .collect();
        commands.sort_by(|a, b| a.qualified_name().cmp(&b.qualified_name()));
        Ok(commands)
    }

    fn insert_device(&self, device: Device) -> CoreResult<Device> {
        self.insert_new_json(
            DEVICES_TABLE,
            &device.hardware_id,
            &device,
            ErrorCode::DuplicateHardwareId,
        )?;
        Ok(device)
    }

    fn get_device(&self, hardware_id: &str) -> CoreResult<Option<Device>> {
        Ok(self.get_json(DEVICES_TABLE, hardware_id)?)
    }

    fn list_devices(&self) -> CoreResult<Vec<Device>> {
        // Keys are hardware ids, so iteration order is already sorted
        Ok(self.list_json(DEVICES_TABLE)?)
    }

    fn modify_device(&self, hardware_id: &str, mutation: DeviceMutation<'_>) -> CoreResult<Device> {
        Ok(self.modify_json(
            DEVICES_TABLE,
            hardware_id,
            || unknown_device(hardware_id),
            mutation,
        )?)
    }

    fn remove_device(&self, hardware_id: &str) -> CoreResult<Option<Device>> {
        Ok(self.remove_json(DEVICES_TABLE, hardware_id)?)
    }

    fn insert_device_assignment(
        &self,
        assignment: DeviceAssignment,
    ) -> CoreResult<DeviceAssignment> {
        self.insert_new_json(
            ASSIGNMENTS_TABLE,
            &assignment.token,
            &assignment,
            ErrorCode::DuplicateAssignmentToken,
        )?;
        Ok(assignment)
    }

    fn get_device_assignment(&self, token: &str) -> CoreResult<Option<DeviceAssignment>> {
        Ok(self.get_json(ASSIGNMENTS_TABLE, token)?)
    }

    fn list_device_assignments(&self, hardware_id: &str) -> CoreResult<Vec<DeviceAssignment>> {
        let assignments: Vec<DeviceAssignment> = self.list_json(ASSIGNMENTS_TABLE)?;
        let mut assignments: Vec<DeviceAssignment> = assignments
            .into_iter()
            .filter(|a| a.device_hardware_id == hardware_id)
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
    ) -> CoreResult<DeviceAssignment> {
        Ok(self.modify_json(
            ASSIGNMENTS_TABLE,
            token,
            || unknown_assignment(token),
            mutation,
        )?)
    }

    fn remove_device_assignment(&self, token: &str) -> CoreResult<Option<DeviceAssignment>> {
        Ok(self.remove_json(ASSIGNMENTS_TABLE, token)?)
    }
}

impl DeviceEventManagement for RedbDeviceStore {
    fn add_device_event(&self, event: DeviceEvent) -> CoreResult<DeviceEvent> {
        let json = serde_json::to_string(&event)?;
        let write = || -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(EVENTS_TABLE)?;
                table.insert(event.id.as_str(), json.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        };
        write()?;
        Ok(event)
    }

    fn get_device_event(&self, id: &str) -> CoreResult<Option<DeviceEvent>> {
        Ok(self.get_json(EVENTS_TABLE, id)?)
    }

    fn list_device_events(&self, assignment_token: &str) -> CoreResult<Vec<DeviceEvent>> {
        let events: Vec<DeviceEvent> = self.list_json(EVENTS_TABLE)?;
        let mut events: Vec<DeviceEvent> = events
            .into_iter()
            .filter(|e| e.assignment_token == assignment_token)
            .collect();
        events.sort_by(|a, b| a.received_date.cmp(&b.received_date));
        Ok(events)
    }

    fn create_device_stream(&self, stream: DeviceStream) -> CoreResult<DeviceStream> {
        self.insert_stream(&stream)?;
        Ok(stream)
    }

    fn get_device_stream(
        &self,
        assignment_token: &str,
        stream_id: &str,
    ) -> CoreResult<Option<DeviceStream>> {
        Ok(self.get_stream(assignment_token, stream_id)?)
    }

    fn add_device_stream_data(&self, data: DeviceStreamData) -> CoreResult<DeviceStreamData> {
        self.insert_stream_data(&data)?;
        Ok(data)
    }

    fn get_device_stream_data(
        &self,
        assignment_token: &str,
        stream_id: &str,
        sequence_number: u64,
    ) -> CoreResult<Option<DeviceStreamData>> {
        Ok(self.get_stream_data(assignment_token, stream_id, sequence_number)?)
    }
}
