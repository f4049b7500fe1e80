//! Tests for the device stores.
//!
//! Every scenario runs against both the in-memory and the redb store:
//! - Sites, specifications and commands
//! - Device create/update/delete
//! - Conditional assignment and parent writes
//! - Element mapping primitives
//! - Events and streams

use std::collections::HashMap;

use chrono::Utc;
use fleetwire_core::model::*;
use fleetwire_core::{DeviceEventManagement, DeviceManagement, ErrorCode};
use fleetwire_storage::{MemoryDeviceStore, RedbDeviceStore};
use tempfile::TempDir;

trait TestStore: DeviceManagement + DeviceEventManagement {}
impl<T: DeviceManagement + DeviceEventManagement> TestStore for T {}

fn with_stores(test: impl Fn(&dyn TestStore)) {
    let memory = MemoryDeviceStore::new();
    test(&memory);

    let dir = TempDir::new().expect("Failed to create temp dir");
    let redb = RedbDeviceStore::open(dir.path().join("fleetwire.redb"))
        .expect("Failed to open redb store");
    test(&redb);
}

fn command(token: &str, name: &str) -> DeviceCommand {
    DeviceCommand {
        token: token.to_string(),
        specification_token: "spec-1".to_string(),
        namespace: Some("fw".to_string()),
        name: name.to_string(),
        description: None,
        parameters: vec![],
        metadata: HashMap::new(),
    }
}

#[test]
fn test_sites_are_listed_in_creation_order() {
    with_stores(|store| {
        store.create_site(Site::new("site-b", "B")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.create_site(Site::new("site-a", "A")).unwrap();

        let first = store.first_site().unwrap().unwrap();
        assert_eq!(first.token, "site-b");

        let err = store.create_site(Site::new("site-a", "A again")).unwrap_err();
        assert!(err.has_code(ErrorCode::DuplicateSiteToken));

        store.remove_site("site-b").unwrap();
        assert_eq!(store.first_site().unwrap().unwrap().token, "site-a");
    });
}

#[test]
fn test_duplicate_command_name_in_namespace() {
    with_stores(|store| {
        store
            .create_device_specification(DeviceSpecification::new("spec-1", "Sensor"))
            .unwrap();
        store.create_device_command(command("c1", "reboot")).unwrap();

        let err = store.create_device_command(command("c2", "reboot")).unwrap_err();
        assert!(err.has_code(ErrorCode::DuplicateCommand));

        store.create_device_command(command("c3", "ping")).unwrap();
        let commands = store.list_device_commands("spec-1").unwrap();
        assert_eq!(commands.len(), 2);

        let mut orphan = command("c4", "ping");
        orphan.specification_token = "missing".into();
        let err = store.create_device_command(orphan).unwrap_err();
        assert!(err.has_code(ErrorCode::InvalidSpecificationToken));
    });
}

#[test]
fn test_device_update_and_delete() {
    with_stores(|store| {
        let created = store
            .create_device(&DeviceCreateRequest::new("dev-1", "spec-1", "site-1"))
            .unwrap();
        assert_eq!(created.status, DeviceStatus::Ok);

        let update = DeviceCreateRequest {
            status: Some(DeviceStatus::HardwareFailure),
            comments: Some("fan noise".into()),
            ..Default::default()
        };
        let updated = store.update_device("dev-1", &update).unwrap();
        assert_eq!(updated.status, DeviceStatus::HardwareFailure);
        assert_eq!(updated.site_token, "site-1");

        let err = store.update_device("dev-404", &update).unwrap_err();
        assert!(err.has_code(ErrorCode::InvalidHardwareId));

        let soft = store.delete_device("dev-1", false).unwrap();
        assert!(soft.deleted);
        assert!(store.get_device("dev-1").unwrap().unwrap().deleted);

        store.delete_device("dev-1", true).unwrap();
        assert!(store.get_device("dev-1").unwrap().is_none());
        let err = store.delete_device("dev-1", true).unwrap_err();
        assert!(err.has_code(ErrorCode::InvalidHardwareId));
    });
}

#[test]
fn test_swap_device_assignment_is_conditional() {
    with_stores(|store| {
        store
            .create_device(&DeviceCreateRequest::new("dev-1", "spec-1", "site-1"))
            .unwrap();

        store.swap_device_assignment("dev-1", None, Some("a-1")).unwrap();
        let err = store
            .swap_device_assignment("dev-1", None, Some("a-2"))
            .unwrap_err();
        assert!(err.has_code(ErrorCode::DeviceAlreadyAssigned));
        assert_eq!(
            store.get_device("dev-1").unwrap().unwrap().assignment_token.as_deref(),
            Some("a-1")
        );

        // Clearing with a stale token keeps the current one
        store.clear_device_assignment("dev-1", "a-0").unwrap();
        assert!(store.get_device("dev-1").unwrap().unwrap().is_assigned());
        store.clear_device_assignment("dev-1", "a-1").unwrap();
        assert!(!store.get_device("dev-1").unwrap().unwrap().is_assigned());

        assert!(store.clear_device_assignment("dev-404", "a-1").unwrap().is_none());
    });
}

#[test]
fn test_element_mapping_primitives() {
    with_stores(|store| {
        store
            .create_device(&DeviceCreateRequest::new("gw-1", "gateway", "site-1"))
            .unwrap();
        store
            .create_device(&DeviceCreateRequest::new("dev-2", "sensor", "site-1"))
            .unwrap();

        store
            .add_device_element_mapping("gw-1", &DeviceElementMapping::new("dev-2", "slot1"))
            .unwrap();
        let err = store
            .add_device_element_mapping("gw-1", &DeviceElementMapping::new("dev-3", "slot1"))
            .unwrap_err();
        assert!(err.has_code(ErrorCode::DeviceElementMappingExists));

        store.swap_device_parent("dev-2", None, Some("gw-1")).unwrap();
        let err = store
            .swap_device_parent("dev-2", None, Some("gw-2"))
            .unwrap_err();
        assert!(err.has_code(ErrorCode::DeviceParentMappingExists));

        let (parent, removed) = store.remove_device_element_mapping("gw-1", "slot1").unwrap();
        assert!(parent.device_element_mappings.is_empty());
        assert_eq!(removed.hardware_id, "dev-2");

        let err = store
            .remove_device_element_mapping("gw-1", "slot1")
            .unwrap_err();
        assert!(err.has_code(ErrorCode::DeviceElementMappingDoesNotExist));
    });
}

#[test]
fn test_assignment_records() {
    with_stores(|store| {
        let device = store
            .create_device(&DeviceCreateRequest::new("dev-1", "spec-1", "site-1"))
            .unwrap();
        let mut request = DeviceAssignmentCreateRequest::unassociated("dev-1");
        request.token = Some("a-1".into());
        let assignment =
            fleetwire_core::persistence::assignment_create_logic(&request, &device).unwrap();

        store.insert_device_assignment(assignment.clone()).unwrap();
        let err = store.insert_device_assignment(assignment).unwrap_err();
        assert!(err.has_code(ErrorCode::DuplicateAssignmentToken));

        let updated = store
            .modify_device_assignment("a-1", &mut |a: &mut DeviceAssignment| {
                a.status = DeviceAssignmentStatus::Missing;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.status, DeviceAssignmentStatus::Missing);
        assert_eq!(store.list_device_assignments("dev-1").unwrap().len(), 1);

        let err = store
            .modify_device_assignment("a-404", &mut |_a: &mut DeviceAssignment| Ok(()))
            .unwrap_err();
        assert!(err.has_code(ErrorCode::InvalidDeviceAssignmentToken));

        assert!(store.remove_device_assignment("a-1").unwrap().is_some());
        assert!(store.get_device_assignment("a-1").unwrap().is_none());
    });
}

#[test]
fn test_events_and_streams() {
    with_stores(|store| {
        let event = DeviceEvent {
            id: "e-1".into(),
            hardware_id: "dev-1".into(),
            assignment_token: "a-1".into(),
            site_token: "site-1".into(),
            asset: None,
            event_date: Utc::now(),
            received_date: Utc::now(),
            payload: DeviceEventPayload::Location(Location {
                latitude: 33.75,
                longitude: -84.39,
                elevation: None,
            }),
            metadata: HashMap::new(),
        };
        store.add_device_event(event.clone()).unwrap();
        assert_eq!(store.get_device_event("e-1").unwrap(), Some(event));
        assert_eq!(store.list_device_events("a-1").unwrap().len(), 1);
        assert!(store.list_device_events("a-2").unwrap().is_empty());

        let chunk = DeviceStreamData {
            assignment_token: "a-1".into(),
            stream_id: "video".into(),
            sequence_number: 0,
            data: vec![1, 2, 3],
            received_date: Utc::now(),
        };
        let err = store.add_device_stream_data(chunk.clone()).unwrap_err();
        assert!(err.has_code(ErrorCode::InvalidStreamId));

        let stream = DeviceStream {
            assignment_token: "a-1".into(),
            stream_id: "video".into(),
            content_type: "video/h264".into(),
            metadata: HashMap::new(),
            created_date: Utc::now(),
        };
        store.create_device_stream(stream.clone()).unwrap();
        let err = store.create_device_stream(stream).unwrap_err();
        assert!(err.has_code(ErrorCode::DuplicateStreamId));

        store.add_device_stream_data(chunk).unwrap();
        let stored = store
            .get_device_stream_data("a-1", "video", 0)
            .unwrap()
            .unwrap();
        assert_eq!(stored.data, vec![1, 2, 3]);
        assert!(store
            .get_device_stream_data("a-1", "video", 1)
            .unwrap()
            .is_none());
    });
}

#[test]
fn test_redb_store_persists_across_reopen() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("fleetwire.redb");
    {
        let store = RedbDeviceStore::open(&path).unwrap();
        store
            .create_device(&DeviceCreateRequest::new("dev-1", "spec-1", "site-1"))
            .unwrap();
    }
    let store = RedbDeviceStore::open(&path).unwrap();
    let device = store.get_device("dev-1").unwrap().unwrap();
    assert_eq!(device.specification_token, "spec-1");
}
