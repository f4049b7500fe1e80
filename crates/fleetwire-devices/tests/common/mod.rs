//! Shared fixtures for the device communication tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use fleetwire_core::model::*;
use fleetwire_core::{DeviceManagement, Result};
use fleetwire_devices::command::{SystemCommand, SystemCommandDelivery};
use fleetwire_devices::{CommunicationContext, InboundProcessingStrategy};
use fleetwire_storage::MemoryDeviceStore;

pub const SITE: &str = "site-1";
pub const SENSOR_SPEC: &str = "sensor";
pub const GATEWAY_SPEC: &str = "gateway";

/// System command sink that records what would have been sent.
#[derive(Default)]
pub struct RecordingSystemCommands {
    sent: Mutex<Vec<(String, SystemCommand)>>,
}

impl RecordingSystemCommands {
    pub fn sent(&self) -> Vec<(String, SystemCommand)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, hardware_id: &str) -> Vec<SystemCommand> {
        self.sent
            .lock()
            .iter()
            .filter(|(hw, _)| hw == hardware_id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl SystemCommandDelivery for RecordingSystemCommands {
    async fn deliver_system_command(&self, hardware_id: &str, command: SystemCommand) -> Result<()> {
        self.sent.lock().push((hardware_id.to_string(), command));
        Ok(())
    }
}

pub struct Fixture {
    pub store: Arc<MemoryDeviceStore>,
    pub context: Arc<CommunicationContext>,
    pub commands: Arc<RecordingSystemCommands>,
}

/// Store without any sites, with a standalone and a composite specification.
pub fn empty_store() -> Arc<MemoryDeviceStore> {
    let store = Arc::new(MemoryDeviceStore::new());
    store
        .create_device_specification(DeviceSpecification::new(SENSOR_SPEC, "Sensor"))
        .expect("Failed to create sensor specification");
    store
        .create_device_specification(DeviceSpecification::composite(
            GATEWAY_SPEC,
            "Gateway",
            DeviceElementSchema::with_slots(["slot1", "slot2"]),
        ))
        .expect("Failed to create gateway specification");
    store
}

/// [`empty_store`] plus one site.
pub fn seeded_store() -> Arc<MemoryDeviceStore> {
    let store = empty_store();
    store
        .create_site(Site::new(SITE, "Main site"))
        .expect("Failed to create site");
    store
}

pub fn fixture() -> Fixture {
    fixture_with_store(seeded_store())
}

pub fn fixture_with_store(store: Arc<MemoryDeviceStore>) -> Fixture {
    let commands = Arc::new(RecordingSystemCommands::default());
    let context = CommunicationContext::builder(store.clone(), store.clone())
        .with_system_commands(commands.clone())
        .build();
    Fixture {
        store,
        context,
        commands,
    }
}

/// Create a device directly in the store.
pub fn create_device(store: &MemoryDeviceStore, hardware_id: &str, specification: &str) -> Device {
    store
        .create_device(&DeviceCreateRequest::new(hardware_id, specification, SITE))
        .expect("Failed to create device")
}

/// Check that a device references an assignment exactly when it has an
/// active, non-deleted one.
pub fn assert_assignment_invariant(store: &MemoryDeviceStore) {
    for device in store.list_devices().expect("Failed to list devices") {
        let active: Vec<DeviceAssignment> = store
            .list_device_assignments(&device.hardware_id)
            .expect("Failed to list assignments")
            .into_iter()
            .filter(|a| a.is_active() && !a.deleted)
            .collect();
        match &device.assignment_token {
            Some(token) => {
                assert_eq!(active.len(), 1, "device {}", device.hardware_id);
                assert_eq!(&active[0].token, token);
            }
            None => assert!(active.is_empty(), "device {}", device.hardware_id),
        }
    }
}

/// Wait until the strategy has processed `count` requests.
pub async fn wait_for_processed(strategy: &InboundProcessingStrategy, count: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while strategy.metrics().processed_count < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {} processed requests: {}",
            count,
            strategy.metrics()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
