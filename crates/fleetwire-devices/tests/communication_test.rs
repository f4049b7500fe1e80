//! End-to-end tests through the device communication subsystem: requests
//! are enqueued, dispatched by kind and stored.

mod common;

use chrono::{Duration as ChronoDuration, Utc};

use common::*;
use fleetwire_core::config::{FleetwireConfig, InboundConfig};
use fleetwire_core::model::*;
use fleetwire_core::{DeviceEventManagement, DeviceManagement};
use fleetwire_devices::command::SystemCommand;
use fleetwire_devices::{
    DecodedDeviceRequest, DeviceCommunication, DeviceRequest, EventRequest, SendStreamDataRequest,
    StreamCreateRequest, StreamDataRequest,
};

/// Single worker so requests are handled in submission order.
fn sequential_config() -> FleetwireConfig {
    FleetwireConfig {
        inbound: InboundConfig {
            queue_capacity: 64,
            worker_count: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn communication(fixture: &Fixture) -> DeviceCommunication {
    let communication = DeviceCommunication::new(fixture.context.clone(), &sequential_config());
    communication.start().expect("Failed to start communication");
    communication
}

fn current_assignment(fixture: &Fixture, hardware_id: &str) -> DeviceAssignment {
    let token = fixture
        .store
        .get_device(hardware_id)
        .unwrap()
        .and_then(|d| d.assignment_token)
        .expect("device should be assigned");
    fixture.store.get_device_assignment(&token).unwrap().unwrap()
}

#[tokio::test]
async fn test_telemetry_is_stored_against_assignment() {
    let fixture = fixture();
    let communication = communication(&fixture);
    let reported = Utc::now() - ChronoDuration::minutes(5);

    let requests = vec![
        DecodedDeviceRequest::registration("dev-1", SENSOR_SPEC, None),
        DecodedDeviceRequest::measurements("dev-1", [("temp", 21.0), ("rpm", 900.0)]),
        DecodedDeviceRequest::measurements("dev-1", [("temp", 22.5)]),
        DecodedDeviceRequest::new(
            "dev-1",
            DeviceRequest::Location(
                EventRequest::new(Location {
                    latitude: 33.75,
                    longitude: -84.39,
                    elevation: None,
                })
                .with_event_date(reported),
            ),
        ),
        DecodedDeviceRequest::new(
            "dev-1",
            DeviceRequest::Alert(EventRequest::new(Alert {
                source: AlertSource::Device,
                level: AlertLevel::Warning,
                alert_type: "engine.overheat".to_string(),
                message: "Engine temperature high".to_string(),
            })),
        ),
    ];
    let total = requests.len() as u64;
    for request in requests {
        communication.enqueue(request).await.unwrap();
    }
    wait_for_processed(communication.strategy(), total).await;
    assert_eq!(communication.metrics().error_count, 0);

    let assignment = current_assignment(&fixture, "dev-1");
    let events = fixture.store.list_device_events(&assignment.token).unwrap();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.site_token == SITE));
    assert!(events.iter().all(|e| e.hardware_id == "dev-1"));

    let location = events
        .iter()
        .find(|e| matches!(e.payload, DeviceEventPayload::Location(_)))
        .expect("location event should be stored");
    assert_eq!(location.event_date, reported);
    assert!(location.received_date > reported);

    let state = &assignment.state;
    assert_eq!(state.latest_measurements.get("temp"), Some(&22.5));
    assert_eq!(state.latest_measurements.get("rpm"), Some(&900.0));
    assert_eq!(state.last_location.map(|l| l.latitude), Some(33.75));
    assert_eq!(
        state.latest_alerts.get("engine.overheat").map(String::as_str),
        Some("Engine temperature high")
    );
    assert!(state.last_interaction_date.is_some());

    communication.stop().await;
}

#[tokio::test]
async fn test_telemetry_from_unknown_or_unassigned_device_fails() {
    let fixture = fixture();
    let communication = communication(&fixture);

    communication
        .enqueue(DecodedDeviceRequest::measurements("ghost", [("temp", 1.0)]))
        .await
        .unwrap();
    communication
        .enqueue(DecodedDeviceRequest::registration("dev-1", SENSOR_SPEC, None))
        .await
        .unwrap();
    wait_for_processed(communication.strategy(), 2).await;
    assert_eq!(communication.metrics().error_count, 1);

    let token = current_assignment(&fixture, "dev-1").token;
    fixture
        .context
        .assignments
        .end_device_assignment(&token)
        .unwrap();
    communication
        .enqueue(DecodedDeviceRequest::measurements("dev-1", [("temp", 1.0)]))
        .await
        .unwrap();
    wait_for_processed(communication.strategy(), 3).await;

    assert_eq!(communication.metrics().error_count, 2);
    assert!(fixture.store.list_device_events(&token).unwrap().is_empty());

    communication.stop().await;
}

#[tokio::test]
async fn test_stream_data_round_trip() {
    let fixture = fixture();
    let communication = communication(&fixture);

    let requests = vec![
        DecodedDeviceRequest::registration("dev-1", SENSOR_SPEC, None),
        DecodedDeviceRequest::new(
            "dev-1",
            DeviceRequest::Stream(StreamCreateRequest {
                stream_id: "firmware".to_string(),
                content_type: "application/octet-stream".to_string(),
                metadata: Default::default(),
            }),
        ),
        DecodedDeviceRequest::new(
            "dev-1",
            DeviceRequest::StreamData(StreamDataRequest {
                stream_id: "firmware".to_string(),
                sequence_number: 0,
                data: vec![0xde, 0xad, 0xbe, 0xef],
            }),
        ),
        DecodedDeviceRequest::new(
            "dev-1",
            DeviceRequest::SendStreamData(SendStreamDataRequest {
                stream_id: "firmware".to_string(),
                sequence_number: 0,
            }),
        ),
        DecodedDeviceRequest::new(
            "dev-1",
            DeviceRequest::SendStreamData(SendStreamDataRequest {
                stream_id: "firmware".to_string(),
                sequence_number: 7,
            }),
        ),
        // Chunks for unknown streams are rejected
        DecodedDeviceRequest::new(
            "dev-1",
            DeviceRequest::StreamData(StreamDataRequest {
                stream_id: "missing".to_string(),
                sequence_number: 0,
                data: vec![1],
            }),
        ),
    ];
    for request in requests {
        communication.enqueue(request).await.unwrap();
    }
    wait_for_processed(communication.strategy(), 6).await;
    assert_eq!(communication.metrics().error_count, 1);

    let token = current_assignment(&fixture, "dev-1").token;
    let stream = fixture
        .store
        .get_device_stream(&token, "firmware")
        .unwrap()
        .expect("stream should exist");
    assert_eq!(stream.content_type, "application/octet-stream");

    let chunks: Vec<SystemCommand> = fixture
        .commands
        .sent_to("dev-1")
        .into_iter()
        .filter(|c| matches!(c, SystemCommand::SendDeviceStreamData { .. }))
        .collect();
    assert_eq!(
        chunks,
        vec![
            SystemCommand::SendDeviceStreamData {
                stream_id: "firmware".to_string(),
                sequence_number: 0,
                data: vec![0xde, 0xad, 0xbe, 0xef],
            },
            SystemCommand::SendDeviceStreamData {
                stream_id: "firmware".to_string(),
                sequence_number: 7,
                data: vec![],
            },
        ]
    );

    communication.stop().await;
}
