//! Device communication subsystem.
//!
//! Devices report telemetry and register themselves; the platform routes
//! commands back to them. This crate holds the moving parts in between:
//!
//! | Component | Role |
//! |-----------|------|
//! | [`InboundProcessingStrategy`] | Bounded queue and worker pool in front of the handlers |
//! | [`DispatchTable`] | Sends each request kind to its handler |
//! | [`RegistrationManager`] | Idempotent onboarding and element mapping requests |
//! | [`TelemetryHandler`] | Stores events and stream data against the current assignment |
//! | [`AssignmentLifecycle`] | Keeps one active assignment per device |
//! | [`DeviceElementMappings`] | Attaches component devices to composite devices |
//! | [`command`] | Target resolution, routing and delivery of outbound commands |
//!
//! Everything shares one [`CommunicationContext`], built once at startup.

pub mod assignment;
pub mod command;
pub mod communication;
pub mod context;
pub mod dispatch;
pub mod inbound;
pub mod mapping;
pub mod registration;
pub mod request;
pub mod telemetry;

pub use assignment::AssignmentLifecycle;
pub use communication::DeviceCommunication;
pub use context::{CommunicationContext, CommunicationContextBuilder};
pub use dispatch::{DispatchTable, InboundRequestHandler};
pub use inbound::{InboundMetrics, InboundProcessingStrategy};
pub use mapping::DeviceElementMappings;
pub use registration::RegistrationManager;
pub use request::{
    DecodedDeviceRequest, DeviceMappingRequest, DeviceRequest, EventRequest, MappingAction,
    RegistrationRequest, RequestKind, SendStreamDataRequest, StreamCreateRequest,
    StreamDataRequest,
};
pub use telemetry::TelemetryHandler;
