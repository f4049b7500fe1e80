//! Domain model.

pub mod assignment;
pub mod device;
pub mod event;
pub mod site;
pub mod specification;

pub use assignment::{
    AssetReference, DeviceAssignment, DeviceAssignmentCreateRequest, DeviceAssignmentState,
    DeviceAssignmentStatus, DeviceAssignmentType, DeviceAssignmentUpdate, LocationSnapshot,
};
pub use device::{Device, DeviceCreateRequest, DeviceElementMapping, DeviceStatus};
pub use event::{
    Alert, AlertLevel, AlertSource, CommandResponse, DeviceCommandInvocation, DeviceEvent,
    DeviceEventPayload, DeviceStream, DeviceStreamData, Location, Measurements, StateChange,
};
pub use site::Site;
pub use specification::{
    CommandParameter, DeviceCommand, DeviceContainerPolicy, DeviceElementSchema,
    DeviceSpecification, DeviceSlot, DeviceUnit, ParameterType,
};
