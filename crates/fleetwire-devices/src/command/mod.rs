//! Outbound commands: system commands, target resolution, routing and
//! destinations.

pub mod destination;
pub mod processor;
pub mod resolver;
pub mod router;
pub mod system;
pub mod target;

pub use destination::{
    CommandDeliveryProvider, CommandDestination, CommandExecutionEncoder,
    EncodedCommandDestination, JsonCommandEncoder, LoggingDeliveryProvider, LOG_DESTINATION_ID,
};
pub use processor::OutboundCommandProcessor;
pub use resolver::{CommandTargetResolver, DefaultCommandTargetResolver};
pub use router::{router_from_config, CommandRouter, NoOpCommandRouter, SpecificationMappingRouter};
pub use system::{
    DeviceMappingResult, RegistrationAckReason, RegistrationFailureReason, SystemCommand,
    SystemCommandDelivery,
};
pub use target::{CommandPayload, CommandTarget, DeviceCommandExecution, NestingContext};
