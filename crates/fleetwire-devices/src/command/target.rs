//! Addressing information for outbound commands.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use fleetwire_core::error::Result;
use fleetwire_core::model::{Device, DeviceAssignment, DeviceCommand, DeviceCommandInvocation};
use fleetwire_core::DeviceManagement;

use super::system::SystemCommand;

/// Where a command physically goes.
///
/// A nested device is reached through its gateway (the composite device it
/// is mapped into); `path` is the slot it occupies there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NestingContext {
    pub gateway: Device,
    #[serde(default)]
    pub nested: Option<Device>,
    #[serde(default)]
    pub path: Option<String>,
}

impl NestingContext {
    /// Compute the nesting context for `device`.
    ///
    /// Falls back to addressing the device directly when its parent no
    /// longer exists.
    pub fn for_device(management: &dyn DeviceManagement, device: &Device) -> Result<Self> {
        if let Some(parent_id) = &device.parent_hardware_id {
            if let Some(parent) = management.get_device(parent_id)? {
                let path = parent
                    .device_element_mappings
                    .iter()
                    .find(|m| m.hardware_id == device.hardware_id)
                    .map(|m| m.schema_path.clone());
                return Ok(Self {
                    gateway: parent,
                    nested: Some(device.clone()),
                    path,
                });
            }
            tracing::warn!(
                hardware_id = %device.hardware_id,
                parent = %parent_id,
                "Parent device not found, addressing device directly"
            );
        }
        Ok(Self {
            gateway: device.clone(),
            nested: None,
            path: None,
        })
    }

    pub fn is_nested(&self) -> bool {
        self.nested.is_some()
    }
}

/// A resolved command recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandTarget {
    /// Device the command is for
    pub device: Device,
    /// Assignment the command is executed under, if the device has one
    #[serde(default)]
    pub assignment: Option<DeviceAssignment>,
    pub nesting: NestingContext,
}

impl CommandTarget {
    pub fn hardware_id(&self) -> &str {
        &self.device.hardware_id
    }

    pub fn specification_token(&self) -> &str {
        &self.device.specification_token
    }
}

/// A specification command bound to concrete parameter values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceCommandExecution {
    pub invocation: DeviceCommandInvocation,
    pub command: DeviceCommand,
    pub parameters: HashMap<String, String>,
}

impl DeviceCommandExecution {
    /// Bind invocation values to the command's declared parameters.
    ///
    /// Values for undeclared parameters are dropped.
    pub fn new(invocation: DeviceCommandInvocation, command: DeviceCommand) -> Self {
        let parameters = command
            .parameters
            .iter()
            .filter_map(|p| {
                invocation
                    .parameter_values
                    .get(&p.name)
                    .map(|v| (p.name.clone(), v.clone()))
            })
            .collect();
        Self {
            invocation,
            command,
            parameters,
        }
    }
}

/// Anything a router can deliver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "command")]
pub enum CommandPayload {
    Execution(DeviceCommandExecution),
    System(SystemCommand),
}

impl CommandPayload {
    pub fn description(&self) -> String {
        match self {
            Self::Execution(e) => format!("command {}", e.command.qualified_name()),
            Self::System(s) => format!("system command {}", s.type_name()),
        }
    }
}
