//! Device specifications, element schemas and commands.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether devices of a specification can contain nested devices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum DeviceContainerPolicy {
    #[default]
    Standalone,
    Composite,
}

/// A named slot a component device can occupy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSlot {
    pub name: String,
    /// Path segment used to address the slot
    pub path: String,
}

impl DeviceSlot {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// A grouping of slots and further units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeviceUnit {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub device_slots: Vec<DeviceSlot>,
    #[serde(default)]
    pub device_units: Vec<DeviceUnit>,
}

/// Element schema of a composite specification.
///
/// Slot paths are written `unit/unit/.../slot`; a slot at the top level is
/// addressed by its own path segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeviceElementSchema {
    #[serde(default)]
    pub device_slots: Vec<DeviceSlot>,
    #[serde(default)]
    pub device_units: Vec<DeviceUnit>,
}

impl DeviceElementSchema {
    /// Schema with only top-level slots.
    pub fn with_slots<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            device_slots: paths
                .into_iter()
                .map(|p| {
                    let p = p.into();
                    DeviceSlot::new(p.clone(), p)
                })
                .collect(),
            device_units: Vec::new(),
        }
    }

    /// Resolve a slot path against the schema.
    pub fn resolve_slot(&self, path: &str) -> Option<&DeviceSlot> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (slot, units) = segments.split_last()?;

        let mut current_slots = &self.device_slots;
        let mut current_units = &self.device_units;
        for segment in units {
            let unit = current_units.iter().find(|u| u.path == *segment)?;
            current_slots = &unit.device_slots;
            current_units = &unit.device_units;
        }
        current_slots.iter().find(|s| s.path == *slot)
    }
}

/// Template describing a device's commands and, for composite devices, its
/// element schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSpecification {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub container_policy: DeviceContainerPolicy,
    /// Present when `container_policy == Composite`
    #[serde(default)]
    pub device_element_schema: Option<DeviceElementSchema>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_date: DateTime<Utc>,
}

impl DeviceSpecification {
    /// Standalone specification.
    pub fn new(token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            container_policy: DeviceContainerPolicy::Standalone,
            device_element_schema: None,
            metadata: HashMap::new(),
            created_date: Utc::now(),
        }
    }

    /// Composite specification with the given schema.
    pub fn composite(
        token: impl Into<String>,
        name: impl Into<String>,
        schema: DeviceElementSchema,
    ) -> Self {
        Self {
            container_policy: DeviceContainerPolicy::Composite,
            device_element_schema: Some(schema),
            ..Self::new(token, name)
        }
    }

    pub fn is_composite(&self) -> bool {
        self.container_policy == DeviceContainerPolicy::Composite
    }
}

/// Parameter types accepted by a device command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Bool,
    Int64,
    Double,
    Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
}

/// A command defined by a specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceCommand {
    pub token: String,
    pub specification_token: String,
    /// Namespace; name must be unique within it for a specification
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DeviceCommand {
    /// Fully qualified name used for uniqueness checks.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}
