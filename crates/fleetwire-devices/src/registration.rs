//! Registration manager: idempotent onboarding of devices.
//!
//! Registration input is device-asserted and untrusted. The manager decides
//! in a fixed order:
//!
//! 1. Unknown device: reject when new devices are not allowed or the
//!    specification is unknown; silently drop when an explicit site does not
//!    resolve; require a site unless auto-assignment is enabled; otherwise
//!    create the device.
//! 2. Known device with a different specification: reject, no mutation.
//! 3. Known device with the same specification: replace its metadata.
//!
//! Every created or re-registered device ends up with a current assignment,
//! and every branch except the silent drop sends exactly one command back.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use fleetwire_core::config::RegistrationConfig;
use fleetwire_core::error::{Error, ErrorCode, Result};
use fleetwire_core::model::{
    Device, DeviceAssignmentCreateRequest, DeviceCreateRequest, DeviceElementMapping,
};

use crate::command::{
    DeviceMappingResult, RegistrationAckReason, RegistrationFailureReason, SystemCommand,
};
use crate::context::CommunicationContext;
use crate::dispatch::InboundRequestHandler;
use crate::request::{
    DecodedDeviceRequest, DeviceMappingRequest, DeviceRequest, MappingAction, RegistrationRequest,
};

/// Result of evaluating a registration request.
#[derive(Debug)]
enum Decision {
    Registered(Device, RegistrationAckReason),
    Rejected(RegistrationFailureReason, String),
    /// Nothing is sent back to the device
    Dropped,
}

/// Consumes registration and mapping requests.
pub struct RegistrationManager {
    context: Arc<CommunicationContext>,
    config: RegistrationConfig,
    /// Site used for auto-assignment, resolved on first use
    auto_assign_site_token: RwLock<Option<String>>,
}

impl RegistrationManager {
    pub fn new(context: Arc<CommunicationContext>, config: RegistrationConfig) -> Self {
        let configured = config.auto_assign_site_token.clone();
        Self {
            context,
            config,
            auto_assign_site_token: RwLock::new(configured),
        }
    }

    /// Verify the auto-assignment site.
    ///
    /// A configured site token must resolve; without one the first site is
    /// resolved up front when any exists.
    pub fn start(&self) -> Result<()> {
        if !self.config.auto_assign_site {
            return Ok(());
        }
        let management = &self.context.device_management;
        match self.config.auto_assign_site_token.as_deref() {
            Some(token) => {
                if management.get_site(token)?.is_none() {
                    return Err(Error::reference(
                        ErrorCode::InvalidSiteToken,
                        format!("auto-assign site {} does not exist", token),
                    ));
                }
                tracing::info!(site = %token, "Registration manager using configured site");
            }
            None => match management.first_site()? {
                Some(site) => {
                    tracing::info!(site = %site.token, "Registration manager using first site");
                    *self.auto_assign_site_token.write() = Some(site.token);
                }
                None => tracing::warn!(
                    "No sites exist; registrations without a site token will fail until one is created"
                ),
            },
        }
        Ok(())
    }

    /// Forget the memoized auto-assignment site.
    pub fn reset_auto_assign_site(&self) {
        *self.auto_assign_site_token.write() = self.config.auto_assign_site_token.clone();
    }

    /// Currently memoized auto-assignment site.
    pub fn auto_assign_site_token(&self) -> Option<String> {
        self.auto_assign_site_token.read().clone()
    }

    fn resolve_auto_assign_site(&self) -> Result<String> {
        if let Some(token) = self.auto_assign_site_token.read().clone() {
            return Ok(token);
        }
        let site = self
            .context
            .device_management
            .first_site()?
            .ok_or_else(|| {
                Error::Processing("no sites exist for automatic site assignment".to_string())
            })?;

        let mut memoized = self.auto_assign_site_token.write();
        // Another worker may have resolved it first
        Ok(memoized.get_or_insert(site.token).clone())
    }

    /// Process a registration request from `hardware_id`.
    pub async fn handle_registration(
        &self,
        hardware_id: &str,
        request: &RegistrationRequest,
    ) -> Result<()> {
        let decision = match self.context.device_management.get_device(hardware_id)? {
            None => self.register_new_device(hardware_id, request)?,
            Some(device) => self.reregister_device(device, request)?,
        };

        let command = match decision {
            Decision::Dropped => return Ok(()),
            Decision::Rejected(reason, message) => {
                tracing::info!(
                    hardware_id = %hardware_id,
                    reason = ?reason,
                    "Registration rejected: {}",
                    message
                );
                SystemCommand::registration_failure(reason, message)
            }
            Decision::Registered(device, reason) => {
                self.ensure_assignment(&device)?;
                tracing::info!(hardware_id = %hardware_id, reason = ?reason, "Device registered");
                SystemCommand::RegistrationAck { reason }
            }
        };

        self.context
            .system_commands
            .deliver_system_command(hardware_id, command)
            .await
    }

    fn register_new_device(
        &self,
        hardware_id: &str,
        request: &RegistrationRequest,
    ) -> Result<Decision> {
        let management = &self.context.device_management;

        if !self.config.allow_new_devices {
            return Ok(Decision::Rejected(
                RegistrationFailureReason::NewDevicesNotAllowed,
                "New devices are not allowed to register".to_string(),
            ));
        }

        if management
            .get_device_specification(&request.specification_token)?
            .is_none()
        {
            return Ok(Decision::Rejected(
                RegistrationFailureReason::InvalidSpecificationToken,
                format!(
                    "Specification token {} is not valid",
                    request.specification_token
                ),
            ));
        }

        let site_token = match &request.site_token {
            Some(token) => {
                if management.get_site(token)?.is_none() {
                    tracing::warn!(
                        hardware_id = %hardware_id,
                        site = %token,
                        "Dropping registration with unknown site token"
                    );
                    return Ok(Decision::Dropped);
                }
                token.clone()
            }
            None if !self.config.auto_assign_site => {
                return Ok(Decision::Rejected(
                    RegistrationFailureReason::SiteTokenRequired,
                    "Automatic site assignment disabled and no site token provided".to_string(),
                ));
            }
            None => self.resolve_auto_assign_site()?,
        };

        let create = DeviceCreateRequest::new(
            hardware_id,
            request.specification_token.clone(),
            site_token,
        )
        .with_metadata(request.metadata.clone());
        let device = management.create_device(&create)?;
        Ok(Decision::Registered(
            device,
            RegistrationAckReason::NewRegistration,
        ))
    }

    fn reregister_device(&self, device: Device, request: &RegistrationRequest) -> Result<Decision> {
        if device.specification_token != request.specification_token {
            return Ok(Decision::Rejected(
                RegistrationFailureReason::InvalidSpecificationToken,
                format!(
                    "Device {} is registered with a different specification",
                    device.hardware_id
                ),
            ));
        }

        let update = DeviceCreateRequest {
            metadata: Some(request.metadata.clone()),
            ..Default::default()
        };
        let device = self
            .context
            .device_management
            .update_device(&device.hardware_id, &update)?;
        Ok(Decision::Registered(
            device,
            RegistrationAckReason::AlreadyRegistered,
        ))
    }

    /// Give the device an Unassociated assignment if it has none.
    fn ensure_assignment(&self, device: &Device) -> Result<()> {
        if device.is_assigned() {
            return Ok(());
        }
        let request = DeviceAssignmentCreateRequest::unassociated(device.hardware_id.clone());
        match self.context.assignments.create_device_assignment(&request) {
            Ok(_) => Ok(()),
            // A concurrent registration assigned it first
            Err(e) if e.has_code(ErrorCode::DeviceAlreadyAssigned) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Process a mapping request sent by the composite device `hardware_id`.
    pub async fn handle_device_mapping(
        &self,
        hardware_id: &str,
        request: &DeviceMappingRequest,
    ) -> Result<()> {
        let mappings = &self.context.mappings;
        let (outcome, success) = match request.action {
            MappingAction::Create => (
                mappings.create_device_element_mapping(
                    hardware_id,
                    &DeviceElementMapping::new(&request.hardware_id, &request.schema_path),
                ),
                DeviceMappingResult::MappingCreated,
            ),
            MappingAction::Delete => (
                mappings.delete_device_element_mapping(hardware_id, &request.schema_path),
                DeviceMappingResult::MappingDeleted,
            ),
        };

        let command = match outcome {
            Ok(_) => SystemCommand::DeviceMappingAck {
                result: success,
                message: None,
            },
            Err(e) => {
                let result = if e.has_code(ErrorCode::DeviceElementMappingExists)
                    || e.has_code(ErrorCode::DeviceParentMappingExists)
                {
                    DeviceMappingResult::MappingFailedDueToExisting
                } else {
                    DeviceMappingResult::MappingFailed
                };
                tracing::info!(
                    hardware_id = %hardware_id,
                    component = %request.hardware_id,
                    path = %request.schema_path,
                    "Device mapping failed: {}",
                    e
                );
                SystemCommand::DeviceMappingAck {
                    result,
                    message: Some(e.to_string()),
                }
            }
        };

        self.context
            .system_commands
            .deliver_system_command(hardware_id, command)
            .await
    }
}

#[async_trait]
impl InboundRequestHandler for RegistrationManager {
    async fn handle(&self, request: DecodedDeviceRequest) -> Result<()> {
        match &request.request {
            DeviceRequest::Registration(registration) => {
                self.handle_registration(&request.hardware_id, registration)
                    .await
            }
            DeviceRequest::Mapping(mapping) => {
                self.handle_device_mapping(&request.hardware_id, mapping)
                    .await
            }
            other => Err(Error::Processing(format!(
                "registration manager can not handle {} requests",
                other.kind()
            ))),
        }
    }
}
