//! Outbound command processing.

use std::sync::Arc;

use async_trait::async_trait;

use fleetwire_core::error::{Error, ErrorCode, Result};
use fleetwire_core::model::{Device, DeviceAssignment, DeviceCommandInvocation};
use fleetwire_core::storage::unknown_device;
use fleetwire_core::DeviceManagement;

use super::resolver::CommandTargetResolver;
use super::router::CommandRouter;
use super::system::{SystemCommand, SystemCommandDelivery};
use super::target::{CommandPayload, CommandTarget, DeviceCommandExecution, NestingContext};
use crate::assignment::AssignmentLifecycle;

/// Resolves targets for command invocations and routes them.
///
/// Also delivers system commands through the same router.
pub struct OutboundCommandProcessor {
    management: Arc<dyn DeviceManagement>,
    assignments: Arc<AssignmentLifecycle>,
    resolver: Arc<dyn CommandTargetResolver>,
    router: Arc<dyn CommandRouter>,
}

impl OutboundCommandProcessor {
    pub fn new(
        management: Arc<dyn DeviceManagement>,
        assignments: Arc<AssignmentLifecycle>,
        resolver: Arc<dyn CommandTargetResolver>,
        router: Arc<dyn CommandRouter>,
    ) -> Self {
        Self {
            management,
            assignments,
            resolver,
            router,
        }
    }

    /// Route an invocation to every resolved assignment.
    ///
    /// Returns the number of targets the command was routed to.
    pub async fn process_invocation(&self, invocation: &DeviceCommandInvocation) -> Result<usize> {
        let command = self
            .management
            .get_device_command(&invocation.command_token)?
            .ok_or_else(|| {
                Error::reference(
                    ErrorCode::InvalidCommandToken,
                    format!("command {} not found", invocation.command_token),
                )
            })?;

        let assignments = self.resolver.resolve_command_assignments(invocation).await?;
        let payload =
            CommandPayload::Execution(DeviceCommandExecution::new(invocation.clone(), command));

        for assignment in &assignments {
            let target = self.target_for_assignment(assignment)?;
            self.router.route_command(&payload, &target).await?;
        }

        tracing::debug!(
            invocation = %invocation.id,
            targets = assignments.len(),
            "Processed command invocation"
        );
        Ok(assignments.len())
    }

    fn target_for_assignment(&self, assignment: &DeviceAssignment) -> Result<CommandTarget> {
        let device = self
            .management
            .get_device(&assignment.device_hardware_id)?
            .ok_or_else(|| unknown_device(&assignment.device_hardware_id))?;
        let nesting = NestingContext::for_device(self.management.as_ref(), &device)?;
        Ok(CommandTarget {
            device,
            assignment: Some(assignment.clone()),
            nesting,
        })
    }

    /// Target for a system command. Devices that are not registered yet are
    /// addressed directly by hardware id.
    fn target_for_device(&self, hardware_id: &str) -> Result<CommandTarget> {
        let device = match self.management.get_device(hardware_id)? {
            Some(device) => device,
            None => Device::unregistered(hardware_id),
        };
        let assignment = match &device.assignment_token {
            Some(token) => self.assignments.find_device_assignment(token)?,
            None => None,
        };
        let nesting = NestingContext::for_device(self.management.as_ref(), &device)?;
        Ok(CommandTarget {
            device,
            assignment,
            nesting,
        })
    }
}

#[async_trait]
impl SystemCommandDelivery for OutboundCommandProcessor {
    async fn deliver_system_command(
        &self,
        hardware_id: &str,
        command: SystemCommand,
    ) -> Result<()> {
        let target = self.target_for_device(hardware_id)?;
        self.router
            .route_command(&CommandPayload::System(command), &target)
            .await
    }
}
