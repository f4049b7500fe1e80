//! Command target resolution.

use std::sync::Arc;

use async_trait::async_trait;

use fleetwire_core::error::Result;
use fleetwire_core::model::{DeviceAssignment, DeviceCommandInvocation};

use crate::assignment::AssignmentLifecycle;

/// Maps a command invocation to the assignments that should receive it.
#[async_trait]
pub trait CommandTargetResolver: Send + Sync {
    async fn resolve_command_assignments(
        &self,
        invocation: &DeviceCommandInvocation,
    ) -> Result<Vec<DeviceAssignment>>;
}

/// Targets the single assignment the invocation originated from.
pub struct DefaultCommandTargetResolver {
    assignments: Arc<AssignmentLifecycle>,
}

impl DefaultCommandTargetResolver {
    pub fn new(assignments: Arc<AssignmentLifecycle>) -> Self {
        Self { assignments }
    }
}

#[async_trait]
impl CommandTargetResolver for DefaultCommandTargetResolver {
    async fn resolve_command_assignments(
        &self,
        invocation: &DeviceCommandInvocation,
    ) -> Result<Vec<DeviceAssignment>> {
        let assignment = self
            .assignments
            .get_device_assignment(&invocation.assignment_token)?;
        Ok(vec![assignment])
    }
}
