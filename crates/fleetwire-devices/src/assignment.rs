//! Device assignment lifecycle.
//!
//! Maintains the invariant that a device's `assignment_token` is set exactly
//! when one of its (non-deleted) assignments is `Active`. Status only moves
//! forward: `Active -> Missing -> Released`, with `Released` terminal.
//! Leaving `Active` clears the device's back-reference.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use fleetwire_core::error::{Error, ErrorCode, Result};
use fleetwire_core::model::{
    DeviceAssignment, DeviceAssignmentCreateRequest, DeviceAssignmentState,
    DeviceAssignmentStatus, DeviceAssignmentUpdate, DeviceEvent, DeviceEventPayload,
    LocationSnapshot,
};
use fleetwire_core::persistence;
use fleetwire_core::storage::unknown_device;
use fleetwire_core::DeviceManagement;
use fleetwire_storage::AssignmentCache;

fn unknown_assignment(token: &str) -> Error {
    Error::reference(
        ErrorCode::InvalidDeviceAssignmentToken,
        format!("assignment {} not found", token),
    )
}

/// Create, update, end and delete assignments.
pub struct AssignmentLifecycle {
    management: Arc<dyn DeviceManagement>,
    /// Write-through cache; refreshed after every successful write
    cache: Option<Arc<AssignmentCache>>,
}

impl AssignmentLifecycle {
    pub fn new(management: Arc<dyn DeviceManagement>) -> Self {
        Self {
            management,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<AssignmentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<AssignmentCache>> {
        self.cache.as_ref()
    }

    fn cache_put(&self, assignment: &DeviceAssignment) {
        if let Some(cache) = &self.cache {
            cache.put(assignment);
        }
    }

    /// Create an Active assignment for an unassigned device.
    ///
    /// The device record is claimed with a conditional write on its current
    /// assignment token, so two concurrent creates for one device cannot both
    /// succeed.
    pub fn create_device_assignment(
        &self,
        request: &DeviceAssignmentCreateRequest,
    ) -> Result<DeviceAssignment> {
        let hardware_id = &request.device_hardware_id;
        let device = self
            .management
            .get_device(hardware_id)?
            .ok_or_else(|| unknown_device(hardware_id))?;
        if let Some(current) = &device.assignment_token {
            return Err(Error::conflict(
                ErrorCode::DeviceAlreadyAssigned,
                format!("device {} is assigned to {}", hardware_id, current),
            ));
        }

        let assignment = persistence::assignment_create_logic(request, &device)?;
        self.management
            .swap_device_assignment(hardware_id, None, Some(&assignment.token))?;

        let token = assignment.token.clone();
        match self.management.insert_device_assignment(assignment) {
            Ok(created) => {
                self.cache_put(&created);
                tracing::info!(
                    hardware_id = %hardware_id,
                    assignment = %created.token,
                    "Created device assignment"
                );
                Ok(created)
            }
            Err(e) => {
                if let Err(revert) =
                    self.management
                        .swap_device_assignment(hardware_id, Some(&token), None)
                {
                    tracing::error!(
                        hardware_id = %hardware_id,
                        assignment = %token,
                        "Failed to release device after assignment insert failed: {}",
                        revert
                    );
                }
                Err(e)
            }
        }
    }

    /// Look up an assignment, reading through the cache.
    pub fn find_device_assignment(&self, token: &str) -> Result<Option<DeviceAssignment>> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(token)) {
            return Ok(Some(cached));
        }
        let found = self.management.get_device_assignment(token)?;
        if let Some(assignment) = &found {
            self.cache_put(assignment);
        }
        Ok(found)
    }

    /// Like [`find_device_assignment`](Self::find_device_assignment) but
    /// fails with `InvalidDeviceAssignmentToken` when absent.
    pub fn get_device_assignment(&self, token: &str) -> Result<DeviceAssignment> {
        self.find_device_assignment(token)?
            .ok_or_else(|| unknown_assignment(token))
    }

    /// Current assignment of a device, if any.
    pub fn get_current_assignment(&self, hardware_id: &str) -> Result<Option<DeviceAssignment>> {
        let device = self
            .management
            .get_device(hardware_id)?
            .ok_or_else(|| unknown_device(hardware_id))?;
        match &device.assignment_token {
            Some(token) => self.find_device_assignment(token),
            None => Ok(None),
        }
    }

    /// Read-modify-write update. Only fields set in `update` override stored values.
    pub fn update_device_assignment(
        &self,
        token: &str,
        update: &DeviceAssignmentUpdate,
    ) -> Result<DeviceAssignment> {
        let mut left_active = false;
        let updated = self.management.modify_device_assignment(
            token,
            &mut |assignment: &mut DeviceAssignment| {
                left_active = false;
                if let Some(status) = update.status {
                    if !assignment.status.can_transition_to(status) {
                        return Err(Error::validation(
                            ErrorCode::InvalidAssignmentStatusTransition,
                            format!(
                                "assignment {} can not move from {:?} to {:?}",
                                assignment.token, assignment.status, status
                            ),
                        ));
                    }
                    if status != assignment.status {
                        left_active = assignment.status == DeviceAssignmentStatus::Active;
                        if status == DeviceAssignmentStatus::Released {
                            assignment.released_date = Some(Utc::now());
                        }
                        assignment.status = status;
                    }
                }
                if let Some(metadata) = &update.metadata {
                    assignment.metadata = metadata.clone();
                }
                if let Some(state) = &update.state {
                    assignment.state = state.clone();
                }
                assignment.updated_date = Some(Utc::now());
                Ok(())
            },
        )?;
        self.cache_put(&updated);

        // Re-run on repeated status updates so a failed earlier release can be retried
        if update.status.is_some() && !updated.is_active() {
            self.release_device(&updated)?;
        }
        if left_active {
            tracing::info!(
                hardware_id = %updated.device_hardware_id,
                assignment = %updated.token,
                status = ?updated.status,
                "Device assignment is no longer active"
            );
        }
        Ok(updated)
    }

    pub fn update_device_assignment_metadata(
        &self,
        token: &str,
        metadata: HashMap<String, String>,
    ) -> Result<DeviceAssignment> {
        self.update_device_assignment(
            token,
            &DeviceAssignmentUpdate {
                metadata: Some(metadata),
                ..Default::default()
            },
        )
    }

    pub fn update_device_assignment_status(
        &self,
        token: &str,
        status: DeviceAssignmentStatus,
    ) -> Result<DeviceAssignment> {
        self.update_device_assignment(
            token,
            &DeviceAssignmentUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
    }

    pub fn update_device_assignment_state(
        &self,
        token: &str,
        state: DeviceAssignmentState,
    ) -> Result<DeviceAssignment> {
        self.update_device_assignment(
            token,
            &DeviceAssignmentUpdate {
                state: Some(state),
                ..Default::default()
            },
        )
    }

    /// Fold an event into the assignment's rolling state in one atomic update.
    pub fn record_device_event(&self, event: &DeviceEvent) -> Result<DeviceAssignment> {
        let updated = self.management.modify_device_assignment(
            &event.assignment_token,
            &mut |assignment: &mut DeviceAssignment| {
                apply_event(&mut assignment.state, event);
                Ok(())
            },
        )?;
        self.cache_put(&updated);
        Ok(updated)
    }

    /// Release the assignment and free the device for a new one.
    pub fn end_device_assignment(&self, token: &str) -> Result<DeviceAssignment> {
        self.update_device_assignment_status(token, DeviceAssignmentStatus::Released)
    }

    /// Delete an assignment.
    ///
    /// Soft delete keeps the record with its deleted marker; `force` removes
    /// it. Either way the device back-reference is cleared if it still points
    /// at this assignment.
    pub fn delete_device_assignment(&self, token: &str, force: bool) -> Result<DeviceAssignment> {
        let deleted = if force {
            let removed = self
                .management
                .remove_device_assignment(token)?
                .ok_or_else(|| unknown_assignment(token))?;
            if let Some(cache) = &self.cache {
                cache.invalidate(token);
            }
            removed
        } else {
            let updated = self.management.modify_device_assignment(
                token,
                &mut |assignment: &mut DeviceAssignment| {
                    assignment.deleted = true;
                    assignment.updated_date = Some(Utc::now());
                    Ok(())
                },
            )?;
            self.cache_put(&updated);
            updated
        };

        self.release_device(&deleted)?;
        tracing::info!(
            hardware_id = %deleted.device_hardware_id,
            assignment = %token,
            force,
            "Deleted device assignment"
        );
        Ok(deleted)
    }

    /// Clear the device's back-reference, tolerating a missing device or a
    /// reference that was already cleared.
    fn release_device(&self, assignment: &DeviceAssignment) -> Result<()> {
        let released = self
            .management
            .clear_device_assignment(&assignment.device_hardware_id, &assignment.token)
            .map_err(|e| {
                tracing::error!(
                    hardware_id = %assignment.device_hardware_id,
                    assignment = %assignment.token,
                    "Failed to clear device assignment reference: {}",
                    e
                );
                e
            })?;
        if released.is_none() {
            tracing::debug!(
                hardware_id = %assignment.device_hardware_id,
                "Device of assignment no longer exists"
            );
        }
        Ok(())
    }
}

fn apply_event(state: &mut DeviceAssignmentState, event: &DeviceEvent) {
    state.last_interaction_date = Some(event.received_date);
    match &event.payload {
        DeviceEventPayload::Measurements(m) => {
            for (name, value) in &m.values {
                state.latest_measurements.insert(name.clone(), *value);
            }
        }
        DeviceEventPayload::Location(l) => {
            state.last_location = Some(LocationSnapshot {
                latitude: l.latitude,
                longitude: l.longitude,
                elevation: l.elevation,
            });
        }
        DeviceEventPayload::Alert(a) => {
            state
                .latest_alerts
                .insert(a.alert_type.clone(), a.message.clone());
        }
        DeviceEventPayload::StateChange(_) | DeviceEventPayload::CommandResponse(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwire_core::model::{DeviceCreateRequest, Measurements};
    use fleetwire_storage::MemoryDeviceStore;

    fn lifecycle() -> AssignmentLifecycle {
        let store = Arc::new(MemoryDeviceStore::new());
        store
            .create_device(&DeviceCreateRequest::new("dev-1", "spec-1", "site-1"))
            .unwrap();
        AssignmentLifecycle::new(store)
    }

    #[test]
    fn test_released_is_terminal() {
        let lifecycle = lifecycle();
        let a = lifecycle
            .create_device_assignment(&DeviceAssignmentCreateRequest::unassociated("dev-1"))
            .unwrap();
        let ended = lifecycle.end_device_assignment(&a.token).unwrap();
        assert!(ended.released_date.is_some());

        let err = lifecycle
            .update_device_assignment_status(&a.token, DeviceAssignmentStatus::Active)
            .unwrap_err();
        assert!(err.has_code(ErrorCode::InvalidAssignmentStatusTransition));

        // Ending twice is a no-op
        let again = lifecycle.end_device_assignment(&a.token).unwrap();
        assert_eq!(again.released_date, ended.released_date);
    }

    #[test]
    fn test_apply_event_merges_measurements() {
        let mut state = DeviceAssignmentState::default();
        state.latest_measurements.insert("temp".into(), 20.0);
        let event = DeviceEvent {
            id: "e".into(),
            hardware_id: "dev-1".into(),
            assignment_token: "a".into(),
            site_token: "s".into(),
            asset: None,
            event_date: Utc::now(),
            received_date: Utc::now(),
            payload: DeviceEventPayload::Measurements(Measurements {
                values: [("rpm".to_string(), 900.0)].into_iter().collect(),
            }),
            metadata: HashMap::new(),
        };
        apply_event(&mut state, &event);
        assert_eq!(state.latest_measurements.len(), 2);
        assert_eq!(state.last_interaction_date, Some(event.received_date));
    }
}
