// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Role Propagation Service
//!
//! Event selection and per-identity provisioning.
//!
//! ## Event selection
//!
//! Events are visited oldest first. An event is dropped (and deleted) when its
//! role is gone or flagged for deletion, or when no identity holds the role.
//! The first valid event is returned together with the ids still queued.
//!
//! ## Skip lists
//!
//! An identity that failed for an older event is *skipped* for newer events of
//! the same run so that role changes reach it in order. Skipped identities are
//! retried once the older event has gone through for them.
//!
//! ## Cancellation
//!
//! [`RolePropagationService::terminate`] cancels a shared token that is polled
//! before each identity and each event-selection step. Cancellation surfaces
//! as the `Cancelled` variant of [`SelectionStop`] and [`ProvisionOutcome`].

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::plan_assembly::{add_role_requests, set_native_id_assignments};
use crate::application::task_monitor::{MonitorError, TaskMonitor};
use crate::domain::codec::{encode_ids, CodecError, IdListCodec};
use crate::domain::event::{EventId, EventStatus, RoleChangeEvent};
use crate::domain::events::{DeletionReason, PropagationEvent};
use crate::domain::identity::{Identity, Role};
use crate::domain::propagation_config::PropagationSettings;
use crate::domain::provisioning::{
    IdentityRefresher, Provisioner, ProvisioningError, ProvisioningProject, WorkflowLauncher,
};
use crate::domain::repository::{
    IdentityRepository, RepositoryError, RoleChangeEventRepository, RoleRepository,
};
use crate::domain::task_result::{EventProcessingDetails, Message};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

/// Why event selection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStop {
    Selected,
    Exhausted,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct EventSelection {
    pub event: Option<RoleChangeEvent>,
    /// Ids not yet visited, kept for the next Transition.
    pub remaining: Vec<EventId>,
    pub stop: SelectionStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventValidity {
    Valid,
    Invalid(DeletionReason),
}

impl EventValidity {
    pub fn is_valid(self) -> bool {
        self == EventValidity::Valid
    }
}

/// Identities to provision for an event, and those held back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySelection {
    pub to_process: Vec<String>,
    pub skip_list: Vec<String>,
    pub compressed_skip_list: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Identities updated successfully.
    pub total: usize,
    pub failed_identities: Vec<String>,
    pub errors: Vec<Message>,
    pub refreshed: usize,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        self.failed_identities.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Completed(ProvisionReport),
    Cancelled(ProvisionReport),
}

impl ProvisionOutcome {
    pub fn report(&self) -> &ProvisionReport {
        match self {
            ProvisionOutcome::Completed(report) | ProvisionOutcome::Cancelled(report) => report,
        }
    }
}

/// False when pruning is disabled or there is no event; otherwise true once
/// the event has failed `max_failed_attempts` times.
pub fn is_event_prunable(event: Option<&RoleChangeEvent>, settings: &PropagationSettings) -> bool {
    event.is_some_and(|e| {
        settings.max_failed_attempts > 0 && e.failed_attempts >= settings.max_failed_attempts
    })
}

/// Integer percentage of failed identities against the configured threshold.
/// An event that affected nobody was skipped, not failed.
pub fn is_above_failure_threshold(
    event: Option<&RoleChangeEvent>,
    settings: &PropagationSettings,
) -> bool {
    let Some(event) = event else {
        return false;
    };
    if settings.max_failure_threshold <= 0 || event.affected_identity_count == 0 {
        return false;
    }
    let failed = event.failed_identity_ids.len();
    let percentage = (failed * 100) / event.affected_identity_count;
    percentage >= settings.max_failure_threshold as usize
}

/// Per-identity error recorded on the partition result.
fn propagation_error(
    event: &RoleChangeEvent,
    identity: &Identity,
    cause: Option<&PropagationError>,
) -> Message {
    let text = format!(
        "Error propagating changes for role {} to identity {}",
        event.role_name, identity.name
    );
    match cause {
        Some(cause) => Message::error(format!("{}: {}", text, cause)),
        None => Message::error(text),
    }
}

/// Collaborators of the propagation service.
#[derive(Clone)]
pub struct PropagationDependencies {
    pub roles: Arc<dyn RoleRepository>,
    pub identities: Arc<dyn IdentityRepository>,
    pub events: Arc<dyn RoleChangeEventRepository>,
    pub provisioner: Arc<dyn Provisioner>,
    pub workflows: Arc<dyn WorkflowLauncher>,
    pub refresher: Arc<dyn IdentityRefresher>,
    pub codec: Arc<dyn IdListCodec>,
}

pub struct RolePropagationService {
    deps: PropagationDependencies,
    settings: PropagationSettings,
    cancel: CancellationToken,
    event_bus: Option<EventBus>,
}

impl RolePropagationService {
    pub fn new(deps: PropagationDependencies, settings: PropagationSettings) -> Self {
        Self {
            deps,
            settings,
            cancel: CancellationToken::new(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn settings(&self) -> &PropagationSettings {
        &self.settings
    }

    pub fn codec(&self) -> &dyn IdListCodec {
        self.deps.codec.as_ref()
    }

    pub fn codec_handle(&self) -> Arc<dyn IdListCodec> {
        Arc::clone(&self.deps.codec)
    }

    pub fn events(&self) -> &Arc<dyn RoleChangeEventRepository> {
        &self.deps.events
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask running work to stop at the next identity or selection step.
    pub fn terminate(&self) {
        info!("Role propagation termination requested");
        self.cancel.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn publish(&self, event: PropagationEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    async fn find_role(&self, event: &RoleChangeEvent) -> Result<Option<Role>, PropagationError> {
        if let Some(role) = self.deps.roles.find_by_id(&event.role_id).await? {
            return Ok(Some(role));
        }
        if event.role_name.is_empty() {
            return Ok(None);
        }
        Ok(self.deps.roles.find_by_name(&event.role_name).await?)
    }

    /// Identities affected by `event`.
    pub async fn affected_identity_ids(
        &self,
        event: &RoleChangeEvent,
    ) -> Result<Vec<String>, PropagationError> {
        let Some(role) = self.find_role(event).await? else {
            warn!(
                "Attempted to build partitions for an event with role id {} and role name {}, but the role could not be found",
                event.role_id, event.role_name
            );
            return Ok(Vec::new());
        };

        let ids = if event.role_deleted && event.plan.is_some() {
            self.deps.identities.ids_with_detected_role(&role).await?
        } else {
            self.deps.identities.ids_with_assigned_role(&role).await?
        };
        Ok(ids)
    }

    /// Ids of events created strictly before `cutoff`, oldest first.
    pub async fn event_ids(&self, cutoff: DateTime<Utc>) -> Result<Vec<EventId>, PropagationError> {
        Ok(self.deps.events.ids_created_before(cutoff).await?)
    }

    /// Check that the event still has a role and affects someone. A role
    /// flagged for deletion is deleted here.
    pub async fn validate_event(
        &self,
        monitor: &TaskMonitor,
        event: &RoleChangeEvent,
    ) -> Result<EventValidity, PropagationError> {
        let role = self.find_role(event).await?;
        if let Some(role) = &role {
            debug!(role = %role.name, "Validating event");
        }

        match role {
            None => Ok(EventValidity::Invalid(DeletionReason::RoleMissing)),
            Some(role) if event.is_role_invalid() => {
                monitor
                    .update_progress(format!("Deleting event for Bundle: {}", event.role_name))
                    .await?;
                debug!(
                    "Deleting role {} because the event flags it for deletion",
                    role.name
                );
                self.deps.roles.delete(&role.id).await?;
                Ok(EventValidity::Invalid(DeletionReason::RoleInvalid))
            }
            Some(_) => {
                if self.affected_identity_ids(event).await?.is_empty() {
                    monitor
                        .update_progress(format!(
                            "No identity assignments for Bundle: {}",
                            event.role_name
                        ))
                        .await?;
                    Ok(EventValidity::Invalid(DeletionReason::NoAffectedIdentities))
                } else {
                    Ok(EventValidity::Valid)
                }
            }
        }
    }

    /// Pop ids from the head of `queue` until a valid event is found.
    pub async fn next_event(
        &self,
        monitor: &TaskMonitor,
        queue: Vec<EventId>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<EventSelection, PropagationError> {
        let mut remaining = queue;

        loop {
            if self.is_terminated() {
                return Ok(EventSelection { event: None, remaining, stop: SelectionStop::Cancelled });
            }

            if end_time.is_some_and(|end| Utc::now() > end) {
                self.handle_time_out(monitor).await?;
                return Ok(EventSelection { event: None, remaining, stop: SelectionStop::TimedOut });
            }

            if remaining.is_empty() {
                return Ok(EventSelection { event: None, remaining, stop: SelectionStop::Exhausted });
            }

            let event_id = remaining.remove(0);
            let Some(event) = self.deps.events.find_by_id(event_id).await? else {
                warn!("Role change event {} was deleted during execution", event_id);
                continue;
            };

            match self.validate_event(monitor, &event).await? {
                EventValidity::Valid => {
                    debug!(event = %event.id, role = %event.role_name, "Selected event");
                    return Ok(EventSelection {
                        event: Some(event),
                        remaining,
                        stop: SelectionStop::Selected,
                    });
                }
                EventValidity::Invalid(reason) => {
                    self.update_task_result(
                        monitor,
                        None,
                        Some(EventProcessingDetails::empty(&event.role_name)),
                    )
                    .await?;
                    self.delete_event(&event, reason).await?;
                }
            }
        }
    }

    async fn handle_time_out(&self, monitor: &TaskMonitor) -> Result<(), PropagationError> {
        let minutes = self.settings.duration_minutes;
        info!("Role propagation execution period of {} minutes has elapsed", minutes);
        monitor
            .with_master_result(move |result| {
                result.add_message(Message::info(format!(
                    "Role propagation stopped after the configured execution period of {} minutes",
                    minutes
                )))
            })
            .await?;
        Ok(())
    }

    /// Ids of identities that failed for other Failed events created at or
    /// before `event`.
    pub async fn accumulated_failed_identity_ids(
        &self,
        event: &RoleChangeEvent,
    ) -> Result<BTreeSet<String>, PropagationError> {
        let failed = self.deps.events.failed_created_up_to(event.created_at).await?;
        Ok(failed
            .into_iter()
            .filter(|e| e.id != event.id)
            .flat_map(|e| e.failed_identity_ids)
            .collect())
    }

    /// Decide which identities to provision for `event` and which to hold
    /// back. Sets the affected count on the first visit; the caller persists
    /// the event.
    pub async fn prepare_identity_list_to_process(
        &self,
        event: &mut RoleChangeEvent,
    ) -> Result<IdentitySelection, PropagationError> {
        let prior_failed = self.accumulated_failed_identity_ids(event).await?;
        let mut skip_list: BTreeSet<String> = event.skipped_identity_ids.clone();
        let mut to_process = Vec::new();

        match event.status {
            EventStatus::Pending => {
                let affected = self.affected_identity_ids(event).await?;
                for id in &affected {
                    if prior_failed.contains(id) {
                        skip_list.insert(id.clone());
                    } else {
                        to_process.push(id.clone());
                    }
                }
                if event.affected_identity_count == 0 {
                    event.affected_identity_count = to_process.len();
                }
            }
            EventStatus::Failed => {
                to_process.extend(event.failed_identity_ids.iter().cloned());
                for id in &event.skipped_identity_ids {
                    if !prior_failed.contains(id) {
                        to_process.push(id.clone());
                        skip_list.remove(id);
                    }
                }
            }
            EventStatus::Success | EventStatus::Pruned => {}
        }

        let skip_list: Vec<String> = skip_list.into_iter().collect();
        let compressed_skip_list = encode_ids(self.codec(), &skip_list)?;
        Ok(IdentitySelection {
            to_process,
            skip_list,
            compressed_skip_list,
        })
    }

    /// Delete the event unless it is already gone.
    pub async fn delete_event(
        &self,
        event: &RoleChangeEvent,
        reason: DeletionReason,
    ) -> Result<(), PropagationError> {
        if self.deps.events.exists(event.id).await? {
            self.deps.events.delete(event.id).await?;
            debug!(event = %event.id, ?reason, "Deleted role change event");
            self.publish(PropagationEvent::EventDeleted {
                event_id: event.id,
                role_name: event.role_name.clone(),
                reason,
                deleted_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Record a message and the details of a processed event on the master
    /// result.
    pub async fn update_task_result(
        &self,
        monitor: &TaskMonitor,
        message: Option<Message>,
        details: Option<EventProcessingDetails>,
    ) -> Result<(), PropagationError> {
        debug!(?details, "Updating task result with processing details");
        monitor
            .with_master_result(move |result| {
                if let Some(message) = message {
                    result.add_message(message);
                }

                let Some(details) = details else {
                    return;
                };

                let stats = &mut result.stats;
                match details.status {
                    EventStatus::Failed | EventStatus::Pruned | EventStatus::Success => {
                        stats.events_processed += 1;
                        stats.events_pending = stats.events_pending.saturating_sub(1);
                        match details.status {
                            EventStatus::Failed => stats.events_failed += 1,
                            EventStatus::Pruned => stats.events_pruned += 1,
                            _ => stats.events_succeeded += 1,
                        }
                    }
                    EventStatus::Pending => {
                        warn!("Invalid event status in processing details: {:?}", details);
                    }
                }
                stats.debug_total += details.identities_succeeded;
                result.event_details.push(details);
            })
            .await?;
        Ok(())
    }

    /// Provision the event for each identity in `ids`, in order.
    ///
    /// Per-identity failures are collected in the report; compile failures
    /// and storage errors abort the partition.
    pub async fn provision_identities(
        &self,
        monitor: &TaskMonitor,
        event: &RoleChangeEvent,
        ids: &[String],
        refresh_identities: bool,
    ) -> Result<ProvisionOutcome, PropagationError> {
        let mut report = ProvisionReport::default();
        let count = ids.len();
        let mut processed = 0;

        for (index, id) in ids.iter().enumerate() {
            if self.is_terminated() {
                warn!(
                    processed = index,
                    remaining = count - index,
                    "Provisioning cancelled"
                );
                return Ok(ProvisionOutcome::Cancelled(report));
            }

            let Some(identity) = self.deps.identities.find_by_id(id).await? else {
                debug!(identity = %id, "Identity no longer exists");
                continue;
            };

            processed += 1;
            monitor
                .update_progress(format!(
                    "Processing Identity [{}] ({} of {}).",
                    identity.name, processed, count
                ))
                .await?;

            let mut plan = event.plan.clone().unwrap_or_default();
            add_role_requests(&identity.role_assignments, &mut plan, event);
            plan.identity_id = Some(identity.id.clone());
            if !identity.role_assignments.is_empty() {
                set_native_id_assignments(
                    &mut plan,
                    &identity.role_assignments,
                    &identity.role_detections,
                    event,
                );
            }

            let project = self.deps.provisioner.compile(&identity, &plan).await?;

            let failure = match self.apply_project(monitor, &identity, event, project).await {
                Ok(true) => None,
                Ok(false) => Some(propagation_error(event, &identity, None)),
                Err(e) => Some(propagation_error(event, &identity, Some(&e))),
            };

            if let Some(message) = failure {
                error!("{}", message.text);
                report.errors.push(message);
                report.failed_identities.push(identity.id.clone());
            } else {
                report.total += 1;
                if refresh_identities {
                    self.refresh_identity(monitor, &identity, &mut report).await?;
                }
            }
        }

        Ok(ProvisionOutcome::Completed(report))
    }

    /// Returns `Ok(false)` when the project was not fully applied.
    async fn apply_project(
        &self,
        monitor: &TaskMonitor,
        identity: &Identity,
        event: &RoleChangeEvent,
        project: ProvisioningProject,
    ) -> Result<bool, PropagationError> {
        if let Some(workflow) = &self.settings.workflow {
            if self.deps.workflows.exists(workflow).await? {
                debug!(workflow = %workflow, identity = %identity.name, "Launching propagation workflow");
                let launched = self.deps.workflows.launch(workflow, identity, &project).await?;
                return Ok(launched.is_some_and(|result| !result.failed));
            }

            warn!(
                "The configured role propagation workflow {} does not exist; provisioning role {} to identity {} directly",
                workflow, event.role_name, identity.name
            );
            let text = format!(
                "Role propagation workflow {} does not exist; built-in provisioning was used for role {}",
                workflow, event.role_name
            );
            monitor
                .with_master_result(move |result| {
                    if !result.messages.iter().any(|m| m.text == text) {
                        result.add_message(Message::warn(text));
                    }
                })
                .await?;
        }

        let project = self.deps.provisioner.execute(identity, project).await?;
        if !project.fully_committed {
            error!(
                "Error provisioning event {} to identity {}: {:?}",
                event.id, identity.name, project.error_messages
            );
        }
        Ok(project.fully_committed)
    }

    async fn refresh_identity(
        &self,
        monitor: &TaskMonitor,
        identity: &Identity,
        report: &mut ProvisionReport,
    ) -> Result<(), PropagationError> {
        info!("Refreshing identity {}", identity.name);
        match self.deps.refresher.refresh(identity, &self.settings.policies).await {
            Ok(()) => {
                report.refreshed += 1;
                monitor
                    .with_partition_result(|result| result.stats.identities_refreshed += 1)
                    .await?;
            }
            Err(e) => {
                warn!("Identity refresh failed for {}: {}", identity.name, e);
                report.errors.push(Message::warn(e.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_failed_attempts: i32, threshold: i32) -> PropagationSettings {
        PropagationSettings {
            max_failed_attempts,
            max_failure_threshold: threshold,
            ..PropagationSettings::default()
        }
    }

    #[test]
    fn test_event_prunable() {
        let mut event = RoleChangeEvent::new("r", "R", None);
        event.failed_attempts = 3;
        assert!(is_event_prunable(Some(&event), &settings(3, 0)));
        assert!(!is_event_prunable(Some(&event), &settings(4, 0)));
        assert!(!is_event_prunable(Some(&event), &settings(0, 0)));
        assert!(!is_event_prunable(None, &settings(3, 0)));
    }

    #[test]
    fn test_failure_threshold() {
        let mut event = RoleChangeEvent::new("r", "R", None);
        event.affected_identity_count = 3;
        event.failed_identity_ids = ["a".to_string()].into_iter().collect();

        // 1 * 100 / 3 == 33
        assert!(is_above_failure_threshold(Some(&event), &settings(0, 33)));
        assert!(!is_above_failure_threshold(Some(&event), &settings(0, 34)));
        assert!(!is_above_failure_threshold(Some(&event), &settings(0, 0)));
        assert!(!is_above_failure_threshold(None, &settings(0, 10)));

        event.affected_identity_count = 0;
        assert!(!is_above_failure_threshold(Some(&event), &settings(0, 1)));
    }
}
