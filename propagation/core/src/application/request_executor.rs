// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Request Executor
//!
//! Executes one phase-tagged request of a run.
//!
//! - **Transition** finishes the event provisioned by the previous batch,
//!   then either submits Provision requests for the next valid event plus a
//!   follow-up Transition, or submits Finish.
//! - **Provision** provisions one partition and records its outcome on the
//!   partition result.
//! - **Finish** writes the completion message and stamps the master result.
//!
//! Errors that are not specific to one identity terminate the whole run:
//! the partition and master results are marked terminated and Finish is
//! submitted.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::propagation_service::{
    is_above_failure_threshold, is_event_prunable, PropagationError, ProvisionOutcome,
    ProvisionReport, RolePropagationService, SelectionStop,
};
use crate::application::request_builder::{RequestBuildError, RequestBuilder};
use crate::application::task_monitor::{MonitorError, TaskMonitor};
use crate::domain::codec::{decode_ids, encode_ids, CodecError};
use crate::domain::event::{EventId, EventStatus, RoleChangeEvent};
use crate::domain::events::{DeletionReason, PropagationEvent};
use crate::domain::repository::RepositoryError;
use crate::domain::request::{
    FinishConfig, ProvisionConfig, Request, RequestPayload, RequestQueue, TransitionConfig,
};
use crate::domain::task_result::{CompletionStatus, EventProcessingDetails, Message};

/// Error messages copied to a partition result before they are summarised.
pub const MAX_NUM_ERRORS: usize = 5;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Propagation(#[from] PropagationError),

    #[error(transparent)]
    Build(#[from] RequestBuildError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Role change event not found: {0}")]
    EventNotFound(EventId),

    /// The request failed and must not be retried.
    #[error("Request {request} failed permanently: {reason}")]
    Permanent { request: String, reason: String },
}

/// An event closed by a Transition.
#[derive(Debug, Clone)]
pub struct FinishedEvent {
    pub event: RoleChangeEvent,
    pub details: EventProcessingDetails,
}

/// True when the attempt made no progress. While identities are skipped
/// the attempt is never counted as failed.
pub fn is_attempt_failed(
    updated: &RoleChangeEvent,
    previous_failures: usize,
    previous_skips: usize,
) -> bool {
    if !updated.skipped_identity_ids.is_empty() {
        return false;
    }

    let current_failures = updated.failed_identity_ids.len();
    let failed = current_failures == previous_failures + previous_skips;
    if !failed && previous_failures == 0 {
        return current_failures == updated.affected_identity_count;
    }
    failed
}

/// Keep at most [`MAX_NUM_ERRORS`] messages, replacing the overflow with a
/// single summary message.
pub fn cap_errors(mut errors: Vec<Message>, role_name: &str) -> Vec<Message> {
    if errors.len() > MAX_NUM_ERRORS {
        errors.truncate(MAX_NUM_ERRORS - 1);
        errors.push(Message::error(format!(
            "More errors occurred while propagating changes for role {}",
            role_name
        )));
    }
    errors
}

pub struct RequestExecutor {
    service: Arc<RolePropagationService>,
    queue: Arc<dyn RequestQueue>,
    monitor: TaskMonitor,
    finish_submitted: AtomicBool,
}

impl RequestExecutor {
    pub fn new(
        service: Arc<RolePropagationService>,
        queue: Arc<dyn RequestQueue>,
        monitor: TaskMonitor,
    ) -> Self {
        Self {
            service,
            queue,
            monitor,
            finish_submitted: AtomicBool::new(false),
        }
    }

    pub fn monitor(&self) -> &TaskMonitor {
        &self.monitor
    }

    pub fn service(&self) -> &Arc<RolePropagationService> {
        &self.service
    }

    /// Stop the run at the next identity or event-selection step.
    pub fn terminate(&self) {
        self.service.terminate();
    }

    pub async fn execute(&self, request: &Request) -> Result<(), ExecutorError> {
        debug!(
            "Executing request: {} [Phase: {}]",
            request.name,
            i32::from(request.phase)
        );
        let monitor = self.monitor.for_partition(request.partition_result);

        match &request.payload {
            RequestPayload::Transition(config) => self.transition(request, config, &monitor).await,
            RequestPayload::Provision(config) => self.provision(request, config, &monitor).await,
            RequestPayload::Finish(config) => self.finish(request, config).await,
        }
    }

    fn builder(&self, config: Option<&TransitionConfig>) -> RequestBuilder {
        let (max_partitions, end_time) = match config {
            Some(config) => (config.max_partitions, config.end_time),
            None => (self.service.settings().max_partitions, None),
        };
        RequestBuilder::new(
            Arc::clone(&self.service),
            self.monitor.clone(),
            max_partitions,
            end_time,
        )
    }

    async fn transition(
        &self,
        request: &Request,
        config: &TransitionConfig,
        monitor: &TaskMonitor,
    ) -> Result<(), ExecutorError> {
        match self.run_transition(request, config, monitor).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("The role propagation task failed: {}", e);
                if let Err(finish_error) = self.terminate_task(config.event_tally).await {
                    error!("Unable to submit the finish request: {}", finish_error);
                }
                Err(ExecutorError::Permanent {
                    request: request.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn run_transition(
        &self,
        request: &Request,
        config: &TransitionConfig,
        monitor: &TaskMonitor,
    ) -> Result<(), ExecutorError> {
        debug!("On transition start -- events attempted: {}", config.event_tally);

        if self.service.is_terminated() {
            self.record_termination().await?;
        }
        if self.monitor.master_result().await?.terminated {
            debug!("Run already terminated; the last event is left for the next run");
            self.submit_finish(&self.builder(Some(config)), config.event_tally)
                .await?;
            return Ok(());
        }

        let mut event_tally = config.event_tally;

        let finished = self.finish_last_event(config, monitor, &mut event_tally).await?;
        let previous = finished.as_ref().map(|f| &f.event);

        let message = previous.filter(|e| e.status == EventStatus::Pruned).map(|e| {
            Message::warn(format!(
                "Role change event for {} was pruned after {} failed attempts",
                e.role_name,
                self.service.settings().max_failed_attempts
            ))
        });
        let details = finished.as_ref().map(|f| f.details.clone());
        if message.is_some() || details.is_some() {
            self.service
                .update_task_result(&self.monitor, message, details)
                .await?;
        }
        if event_tally != config.event_tally {
            self.monitor
                .with_master_result(move |r| r.stats.event_tally = event_tally)
                .await?;
        }

        if is_above_failure_threshold(previous, self.service.settings()) {
            self.cancel_action(request, monitor, Vec::new(), "Exceeded failure threshold")
                .await?;
            self.terminate_task(event_tally).await?;
            return Ok(());
        }

        debug!("After finishing the last event -- events attempted: {}", event_tally);

        let builder = self.builder(Some(config));
        let selection = self
            .service
            .next_event(&self.monitor, config.event_ids.clone(), config.end_time)
            .await?;

        if selection.stop == SelectionStop::Cancelled {
            self.record_termination().await?;
        }

        let Some(mut event) = selection.event else {
            self.submit_finish(&builder, event_tally).await?;
            return Ok(());
        };

        let batch = builder.build_provision_requests(&mut event, event_tally).await?;
        let mut next = builder
            .build_transition_request(
                event_tally,
                false,
                selection.remaining,
                batch.request_names(),
                Some(event.id),
            )
            .await?;
        if let RequestPayload::Transition(next_config) = &mut next.payload {
            next_config.identities_to_process = batch.identities_to_process;
            next_config.new_skip_list = Some(batch.compressed_skip_list.clone());
        }

        self.service.publish(PropagationEvent::EventSelected {
            event_id: event.id,
            role_name: event.role_name.clone(),
            identities_to_process: batch.identities_to_process,
            partitions: batch.requests.len(),
            selected_at: Utc::now(),
        });

        for provision in batch.requests {
            self.queue.add_request(provision).await?;
        }
        self.queue.add_request(next).await?;
        Ok(())
    }

    async fn record_termination(&self) -> Result<(), ExecutorError> {
        self.monitor
            .with_master_result(|r| {
                if !r.terminated {
                    r.terminated = true;
                    r.add_message(Message::warn("Role propagation was terminated"));
                }
            })
            .await?;
        Ok(())
    }

    /// Close the event provisioned by the requests this Transition waited on.
    pub async fn finish_last_event(
        &self,
        config: &TransitionConfig,
        monitor: &TaskMonitor,
        event_tally: &mut usize,
    ) -> Result<Option<FinishedEvent>, ExecutorError> {
        let Some(event_id) = config.previous_event else {
            return Ok(None);
        };
        let codec = self.service.codec();

        let Some(mut event) = self.service.events().find_by_id(event_id).await? else {
            warn!("Role change event {} was deleted during execution", event_id);
            *event_tally += 1;
            return Ok(None);
        };

        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut succeeded = 0;
        if !config.request_names.is_empty() {
            for partition in self.monitor.partition_results().await? {
                if !config.request_names.contains(&partition.name) {
                    continue;
                }
                if let Some(compressed) = &partition.failed_identities {
                    failed.extend(decode_ids(codec, compressed)?);
                }
                succeeded += partition.stats.total;
            }
        }

        let skip_list = match &config.new_skip_list {
            Some(compressed) => decode_ids(codec, compressed)?,
            None => Vec::new(),
        };

        let identities_to_process = match event.status {
            EventStatus::Pending => config.identities_to_process + skip_list.len(),
            EventStatus::Failed => event.skipped_identity_ids.len() + event.failed_identity_ids.len(),
            EventStatus::Success | EventStatus::Pruned => 0,
        };

        let success = failed.is_empty() && skip_list.is_empty();
        if success {
            self.service
                .delete_event(&event, DeletionReason::Succeeded)
                .await?;
            event.status = EventStatus::Success;
        } else {
            let previous_failures = event.failed_identity_ids.len();
            let previous_skips = event.skipped_identity_ids.len();

            event.failed_identity_ids = failed;
            event.skipped_identity_ids = skip_list.into_iter().collect();

            if is_attempt_failed(&event, previous_failures, previous_skips) {
                event.increment_failed_attempts();
            } else {
                event.reset_failed_attempts();
            }
            event.status = EventStatus::Failed;
            self.service.events().save(&event).await?;

            self.service.publish(PropagationEvent::EventFailed {
                event_id: event.id,
                role_name: event.role_name.clone(),
                failed: event.failed_identity_ids.len(),
                skipped: event.skipped_identity_ids.len(),
                failed_attempts: event.failed_attempts,
                failed_at: Utc::now(),
            });
        }

        *event_tally += 1;

        if !success && is_event_prunable(Some(&event), self.service.settings()) {
            event.status = EventStatus::Pruned;
            self.service.delete_event(&event, DeletionReason::Pruned).await?;
        }

        let details = EventProcessingDetails {
            role_name: event.role_name.clone(),
            identities_to_process,
            identities_succeeded: succeeded,
            identities_failed: if success { 0 } else { event.failed_identity_ids.len() },
            identities_skipped: if success { 0 } else { event.skipped_identity_ids.len() },
            status: event.status,
        };

        if !success && !event.skipped_identity_ids.is_empty() {
            let skipped = Message::error(format!(
                "{} identities were skipped for role {} because an earlier role change failed for them",
                event.skipped_identity_ids.len(),
                event.role_name
            ));
            warn!("{}", skipped.text);
            monitor
                .with_partition_result(move |r| r.add_message(skipped))
                .await?;
        }

        Ok(Some(FinishedEvent { event, details }))
    }

    async fn provision(
        &self,
        request: &Request,
        config: &ProvisionConfig,
        monitor: &TaskMonitor,
    ) -> Result<(), ExecutorError> {
        let outcome = match self.run_provision(config, monitor).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = e.to_string();
                self.cancel_action(request, monitor, Vec::new(), &reason).await?;
                self.terminate_task(0).await?;
                return Err(ExecutorError::Permanent {
                    request: request.name.clone(),
                    reason,
                });
            }
        };

        let (report, role_name, cancelled) = outcome;
        self.record_partition(monitor, &report, &role_name).await?;

        if cancelled {
            monitor
                .with_partition_result(|r| {
                    r.terminated = true;
                    r.add_message(Message::warn(
                        "Partition terminated before all identities were processed",
                    ));
                })
                .await?;
        }

        self.service.publish(PropagationEvent::PartitionProvisioned {
            partition: config.partition.name.clone(),
            succeeded: report.total,
            failed: report.failed_identities.len(),
            provisioned_at: Utc::now(),
        });
        debug!("Finished provision phase");
        Ok(())
    }

    async fn run_provision(
        &self,
        config: &ProvisionConfig,
        monitor: &TaskMonitor,
    ) -> Result<(ProvisionReport, String, bool), ExecutorError> {
        let ids = decode_ids(self.service.codec(), &config.partition.identity_list)?;
        let event = self
            .service
            .events()
            .find_by_id(config.event_id)
            .await?
            .ok_or(ExecutorError::EventNotFound(config.event_id))?;

        debug!(partition = %config.partition.name, identities = ids.len(), "Provisioning partition");

        let outcome = self
            .service
            .provision_identities(monitor, &event, &ids, config.refresh_identities)
            .await?;

        Ok(match outcome {
            ProvisionOutcome::Completed(report) => (report, event.role_name, false),
            ProvisionOutcome::Cancelled(report) => (report, event.role_name, true),
        })
    }

    async fn record_partition(
        &self,
        monitor: &TaskMonitor,
        report: &ProvisionReport,
        role_name: &str,
    ) -> Result<(), ExecutorError> {
        let total = report.total;
        let mut failure = None;
        if !report.is_success() {
            debug!("One or more identities failed provisioning");
            let compressed = encode_ids(self.service.codec(), &report.failed_identities)?;
            let mut messages = cap_errors(report.errors.clone(), role_name);
            messages.push(Message::error(format!(
                "{} identities failed provisioning for role {}",
                report.failed_identities.len(),
                role_name
            )));
            failure = Some((compressed, messages));
        }

        monitor
            .with_partition_result(move |r| {
                r.stats.total = total;
                if let Some((compressed, messages)) = failure {
                    r.failed_identities = Some(compressed);
                    r.messages.extend(messages);
                }
            })
            .await?;
        Ok(())
    }

    async fn finish(&self, request: &Request, config: &FinishConfig) -> Result<(), ExecutorError> {
        debug!("On finish -- events attempted: {}", config.event_tally);

        let successful = self
            .monitor
            .partition_results()
            .await?
            .iter()
            .filter(|p| p.name != request.name)
            .all(|p| p.completion_status == Some(CompletionStatus::Success));

        let message = if successful {
            Message::info("Role propagation completed")
        } else {
            Message::error("Role propagation completed with failures")
        };
        self.service
            .update_task_result(&self.monitor, Some(message), None)
            .await?;

        let status = self
            .monitor
            .with_master_result(|r| {
                r.progress = None;
                r.complete();
                r.completion_status.unwrap_or(CompletionStatus::Success)
            })
            .await?;
        info!(?status, "Role propagation finished");

        self.service.publish(PropagationEvent::RunFinished {
            task_result_id: self.monitor.master_id(),
            status,
            finished_at: Utc::now(),
        });
        Ok(())
    }

    /// Mark the current partition terminated and, unless another request got
    /// there first, the master result too.
    pub async fn cancel_action(
        &self,
        request: &Request,
        monitor: &TaskMonitor,
        messages: Vec<Message>,
        cause: &str,
    ) -> Result<(), ExecutorError> {
        error!(
            "The role propagation task failed, check partition requests for further details: {}",
            cause
        );

        let cause_message = Message::error(cause.to_string());
        monitor
            .with_partition_result(move |r| {
                r.terminated = true;
                r.add_message(cause_message);
                r.messages.extend(messages);
            })
            .await?;

        let partition_name = request.name.clone();
        self.monitor
            .with_master_result(move |r| {
                if !r.terminated {
                    r.add_message(Message::error(format!(
                        "Partition {} failed",
                        partition_name
                    )));
                    r.terminated = true;
                }
            })
            .await?;
        Ok(())
    }

    /// Submit Finish for a run that cannot continue.
    pub async fn terminate_task(&self, event_tally: usize) -> Result<(), ExecutorError> {
        let builder = self.builder(None);
        self.submit_finish(&builder, event_tally).await
    }

    async fn submit_finish(&self, builder: &RequestBuilder, event_tally: usize) -> Result<(), ExecutorError> {
        if self.finish_submitted.swap(true, Ordering::SeqCst) {
            debug!("Finish request already submitted");
            return Ok(());
        }
        let finish = builder.build_finish_request(event_tally).await?;
        self.queue.add_request(finish).await?;
        Ok(())
    }
}
