// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Phase Request Builder
//!
//! Turns the decisions of a Transition into requests:
//!
//! | Request | phase | dependent phase |
//! |---------|-------|-----------------|
//! | Provision (one per partition) | Provision | none |
//! | initial Transition | Transition | none |
//! | follow-up Transition | Transition | Provision |
//! | Finish | Finish | Transition |
//!
//! Each request gets its own partition result, registered on the master
//! result. Provision results are visible; Transition and Finish results are
//! hidden.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::application::partition_builder::PartitionBuilder;
use crate::application::propagation_service::{PropagationError, RolePropagationService};
use crate::application::task_monitor::{MonitorError, TaskMonitor};
use crate::domain::event::{EventId, RoleChangeEvent};
use crate::domain::request::{
    FinishConfig, Phase, ProvisionConfig, Request, RequestError, RequestPayload, TransitionConfig,
};

pub const TRANSITION_REQUEST_NAME: &str = "Role Change Propagation Transition";
pub const FINISH_REQUEST_NAME: &str = "Finish Role Change Propagation";

#[derive(Debug, thiserror::Error)]
pub enum RequestBuildError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),
}

/// Provision requests for one event plus what the follow-up Transition
/// needs to finish that event.
#[derive(Debug, Clone)]
pub struct ProvisionBatch {
    pub requests: Vec<Request>,
    pub identities_to_process: usize,
    pub compressed_skip_list: String,
}

impl ProvisionBatch {
    pub fn request_names(&self) -> Vec<String> {
        self.requests.iter().map(|r| r.name.clone()).collect()
    }
}

pub struct RequestBuilder {
    service: Arc<RolePropagationService>,
    monitor: TaskMonitor,
    max_partitions: usize,
    end_time: Option<DateTime<Utc>>,
}

impl RequestBuilder {
    pub fn new(
        service: Arc<RolePropagationService>,
        monitor: TaskMonitor,
        max_partitions: usize,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            service,
            monitor,
            max_partitions,
            end_time,
        }
    }

    async fn create_request(
        &self,
        name: String,
        raw_phase: i32,
        dependent_phase: Option<Phase>,
        hidden: bool,
        payload: RequestPayload,
    ) -> Result<Request, RequestBuildError> {
        // Reject bad phases before anything is registered.
        let phase = Phase::try_from(raw_phase)?;
        let partition_result = self.monitor.register_partition_result(&name, hidden).await?;
        let request = Request::new(name, phase.into(), dependent_phase, partition_result, payload)?;
        debug!(request = %request.name, phase = %request.phase, "Built request");
        Ok(request)
    }

    /// Select identities for `event`, persist its first-seen affected count,
    /// and build one Provision request per partition.
    pub async fn build_provision_requests(
        &self,
        event: &mut RoleChangeEvent,
        event_tally: usize,
    ) -> Result<ProvisionBatch, RequestBuildError> {
        let first_visit = event.affected_identity_count == 0;
        let selection = self.service.prepare_identity_list_to_process(event).await?;
        if first_visit && event.affected_identity_count > 0 {
            self.service
                .events()
                .save(event)
                .await
                .map_err(PropagationError::from)?;
        }

        let label = format!("{} ({})", event.role_name, event_tally + 1);
        let partitions = PartitionBuilder::new(self.service.codec_handle())
            .build(event.id, &label, &selection.to_process, self.max_partitions)
            .map_err(PropagationError::from)?;

        let refresh_identities = self.service.settings().is_identity_refresh_enabled();
        let mut requests = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let name = partition.name.clone();
            let payload = RequestPayload::Provision(ProvisionConfig {
                partition,
                event_id: event.id,
                refresh_identities,
            });
            requests.push(
                self.create_request(name, Phase::Provision.into(), None, false, payload)
                    .await?,
            );
        }

        Ok(ProvisionBatch {
            requests,
            identities_to_process: selection.to_process.len(),
            compressed_skip_list: selection.compressed_skip_list,
        })
    }

    /// Build a Transition request. The name suffix is `tally + 1` for the
    /// initial Transition and `tally + 2` afterwards.
    pub async fn build_transition_request(
        &self,
        event_tally: usize,
        is_initial: bool,
        event_ids: Vec<EventId>,
        request_names: Vec<String>,
        previous_event: Option<EventId>,
    ) -> Result<Request, RequestBuildError> {
        let suffix = if is_initial { event_tally + 1 } else { event_tally + 2 };
        let dependent_phase = if is_initial { None } else { Some(Phase::Provision) };

        let payload = RequestPayload::Transition(TransitionConfig {
            event_ids,
            max_partitions: self.max_partitions,
            end_time: self.end_time,
            event_tally,
            previous_event,
            request_names,
            ..TransitionConfig::default()
        });

        self.create_request(
            format!("{} {}", TRANSITION_REQUEST_NAME, suffix),
            Phase::Transition.into(),
            dependent_phase,
            true,
            payload,
        )
        .await
    }

    pub async fn build_finish_request(&self, event_tally: usize) -> Result<Request, RequestBuildError> {
        self.create_request(
            FINISH_REQUEST_NAME.to_string(),
            Phase::Finish.into(),
            Some(Phase::Transition),
            true,
            RequestPayload::Finish(FinishConfig { event_tally }),
        )
        .await
    }
}
