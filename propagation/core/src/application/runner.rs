// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Propagation Runner
//!
//! Drives one run: creates the master result, submits the initial
//! Transition, then drains the request queue. Requests released together
//! by the dependency rule run concurrently on a [`JoinSet`]; each finished
//! request has its partition result stamped complete before it is removed
//! from the queue.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::application::propagation_service::RolePropagationService;
use crate::application::request_builder::RequestBuilder;
use crate::application::request_executor::{ExecutorError, RequestExecutor};
use crate::application::task_monitor::TaskMonitor;
use crate::domain::events::PropagationEvent;
use crate::domain::repository::TaskResultRepository;
use crate::domain::request::RequestQueue;
use crate::domain::task_result::{Message, TaskResult};

pub const MASTER_RESULT_NAME: &str = "Role Propagation";

/// A started run.
#[derive(Clone)]
pub struct RunHandle {
    executor: Arc<RequestExecutor>,
}

impl RunHandle {
    pub fn monitor(&self) -> &TaskMonitor {
        self.executor.monitor()
    }

    /// Request termination. Provisioning stops before the next identity and
    /// no further events are selected.
    pub fn terminate(&self) {
        self.executor.terminate();
    }
}

pub struct PropagationRunner {
    service: Arc<RolePropagationService>,
    queue: Arc<dyn RequestQueue>,
    results: Arc<dyn TaskResultRepository>,
}

impl PropagationRunner {
    pub fn new(
        service: Arc<RolePropagationService>,
        queue: Arc<dyn RequestQueue>,
        results: Arc<dyn TaskResultRepository>,
    ) -> Self {
        Self {
            service,
            queue,
            results,
        }
    }

    pub fn service(&self) -> &Arc<RolePropagationService> {
        &self.service
    }

    /// Snapshot the pending events and submit the initial Transition.
    pub async fn start(&self) -> Result<RunHandle, ExecutorError> {
        let mut master = TaskResult::new(MASTER_RESULT_NAME);
        let event_ids = self.service.event_ids(master.launched_at).await?;
        master.stats.events_total = event_ids.len();
        master.stats.events_pending = event_ids.len();
        self.results.save(&master).await?;

        let settings = self.service.settings();
        let end_time = (settings.duration_minutes > 0)
            .then(|| Utc::now() + Duration::minutes(settings.duration_minutes as i64));

        let monitor = TaskMonitor::new(master.id, Arc::clone(&self.results));
        let builder = RequestBuilder::new(
            Arc::clone(&self.service),
            monitor.clone(),
            settings.max_partitions,
            end_time,
        );
        let event_count = event_ids.len();
        let initial = builder
            .build_transition_request(0, true, event_ids, Vec::new(), None)
            .await?;
        self.queue.add_request(initial).await?;

        info!(
            events = event_count,
            max_partitions = settings.max_partitions,
            "Starting role propagation"
        );
        self.service.publish(PropagationEvent::RunStarted {
            task_result_id: master.id,
            event_count,
            started_at: master.launched_at,
        });

        let executor = RequestExecutor::new(
            Arc::clone(&self.service),
            Arc::clone(&self.queue),
            monitor,
        );
        Ok(RunHandle {
            executor: Arc::new(executor),
        })
    }

    /// Execute requests until the queue is drained and return the master
    /// result.
    pub async fn run_to_completion(&self, handle: &RunHandle) -> Result<TaskResult, ExecutorError> {
        loop {
            let ready = self.queue.take_ready().await?;
            if ready.is_empty() {
                if !self.queue.is_empty().await? {
                    let stuck: Vec<String> = self
                        .queue
                        .list()
                        .await?
                        .into_iter()
                        .map(|r| r.name)
                        .collect();
                    warn!(?stuck, "Requests left in the queue can never become ready");
                }
                break;
            }

            let mut running = JoinSet::new();
            for request in ready {
                let executor = Arc::clone(&handle.executor);
                running.spawn(async move {
                    let outcome = executor.execute(&request).await;
                    (request, outcome)
                });
            }

            while let Some(joined) = running.join_next().await {
                let (request, outcome) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        error!("Request task panicked or was aborted: {}", e);
                        continue;
                    }
                };

                let monitor = handle.monitor().for_partition(request.partition_result);
                if let Err(e) = outcome {
                    error!(request = %request.name, "Request failed: {}", e);
                    let message = Message::error(e.to_string());
                    monitor
                        .with_partition_result(move |r| r.add_message(message))
                        .await?;
                }
                handle.monitor().complete_result(request.partition_result).await?;
                self.queue.mark_complete(request.id).await?;
            }
        }

        Ok(handle.monitor().master_result().await?)
    }

    /// Start a run and drive it to completion.
    pub async fn run(&self) -> Result<TaskResult, ExecutorError> {
        let handle = self.start().await?;
        self.run_to_completion(&handle).await
    }
}
