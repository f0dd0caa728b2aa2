// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Monitor
//!
//! Scoped read-modify-write access to the master result of a run and to the
//! partition result of the request being executed.
//!
//! Every mutation goes through [`TaskMonitor::with_master_result`] or
//! [`TaskMonitor::with_partition_result`]: the run-wide lock is acquired, the
//! result is reloaded from the repository, the closure is applied, the result
//! is saved and the lock is released when the guard drops. All monitors of a
//! run share the same lock, so concurrent Provision requests never lose an
//! update.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::repository::{RepositoryError, TaskResultRepository};
use crate::domain::task_result::{CompletionStatus, TaskResult, TaskResultId};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Task result not found: {0}")]
    NotFound(TaskResultId),

    #[error("Monitor is not bound to a partition result")]
    NoPartition,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone)]
pub struct TaskMonitor {
    master_id: TaskResultId,
    partition_id: Option<TaskResultId>,
    lock: Arc<Mutex<()>>,
    repository: Arc<dyn TaskResultRepository>,
}

impl TaskMonitor {
    pub fn new(master_id: TaskResultId, repository: Arc<dyn TaskResultRepository>) -> Self {
        Self {
            master_id,
            partition_id: None,
            lock: Arc::new(Mutex::new(())),
            repository,
        }
    }

    /// Monitor for one request, sharing this run's lock.
    pub fn for_partition(&self, partition_id: TaskResultId) -> Self {
        Self {
            master_id: self.master_id,
            partition_id: Some(partition_id),
            lock: Arc::clone(&self.lock),
            repository: Arc::clone(&self.repository),
        }
    }

    pub fn master_id(&self) -> TaskResultId {
        self.master_id
    }

    pub fn partition_id(&self) -> Option<TaskResultId> {
        self.partition_id
    }

    async fn load(&self, id: TaskResultId) -> Result<TaskResult, MonitorError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(MonitorError::NotFound(id))
    }

    async fn with_result<F, R>(&self, id: TaskResultId, f: F) -> Result<R, MonitorError>
    where
        F: FnOnce(&mut TaskResult) -> R + Send,
        R: Send,
    {
        let _guard = self.lock.lock().await;
        let mut result = self.load(id).await?;
        let out = f(&mut result);
        self.repository.save(&result).await?;
        Ok(out)
    }

    pub async fn with_master_result<F, R>(&self, f: F) -> Result<R, MonitorError>
    where
        F: FnOnce(&mut TaskResult) -> R + Send,
        R: Send,
    {
        self.with_result(self.master_id, f).await
    }

    pub async fn with_partition_result<F, R>(&self, f: F) -> Result<R, MonitorError>
    where
        F: FnOnce(&mut TaskResult) -> R + Send,
        R: Send,
    {
        let id = self.partition_id.ok_or(MonitorError::NoPartition)?;
        self.with_result(id, f).await
    }

    /// Create a partition result named `name` and register it on the master
    /// result. A name that is already registered keeps its existing result.
    pub async fn register_partition_result(
        &self,
        name: &str,
        hidden: bool,
    ) -> Result<TaskResultId, MonitorError> {
        let _guard = self.lock.lock().await;
        let mut master = self.load(self.master_id).await?;

        if let Some(existing) = master.partition_result(name) {
            debug!(partition = %name, "Partition result already registered");
            return Ok(existing.id);
        }

        let partition = TaskResult::new(name).hidden(hidden);
        self.repository.save(&partition).await?;
        master.append_partition_result(name, partition.id);
        self.repository.save(&master).await?;
        Ok(partition.id)
    }

    pub async fn update_progress(&self, progress: impl Into<String>) -> Result<(), MonitorError> {
        let progress = progress.into();
        debug!("{}", progress);
        self.with_master_result(move |result| result.progress = Some(progress))
            .await
    }

    pub async fn master_result(&self) -> Result<TaskResult, MonitorError> {
        let _guard = self.lock.lock().await;
        self.load(self.master_id).await
    }

    pub async fn result(&self, id: TaskResultId) -> Result<TaskResult, MonitorError> {
        let _guard = self.lock.lock().await;
        self.load(id).await
    }

    /// Partition results registered on the master, in registration order.
    pub async fn partition_results(&self) -> Result<Vec<TaskResult>, MonitorError> {
        let _guard = self.lock.lock().await;
        let master = self.load(self.master_id).await?;
        let mut results = Vec::with_capacity(master.partition_results.len());
        for reference in &master.partition_results {
            results.push(self.load(reference.id).await?);
        }
        Ok(results)
    }

    /// Stamp a result complete, deriving its status from its messages.
    pub async fn complete_result(&self, id: TaskResultId) -> Result<CompletionStatus, MonitorError> {
        self.with_result(id, |result| {
            result.complete();
            result.completion_status.unwrap_or(CompletionStatus::Success)
        })
        .await
    }
}
