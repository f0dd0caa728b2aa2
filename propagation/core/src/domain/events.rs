// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::EventId;
use crate::domain::task_result::{CompletionStatus, TaskResultId};

/// Why an event was removed without being provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    RoleMissing,
    RoleInvalid,
    NoAffectedIdentities,
    Succeeded,
    Pruned,
}

/// Lifecycle events of a propagation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropagationEvent {
    RunStarted {
        task_result_id: TaskResultId,
        event_count: usize,
        started_at: DateTime<Utc>,
    },
    EventSelected {
        event_id: EventId,
        role_name: String,
        identities_to_process: usize,
        partitions: usize,
        selected_at: DateTime<Utc>,
    },
    EventDeleted {
        event_id: EventId,
        role_name: String,
        reason: DeletionReason,
        deleted_at: DateTime<Utc>,
    },
    EventFailed {
        event_id: EventId,
        role_name: String,
        failed: usize,
        skipped: usize,
        failed_attempts: i32,
        failed_at: DateTime<Utc>,
    },
    PartitionProvisioned {
        partition: String,
        succeeded: usize,
        failed: usize,
        provisioned_at: DateTime<Utc>,
    },
    RunFinished {
        task_result_id: TaskResultId,
        status: CompletionStatus,
        finished_at: DateTime<Utc>,
    },
}
