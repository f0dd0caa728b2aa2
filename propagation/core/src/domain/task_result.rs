// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Results
//!
//! A run owns one *master* [`TaskResult`]; every request of the run owns a
//! *partition* result that is registered on the master by name. Partition
//! results are separate records so that concurrent Provision requests never
//! write the same row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::EventStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskResultId(pub Uuid);

impl TaskResultId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self { kind: MessageKind::Info, text: text.into() }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self { kind: MessageKind::Warn, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { kind: MessageKind::Error, text: text.into() }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.kind {
            MessageKind::Info => "INFO",
            MessageKind::Warn => "WARN",
            MessageKind::Error => "ERROR",
        };
        write!(f, "[{}] {}", label, self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    Success,
    Warning,
    Error,
    Terminated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    /// Identities updated successfully.
    pub total: usize,
    pub events_total: usize,
    pub events_processed: usize,
    pub events_pending: usize,
    pub event_tally: usize,
    pub events_failed: usize,
    pub events_succeeded: usize,
    pub events_pruned: usize,
    /// Sum of identities succeeded across processed events.
    pub debug_total: usize,
    pub identities_refreshed: usize,
}

/// Outcome of one event, recorded on the master result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventProcessingDetails {
    pub role_name: String,
    pub identities_to_process: usize,
    pub identities_succeeded: usize,
    pub identities_failed: usize,
    pub identities_skipped: usize,
    pub status: EventStatus,
}

impl EventProcessingDetails {
    /// Details for an event dropped without provisioning anything.
    pub fn empty(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            identities_to_process: 0,
            identities_succeeded: 0,
            identities_failed: 0,
            identities_skipped: 0,
            status: EventStatus::Success,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionResultRef {
    pub name: String,
    pub id: TaskResultId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: TaskResultId,
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub completion_status: Option<CompletionStatus>,
    #[serde(default)]
    pub terminated: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub stats: TaskStatistics,
    /// Compressed CSV of identities that failed in this partition.
    #[serde(default)]
    pub failed_identities: Option<String>,
    #[serde(default)]
    pub event_details: Vec<EventProcessingDetails>,
    #[serde(default)]
    pub partition_results: Vec<PartitionResultRef>,
    pub launched_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TaskResultId::new(),
            name: name.into(),
            messages: Vec::new(),
            completion_status: None,
            terminated: false,
            hidden: false,
            progress: None,
            stats: TaskStatistics::default(),
            failed_identities: None,
            event_details: Vec::new(),
            partition_results: Vec::new(),
            launched_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.kind == MessageKind::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.messages.iter().any(|m| m.kind == MessageKind::Warn)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.kind == MessageKind::Error)
    }

    /// Register a partition result by name. Returns false when a result
    /// with that name is already registered.
    pub fn append_partition_result(&mut self, name: &str, id: TaskResultId) -> bool {
        if self.partition_result(name).is_some() {
            return false;
        }
        self.partition_results.push(PartitionResultRef {
            name: name.to_string(),
            id,
        });
        true
    }

    pub fn partition_result(&self, name: &str) -> Option<&PartitionResultRef> {
        self.partition_results.iter().find(|p| p.name == name)
    }

    pub fn calculate_completion_status(&self) -> CompletionStatus {
        if self.terminated {
            CompletionStatus::Terminated
        } else if self.has_errors() {
            CompletionStatus::Error
        } else if self.has_warnings() {
            CompletionStatus::Warning
        } else {
            CompletionStatus::Success
        }
    }

    pub fn complete(&mut self) {
        self.completion_status = Some(self.calculate_completion_status());
        self.completed_at = Some(Utc::now());
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_result_registered_once() {
        let mut master = TaskResult::new("master");
        let id = TaskResultId::new();
        assert!(master.append_partition_result("p1", id));
        assert!(!master.append_partition_result("p1", TaskResultId::new()));
        assert_eq!(master.partition_results.len(), 1);
        assert_eq!(master.partition_result("p1").map(|p| p.id), Some(id));
    }

    #[test]
    fn test_completion_status() {
        let mut result = TaskResult::new("r");
        assert_eq!(result.calculate_completion_status(), CompletionStatus::Success);
        result.add_message(Message::warn("w"));
        assert_eq!(result.calculate_completion_status(), CompletionStatus::Warning);
        result.add_message(Message::error("e"));
        assert_eq!(result.calculate_completion_status(), CompletionStatus::Error);
        result.terminated = true;
        result.complete();
        assert_eq!(result.completion_status, Some(CompletionStatus::Terminated));
        assert!(result.is_complete());
    }
}
