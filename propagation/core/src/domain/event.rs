// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Role Change Event Aggregate
//!
//! A [`RoleChangeEvent`] is recorded whenever a role changes and is consumed
//! by a propagation run. Successful events are deleted; events with failures
//! are kept as `Failed` together with the identities that failed or were
//! skipped, and retried by the next run until they are pruned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::plan::ProvisioningPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    Pending,
    Failed,
    Success,
    Pruned,
}

impl Default for EventStatus {
    fn default() -> Self {
        EventStatus::Pending
    }
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventStatus::Failed | EventStatus::Success | EventStatus::Pruned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleChangeEvent {
    pub id: EventId,
    pub role_id: String,
    pub role_name: String,
    /// Set when the role itself was deleted.
    #[serde(default)]
    pub role_deleted: bool,
    #[serde(default)]
    pub plan: Option<ProvisioningPlan>,
    #[serde(default)]
    pub status: EventStatus,
    /// Identities affected on the first visit; 0 until then.
    #[serde(default)]
    pub affected_identity_count: usize,
    #[serde(default)]
    pub failed_identity_ids: BTreeSet<String>,
    #[serde(default)]
    pub skipped_identity_ids: BTreeSet<String>,
    #[serde(default)]
    pub failed_attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl RoleChangeEvent {
    pub fn new(
        role_id: impl Into<String>,
        role_name: impl Into<String>,
        plan: Option<ProvisioningPlan>,
    ) -> Self {
        Self {
            id: EventId::new(),
            role_id: role_id.into(),
            role_name: role_name.into(),
            role_deleted: false,
            plan,
            status: EventStatus::Pending,
            affected_identity_count: 0,
            failed_identity_ids: BTreeSet::new(),
            skipped_identity_ids: BTreeSet::new(),
            failed_attempts: 0,
            created_at: Utc::now(),
        }
    }

    pub fn deleted_role(mut self) -> Self {
        self.role_deleted = true;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Role validity from `(role_deleted, plan)`:
    ///
    /// | change | role_deleted | plan | valid |
    /// |---|---|---|---|
    /// | disable role | false | yes | yes |
    /// | remove assigned-role assignments | false | yes | yes |
    /// | remove detected-role assignments | true | yes | yes |
    /// | delete role | true | no | no |
    pub fn is_role_invalid(&self) -> bool {
        self.role_deleted && self.plan.is_none()
    }

    pub fn increment_failed_attempts(&mut self) {
        self.failed_attempts += 1;
    }

    pub fn reset_failed_attempts(&mut self) {
        self.failed_attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_validity_truth_table() {
        let plan = Some(ProvisioningPlan::new());
        assert!(!RoleChangeEvent::new("r", "R", plan.clone()).is_role_invalid());
        assert!(!RoleChangeEvent::new("r", "R", plan).deleted_role().is_role_invalid());
        assert!(RoleChangeEvent::new("r", "R", None).deleted_role().is_role_invalid());
        assert!(!RoleChangeEvent::new("r", "R", None).is_role_invalid());
    }

    #[test]
    fn test_failed_attempts() {
        let mut event = RoleChangeEvent::new("r", "R", None);
        event.increment_failed_attempts();
        event.increment_failed_attempts();
        assert_eq!(event.failed_attempts, 2);
        event.reset_failed_attempts();
        assert_eq!(event.failed_attempts, 0);
    }
}
