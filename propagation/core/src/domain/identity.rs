// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Identity & Role Aggregates
//!
//! - [`Role`] — the role being assigned, detected or revoked.
//! - [`Identity`] — a governed identity with its role assignments and
//!   detections.
//!
//! Assignments are what was requested for the identity; detections are what
//! was found on its accounts. Both reference [`RoleTarget`]s that pin the role
//! to specific accounts (native identities) on an application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::plan::AttributeValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
}

impl Role {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role_assignments: Vec<RoleAssignment>,
    #[serde(default)]
    pub role_detections: Vec<RoleDetection>,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role_assignments: Vec::new(),
            role_detections: Vec::new(),
        }
    }

    pub fn with_assignment(mut self, assignment: RoleAssignment) -> Self {
        self.role_assignments.push(assignment);
        self
    }

    pub fn with_detection(mut self, detection: RoleDetection) -> Self {
        self.role_detections.push(detection);
        self
    }

    /// True when a non-negative assignment references `role`.
    pub fn has_assigned_role(&self, role: &Role) -> bool {
        self.role_assignments
            .iter()
            .any(|a| !a.negative && a.references(Some(&role.id), Some(&role.name)))
    }

    /// True when a detection references `role`.
    pub fn has_detected_role(&self, role: &Role) -> bool {
        self.role_detections.iter().any(|d| {
            d.role_id.eq_ignore_ascii_case(&role.id) || d.role_name.eq_ignore_ascii_case(&role.name)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub assignment_id: String,
    pub role_id: String,
    pub role_name: String,
    /// Negative assignments record an explicit revocation and are never propagated.
    #[serde(default)]
    pub negative: bool,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub targets: Vec<RoleTarget>,
}

impl RoleAssignment {
    pub fn new(
        assignment_id: impl Into<String>,
        role_id: impl Into<String>,
        role_name: impl Into<String>,
    ) -> Self {
        Self {
            assignment_id: assignment_id.into(),
            role_id: role_id.into(),
            role_name: role_name.into(),
            negative: false,
            start_date: None,
            end_date: None,
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: RoleTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Case-insensitive match on role id or role name.
    pub fn references(&self, role_id: Option<&str>, role_name: Option<&str>) -> bool {
        let id_match = role_id.is_some_and(|id| id.eq_ignore_ascii_case(&self.role_id));
        let name_match = role_name.is_some_and(|name| name.eq_ignore_ascii_case(&self.role_name));
        id_match || name_match
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDetection {
    pub role_id: String,
    pub role_name: String,
    #[serde(default)]
    pub assignment_ids: Vec<String>,
    #[serde(default)]
    pub targets: Vec<RoleTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleTarget {
    pub application_name: String,
    pub native_identity: String,
    #[serde(default)]
    pub items: Vec<AccountItem>,
}

impl RoleTarget {
    pub fn new(application_name: impl Into<String>, native_identity: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            native_identity: native_identity.into(),
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.items.push(AccountItem {
            name: name.into(),
            value,
        });
        self
    }
}

/// An entitlement found on an account. List values behave as sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountItem {
    pub name: String,
    pub value: AttributeValue,
}
