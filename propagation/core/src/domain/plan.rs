// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Provisioning plan value objects.
//!
//! A [`ProvisioningPlan`] groups [`AccountRequest`]s per application account.
//! The governance application ([`GOVERNANCE_APPLICATION`]) is the system's own
//! account; role assignments live on it under [`ATT_ASSIGNED_ROLES`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application name of the governance system's own account.
pub const GOVERNANCE_APPLICATION: &str = "Governance";

/// Attribute on the governance account holding assigned roles.
pub const ATT_ASSIGNED_ROLES: &str = "assignedRoles";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Remove,
    Set,
    Retain,
    Revoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountOperation {
    Create,
    Modify,
    Delete,
    Disable,
    Enable,
    Lock,
    Unlock,
}

impl Default for AccountOperation {
    fn default() -> Self {
        AccountOperation::Modify
    }
}

/// Attribute values are either a single string or a multi-valued list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    List(Vec<String>),
}

impl AttributeValue {
    pub fn single(value: impl Into<String>) -> Self {
        AttributeValue::Single(value.into())
    }

    /// Flatten into owned strings.
    pub fn values(&self) -> Vec<String> {
        match self {
            AttributeValue::Single(v) => vec![v.clone()],
            AttributeValue::List(vs) => vs.clone(),
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Single(v) => write!(f, "{}", v),
            AttributeValue::List(vs) => write!(f, "[{}]", vs.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRequest {
    pub name: String,
    #[serde(default)]
    pub operation: Option<Operation>,
    #[serde(default)]
    pub value: Option<AttributeValue>,
    #[serde(default)]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub add_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remove_date: Option<DateTime<Utc>>,
}

impl AttributeRequest {
    pub fn new(name: impl Into<String>, operation: Option<Operation>, value: Option<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            operation,
            value,
            assignment_id: None,
            add_date: None,
            remove_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRequest {
    pub application: String,
    #[serde(default)]
    pub native_identity: Option<String>,
    #[serde(default)]
    pub operation: AccountOperation,
    #[serde(default)]
    pub attribute_requests: Vec<AttributeRequest>,
}

impl AccountRequest {
    pub fn new(application: impl Into<String>, operation: AccountOperation) -> Self {
        Self {
            application: application.into(),
            native_identity: None,
            operation,
            attribute_requests: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, request: AttributeRequest) -> Self {
        self.attribute_requests.push(request);
        self
    }

    pub fn is_governance(&self) -> bool {
        self.application == GOVERNANCE_APPLICATION
    }

    pub fn attribute_request(&self, name: &str) -> Option<&AttributeRequest> {
        self.attribute_requests.iter().find(|a| a.name == name)
    }

    pub fn attribute_request_mut(&mut self, name: &str) -> Option<&mut AttributeRequest> {
        self.attribute_requests.iter_mut().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    #[serde(default)]
    pub identity_id: Option<String>,
    #[serde(default)]
    pub account_requests: Vec<AccountRequest>,
}

impl ProvisioningPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account_request(mut self, request: AccountRequest) -> Self {
        self.account_requests.push(request);
        self
    }

    pub fn governance_request(&self) -> Option<&AccountRequest> {
        self.account_requests.iter().find(|r| r.is_governance())
    }

    /// Governance account request, created as a Modify request when absent.
    pub fn governance_request_or_insert(&mut self) -> &mut AccountRequest {
        let position = match self.account_requests.iter().position(|r| r.is_governance()) {
            Some(position) => position,
            None => {
                self.account_requests
                    .push(AccountRequest::new(GOVERNANCE_APPLICATION, AccountOperation::Modify));
                self.account_requests.len() - 1
            }
        };
        &mut self.account_requests[position]
    }

    /// Operation of the governance `assignedRoles` request, if any.
    pub fn role_operation(&self) -> Option<Operation> {
        self.governance_request()
            .and_then(|r| r.attribute_request(ATT_ASSIGNED_ROLES))
            .and_then(|a| a.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governance_request_is_created_once() {
        let mut plan = ProvisioningPlan::new();
        plan.governance_request_or_insert();
        plan.governance_request_or_insert();
        assert_eq!(plan.account_requests.len(), 1);
        assert_eq!(plan.account_requests[0].operation, AccountOperation::Modify);
    }

    #[test]
    fn test_role_operation() {
        let plan = ProvisioningPlan::new().with_account_request(
            AccountRequest::new(GOVERNANCE_APPLICATION, AccountOperation::Modify).with_attribute(
                AttributeRequest::new(
                    ATT_ASSIGNED_ROLES,
                    Some(Operation::Remove),
                    Some(AttributeValue::single("Engineering")),
                ),
            ),
        );
        assert_eq!(plan.role_operation(), Some(Operation::Remove));
        assert_eq!(ProvisioningPlan::new().role_operation(), None);
    }

    #[test]
    fn test_attribute_value_yaml_forms() {
        let single: AttributeValue = serde_yaml::from_str("admin").unwrap();
        let list: AttributeValue = serde_yaml::from_str("[admin, dev]").unwrap();
        assert_eq!(single, AttributeValue::single("admin"));
        assert_eq!(list, AttributeValue::List(vec!["admin".into(), "dev".into()]));
    }
}
