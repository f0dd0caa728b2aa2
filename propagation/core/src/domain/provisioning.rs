// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Provisioning collaborators.
//!
//! A plan is compiled into a [`ProvisioningProject`] and then either executed
//! directly by the [`Provisioner`] or handed to a provisioning workflow through
//! the [`WorkflowLauncher`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::identity::Identity;
use crate::domain::plan::ProvisioningPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningProject {
    pub plan: ProvisioningPlan,
    #[serde(default)]
    pub fully_committed: bool,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

impl ProvisioningProject {
    pub fn new(plan: ProvisioningPlan) -> Self {
        Self {
            plan,
            fully_committed: false,
            error_messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowLaunchResult {
    pub case_id: Option<String>,
    pub failed: bool,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Plan compilation failed: {0}")]
    Compile(String),

    #[error("Provisioning failed: {0}")]
    Execute(String),

    #[error("Workflow launch failed: {0}")]
    Workflow(String),

    #[error("Identity refresh failed: {0}")]
    Refresh(String),
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Compile a plan for `identity` into a project
    async fn compile(
        &self,
        identity: &Identity,
        plan: &ProvisioningPlan,
    ) -> Result<ProvisioningProject, ProvisioningError>;

    /// Execute a compiled project, returning it with its commit state
    async fn execute(
        &self,
        identity: &Identity,
        project: ProvisioningProject,
    ) -> Result<ProvisioningProject, ProvisioningError>;
}

#[async_trait]
pub trait WorkflowLauncher: Send + Sync {
    async fn exists(&self, workflow: &str) -> Result<bool, ProvisioningError>;

    /// Launch `workflow` for the project. `None` means nothing was launched.
    async fn launch(
        &self,
        workflow: &str,
        identity: &Identity,
        project: &ProvisioningProject,
    ) -> Result<Option<WorkflowLaunchResult>, ProvisioningError>;
}

#[async_trait]
pub trait IdentityRefresher: Send + Sync {
    async fn refresh(&self, identity: &Identity, policies: &[String]) -> Result<(), ProvisioningError>;
}
