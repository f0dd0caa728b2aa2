// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-memory provisioning collaborators.
//
// They record every project they see and fail identities listed up front,
// which is what the CLI fixtures and the integration tests need.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::domain::identity::Identity;
use crate::domain::plan::ProvisioningPlan;
use crate::domain::provisioning::{
    IdentityRefresher, Provisioner, ProvisioningError, ProvisioningProject, WorkflowLauncher,
    WorkflowLaunchResult,
};

#[derive(Clone, Default)]
pub struct InMemoryProvisioner {
    failing: Arc<HashSet<String>>,
    uncompilable: Arc<HashSet<String>>,
    executed: Arc<Mutex<Vec<ProvisioningProject>>>,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities whose projects are never fully committed
    pub fn failing<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing = Arc::new(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Identities whose plans fail to compile
    pub fn uncompilable<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uncompilable = Arc::new(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn executed(&self) -> Vec<ProvisioningProject> {
        self.executed.lock().clone()
    }

    pub fn executed_for(&self, identity_id: &str) -> Vec<ProvisioningProject> {
        self.executed
            .lock()
            .iter()
            .filter(|p| p.plan.identity_id.as_deref() == Some(identity_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Provisioner for InMemoryProvisioner {
    async fn compile(
        &self,
        identity: &Identity,
        plan: &ProvisioningPlan,
    ) -> Result<ProvisioningProject, ProvisioningError> {
        if self.uncompilable.contains(&identity.id) {
            return Err(ProvisioningError::Compile(format!(
                "cannot compile plan for {}",
                identity.name
            )));
        }
        Ok(ProvisioningProject::new(plan.clone()))
    }

    async fn execute(
        &self,
        identity: &Identity,
        mut project: ProvisioningProject,
    ) -> Result<ProvisioningProject, ProvisioningError> {
        if self.failing.contains(&identity.id) {
            project.fully_committed = false;
            project
                .error_messages
                .push(format!("Connector rejected changes for {}", identity.name));
        } else {
            project.fully_committed = true;
        }
        debug!(identity = %identity.name, committed = project.fully_committed, "Executed project");
        self.executed.lock().push(project.clone());
        Ok(project)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryWorkflowLauncher {
    workflows: Arc<HashSet<String>>,
    failing: Arc<HashSet<String>>,
    launched: Arc<Mutex<Vec<(String, String)>>>,
}

impl InMemoryWorkflowLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflows<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workflows = Arc::new(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn failing<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing = Arc::new(ids.into_iter().map(Into::into).collect());
        self
    }

    /// `(workflow, identity id)` pairs launched so far
    pub fn launched(&self) -> Vec<(String, String)> {
        self.launched.lock().clone()
    }
}

#[async_trait]
impl WorkflowLauncher for InMemoryWorkflowLauncher {
    async fn exists(&self, workflow: &str) -> Result<bool, ProvisioningError> {
        Ok(self.workflows.contains(workflow))
    }

    async fn launch(
        &self,
        workflow: &str,
        identity: &Identity,
        _project: &ProvisioningProject,
    ) -> Result<Option<WorkflowLaunchResult>, ProvisioningError> {
        if !self.workflows.contains(workflow) {
            return Ok(None);
        }
        self.launched
            .lock()
            .push((workflow.to_string(), identity.id.clone()));
        let failed = self.failing.contains(&identity.id);
        Ok(Some(WorkflowLaunchResult {
            case_id: Some(format!("{}:{}", workflow, identity.id)),
            failed,
            messages: Vec::new(),
        }))
    }
}

#[derive(Clone, Default)]
pub struct RecordingIdentityRefresher {
    refreshed: Arc<Mutex<Vec<String>>>,
}

impl RecordingIdentityRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.refreshed.lock().clone()
    }
}

#[async_trait]
impl IdentityRefresher for RecordingIdentityRefresher {
    async fn refresh(&self, identity: &Identity, policies: &[String]) -> Result<(), ProvisioningError> {
        debug!(identity = %identity.name, policies = policies.len(), "Refreshed identity");
        self.refreshed.lock().push(identity.id.clone());
        Ok(())
    }
}
