// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root: one repository per
//! aggregate, interface defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `RoleRepository` | `Role` | `InMemoryRoleRepository` |
//! | `IdentityRepository` | `Identity` | `InMemoryIdentityRepository` |
//! | `RoleChangeEventRepository` | `RoleChangeEvent` | `InMemoryRoleChangeEventRepository` |
//! | `TaskResultRepository` | `TaskResult` | `InMemoryTaskResultRepository` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::event::{EventId, RoleChangeEvent};
use crate::domain::identity::{Identity, Role};
use crate::domain::task_result::{TaskResult, TaskResultId};

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn save(&self, role: &Role) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Role>, RepositoryError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>, RepositoryError>;

    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn save(&self, identity: &Identity) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, RepositoryError>;

    /// Ids of identities holding a non-negative assignment of `role`, sorted
    async fn ids_with_assigned_role(&self, role: &Role) -> Result<Vec<String>, RepositoryError>;

    /// Ids of identities with a detection of `role`, sorted
    async fn ids_with_detected_role(&self, role: &Role) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait RoleChangeEventRepository: Send + Sync {
    /// Save event (create or update)
    async fn save(&self, event: &RoleChangeEvent) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: EventId) -> Result<Option<RoleChangeEvent>, RepositoryError>;

    async fn delete(&self, id: EventId) -> Result<(), RepositoryError>;

    async fn exists(&self, id: EventId) -> Result<bool, RepositoryError>;

    /// Ids of events created strictly before `cutoff`, ordered by `(created_at, id)`
    async fn ids_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<EventId>, RepositoryError>;

    /// Failed events created at or before `cutoff`
    async fn failed_created_up_to(&self, cutoff: DateTime<Utc>) -> Result<Vec<RoleChangeEvent>, RepositoryError>;
}

#[async_trait]
pub trait TaskResultRepository: Send + Sync {
    async fn save(&self, result: &TaskResult) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: TaskResultId) -> Result<Option<TaskResult>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for RepositoryError {
    fn from(err: serde_yaml::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
