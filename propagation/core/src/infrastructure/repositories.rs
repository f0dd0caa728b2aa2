// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-memory repository implementations, used by the CLI and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::event::{EventId, EventStatus, RoleChangeEvent};
use crate::domain::identity::{Identity, Role};
use crate::domain::repository::{
    IdentityRepository, RepositoryError, RoleChangeEventRepository, RoleRepository,
    TaskResultRepository,
};
use crate::domain::task_result::{TaskResult, TaskResultId};

#[derive(Clone, Default)]
pub struct InMemoryRoleRepository {
    roles: Arc<RwLock<HashMap<String, Role>>>,
}

impl InMemoryRoleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn save(&self, role: &Role) -> Result<(), RepositoryError> {
        self.roles.write().insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Role>, RepositoryError> {
        Ok(self.roles.read().get(id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>, RepositoryError> {
        Ok(self.roles.read().values().find(|r| r.name == name).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.roles
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("role {}", id)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryIdentityRepository {
    identities: Arc<RwLock<HashMap<String, Identity>>>,
}

impl InMemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn ids_matching(&self, predicate: impl Fn(&Identity) -> bool) -> Vec<String> {
        let mut ids: Vec<String> = self
            .identities
            .read()
            .values()
            .filter(|identity| predicate(identity))
            .map(|identity| identity.id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn save(&self, identity: &Identity) -> Result<(), RepositoryError> {
        self.identities.write().insert(identity.id.clone(), identity.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, RepositoryError> {
        Ok(self.identities.read().get(id).cloned())
    }

    async fn ids_with_assigned_role(&self, role: &Role) -> Result<Vec<String>, RepositoryError> {
        Ok(self.ids_matching(|identity| identity.has_assigned_role(role)))
    }

    async fn ids_with_detected_role(&self, role: &Role) -> Result<Vec<String>, RepositoryError> {
        Ok(self.ids_matching(|identity| identity.has_detected_role(role)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRoleChangeEventRepository {
    events: Arc<RwLock<HashMap<EventId, RoleChangeEvent>>>,
}

impl InMemoryRoleChangeEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored events ordered by `(created_at, id)`
    pub fn list_all(&self) -> Vec<RoleChangeEvent> {
        let mut events: Vec<RoleChangeEvent> = self.events.read().values().cloned().collect();
        events.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        events
    }
}

#[async_trait]
impl RoleChangeEventRepository for InMemoryRoleChangeEventRepository {
    async fn save(&self, event: &RoleChangeEvent) -> Result<(), RepositoryError> {
        self.events.write().insert(event.id, event.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<RoleChangeEvent>, RepositoryError> {
        Ok(self.events.read().get(&id).cloned())
    }

    async fn delete(&self, id: EventId) -> Result<(), RepositoryError> {
        self.events
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("event {}", id)))
    }

    async fn exists(&self, id: EventId) -> Result<bool, RepositoryError> {
        Ok(self.events.read().contains_key(&id))
    }

    async fn ids_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<EventId>, RepositoryError> {
        Ok(self
            .list_all()
            .into_iter()
            .filter(|event| event.created_at < cutoff)
            .map(|event| event.id)
            .collect())
    }

    async fn failed_created_up_to(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RoleChangeEvent>, RepositoryError> {
        Ok(self
            .list_all()
            .into_iter()
            .filter(|event| event.status == EventStatus::Failed && event.created_at <= cutoff)
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTaskResultRepository {
    results: Arc<RwLock<HashMap<TaskResultId, TaskResult>>>,
}

impl InMemoryTaskResultRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskResultRepository for InMemoryTaskResultRepository {
    async fn save(&self, result: &TaskResult) -> Result<(), RepositoryError> {
        self.results.write().insert(result.id, result.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: TaskResultId) -> Result<Option<TaskResult>, RepositoryError> {
        Ok(self.results.read().get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::RoleAssignment;
    use chrono::Duration;

    #[tokio::test]
    async fn test_event_ids_are_ordered_and_cut_off() {
        let repo = InMemoryRoleChangeEventRepository::new();
        let now = Utc::now();
        let late = RoleChangeEvent::new("r1", "R1", None).created_at(now - Duration::seconds(1));
        let early = RoleChangeEvent::new("r2", "R2", None).created_at(now - Duration::seconds(5));
        let future = RoleChangeEvent::new("r3", "R3", None).created_at(now + Duration::seconds(5));
        for event in [&late, &early, &future] {
            repo.save(event).await.unwrap();
        }

        let ids = repo.ids_created_before(now).await.unwrap();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn test_failed_events_up_to_cutoff() {
        let repo = InMemoryRoleChangeEventRepository::new();
        let now = Utc::now();
        let mut failed = RoleChangeEvent::new("r1", "R1", None).created_at(now);
        failed.status = EventStatus::Failed;
        let mut later = RoleChangeEvent::new("r2", "R2", None).created_at(now + Duration::seconds(1));
        later.status = EventStatus::Failed;
        let pending = RoleChangeEvent::new("r3", "R3", None).created_at(now - Duration::seconds(1));
        for event in [&failed, &later, &pending] {
            repo.save(event).await.unwrap();
        }

        let found = repo.failed_created_up_to(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, failed.id);
    }

    #[tokio::test]
    async fn test_assigned_role_query_is_sorted() {
        let repo = InMemoryIdentityRepository::new();
        let role = Role::new("r1", "Engineering");
        for id in ["i3", "i1", "i2"] {
            let identity = Identity::new(id, id).with_assignment(RoleAssignment::new("a", "r1", "Engineering"));
            repo.save(&identity).await.unwrap();
        }
        repo.save(&Identity::new("i0", "nobody")).await.unwrap();

        let ids = repo.ids_with_assigned_role(&role).await.unwrap();
        assert_eq!(ids, vec!["i1", "i2", "i3"]);
        assert!(repo.ids_with_detected_role(&role).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_role() {
        let repo = InMemoryRoleRepository::new();
        assert!(matches!(repo.delete("nope").await, Err(RepositoryError::NotFound(_))));
    }
}
