// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// YAML fixtures that seed the in-memory adapters.
//
// A fixture lists roles, identities and pending role change events, plus the
// identities whose provisioning should fail. Events are created in file
// order, `age_minutes` before the fixture is seeded.
//
// ```yaml
// roles:
//   - { id: r1, name: Engineering }
// identities:
//   - id: i1
//     name: alice
//     role_assignments:
//       - { assignment_id: a1, role_id: r1, role_name: Engineering }
// events:
//   - { role_id: r1, role_name: Engineering }
// failing_identities: [i1]
// ```

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::application::propagation_service::PropagationDependencies;
use crate::domain::event::{EventStatus, RoleChangeEvent};
use crate::domain::identity::{Identity, Role};
use crate::domain::plan::ProvisioningPlan;
use crate::domain::propagation_config::PropagationSettings;
use crate::domain::repository::{
    IdentityRepository, RepositoryError, RoleChangeEventRepository, RoleRepository,
};
use crate::infrastructure::compression::ZstdIdListCodec;
use crate::infrastructure::provisioning::{
    InMemoryProvisioner, InMemoryWorkflowLauncher, RecordingIdentityRefresher,
};
use crate::infrastructure::repositories::{
    InMemoryIdentityRepository, InMemoryRoleChangeEventRepository, InMemoryRoleRepository,
    InMemoryTaskResultRepository,
};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to read fixture {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse fixture: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A pending role change as written in a fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureEvent {
    pub role_id: String,
    pub role_name: String,
    #[serde(default)]
    pub role_deleted: bool,
    #[serde(default)]
    pub plan: Option<ProvisioningPlan>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub failed_identity_ids: BTreeSet<String>,
    #[serde(default)]
    pub failed_attempts: i32,
    #[serde(default = "default_age_minutes")]
    pub age_minutes: i64,
}

fn default_age_minutes() -> i64 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub identities: Vec<Identity>,
    #[serde(default)]
    pub events: Vec<FixtureEvent>,
    /// Identities whose projects are never fully committed.
    #[serde(default)]
    pub failing_identities: Vec<String>,
    /// Identities whose plans fail to compile; fatal for their partition.
    #[serde(default)]
    pub uncompilable_identities: Vec<String>,
    /// Workflows known to the workflow launcher.
    #[serde(default)]
    pub workflows: Vec<String>,
}

/// In-memory adapters seeded from a fixture.
#[derive(Clone)]
pub struct SeededStore {
    pub roles: InMemoryRoleRepository,
    pub identities: InMemoryIdentityRepository,
    pub events: InMemoryRoleChangeEventRepository,
    pub results: InMemoryTaskResultRepository,
    pub provisioner: InMemoryProvisioner,
    pub workflows: InMemoryWorkflowLauncher,
    pub refresher: RecordingIdentityRefresher,
    pub codec: ZstdIdListCodec,
}

impl SeededStore {
    pub fn dependencies(&self) -> PropagationDependencies {
        PropagationDependencies {
            roles: Arc::new(self.roles.clone()),
            identities: Arc::new(self.identities.clone()),
            events: Arc::new(self.events.clone()),
            provisioner: Arc::new(self.provisioner.clone()),
            workflows: Arc::new(self.workflows.clone()),
            refresher: Arc::new(self.refresher.clone()),
            codec: Arc::new(self.codec.clone()),
        }
    }
}

impl Fixture {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, FixtureError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Role change events in creation order. Events sharing an age keep
    /// their file order.
    pub fn role_change_events(&self) -> Vec<RoleChangeEvent> {
        let now = Utc::now();
        let count = self.events.len() as i64;

        self.events
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let created_at = now - Duration::minutes(spec.age_minutes)
                    - Duration::milliseconds(count - index as i64);
                let mut event = RoleChangeEvent::new(&spec.role_id, &spec.role_name, spec.plan.clone())
                    .created_at(created_at);
                event.role_deleted = spec.role_deleted;
                event.status = spec.status;
                event.failed_identity_ids = spec.failed_identity_ids.clone();
                event.failed_attempts = spec.failed_attempts;
                event
            })
            .collect()
    }

    pub async fn seed(&self, settings: &PropagationSettings) -> Result<SeededStore, FixtureError> {
        let store = SeededStore {
            roles: InMemoryRoleRepository::new(),
            identities: InMemoryIdentityRepository::new(),
            events: InMemoryRoleChangeEventRepository::new(),
            results: InMemoryTaskResultRepository::new(),
            provisioner: InMemoryProvisioner::new()
                .failing(self.failing_identities.iter().cloned())
                .uncompilable(self.uncompilable_identities.iter().cloned()),
            workflows: InMemoryWorkflowLauncher::new().with_workflows(self.workflows.iter().cloned()),
            refresher: RecordingIdentityRefresher::new(),
            codec: ZstdIdListCodec::new(settings.compression_level),
        };

        for role in &self.roles {
            store.roles.save(role).await?;
        }
        for identity in &self.identities {
            store.identities.save(identity).await?;
        }
        for event in self.role_change_events() {
            store.events.save(&event).await?;
        }

        info!(
            roles = self.roles.len(),
            identities = self.identities.len(),
            events = self.events.len(),
            "Seeded in-memory store from fixture"
        );
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FIXTURE: &str = r#"
roles:
  - { id: r1, name: Engineering }
identities:
  - id: i1
    name: alice
    role_assignments:
      - { assignment_id: a1, role_id: r1, role_name: Engineering }
events:
  - { role_id: r1, role_name: Engineering, age_minutes: 10 }
  - { role_id: r1, role_name: Engineering, age_minutes: 10 }
failing_identities: [i1]
"#;

    #[test]
    fn test_events_keep_file_order() {
        let fixture = Fixture::from_yaml_str(FIXTURE).unwrap();
        let events = fixture.role_change_events();
        assert_eq!(events.len(), 2);
        assert!(events[0].created_at < events[1].created_at);
        assert!(events[1].created_at < Utc::now() - Duration::minutes(9));
    }

    #[tokio::test]
    async fn test_seed_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FIXTURE.as_bytes()).unwrap();

        let fixture = Fixture::from_yaml_file(file.path()).unwrap();
        let store = fixture.seed(&PropagationSettings::default()).await.unwrap();

        assert!(store.roles.find_by_id("r1").await.unwrap().is_some());
        assert!(store.identities.find_by_id("i1").await.unwrap().is_some());
        assert_eq!(store.events.list_all().len(), 2);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = Fixture::from_yaml_file("/nonexistent/fixture.yaml").unwrap_err();
        assert!(matches!(err, FixtureError::Io { .. }));
    }
}
