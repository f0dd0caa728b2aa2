// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Request construction, partition result registration, event selection
//! limits and provisioning progress, exercised against a seeded store
//! without running the queue.

use chrono::{Duration, Utc};
use propagation_core::application::propagation_service::SelectionStop;
use propagation_core::application::request_builder::{
    RequestBuilder, FINISH_REQUEST_NAME, TRANSITION_REQUEST_NAME,
};
use propagation_core::application::task_monitor::TaskMonitor;
use propagation_core::application::RolePropagationService;
use propagation_core::domain::codec::decode_ids;
use propagation_core::domain::propagation_config::PropagationSettings;
use propagation_core::domain::repository::{RoleChangeEventRepository, TaskResultRepository};
use propagation_core::domain::request::{Phase, Request, RequestError, RequestPayload};
use propagation_core::domain::task_result::{MessageKind, TaskResult, TaskResultId};
use propagation_core::infrastructure::fixture::{Fixture, SeededStore};
use std::sync::Arc;

const FIXTURE: &str = r#"
roles:
  - { id: r1, name: Engineering }
identities:
  - { id: i1, name: alice, role_assignments: [{ assignment_id: a1, role_id: r1, role_name: Engineering }] }
  - { id: i2, name: bob, role_assignments: [{ assignment_id: a2, role_id: r1, role_name: Engineering }] }
  - { id: i3, name: carol, role_assignments: [{ assignment_id: a3, role_id: r1, role_name: Engineering }] }
events:
  - { role_id: r1, role_name: Engineering, age_minutes: 5 }
  - { role_id: r1, role_name: Engineering, age_minutes: 5 }
"#;

struct Setup {
    store: SeededStore,
    service: Arc<RolePropagationService>,
    monitor: TaskMonitor,
}

async fn setup(settings: PropagationSettings) -> Setup {
    let store = Fixture::from_yaml_str(FIXTURE)
        .unwrap()
        .seed(&settings)
        .await
        .unwrap();
    let service = Arc::new(RolePropagationService::new(store.dependencies(), settings));

    let master = TaskResult::new("Role Propagation");
    store.results.save(&master).await.unwrap();
    let monitor = TaskMonitor::new(master.id, Arc::new(store.results.clone()));

    Setup {
        store,
        service,
        monitor,
    }
}

impl Setup {
    fn builder(&self, max_partitions: usize) -> RequestBuilder {
        RequestBuilder::new(Arc::clone(&self.service), self.monitor.clone(), max_partitions, None)
    }

    async fn result(&self, id: TaskResultId) -> TaskResult {
        self.monitor.result(id).await.unwrap()
    }
}

#[tokio::test]
async fn test_transition_naming_and_dependencies() {
    let s = setup(PropagationSettings::default()).await;
    let builder = s.builder(4);

    let initial = builder
        .build_transition_request(0, true, Vec::new(), Vec::new(), None)
        .await
        .unwrap();
    assert_eq!(initial.name, format!("{} 1", TRANSITION_REQUEST_NAME));
    assert_eq!(initial.phase, Phase::Transition);
    assert_eq!(initial.dependent_phase, None);

    let follow_up = builder
        .build_transition_request(0, false, Vec::new(), vec!["p".to_string()], None)
        .await
        .unwrap();
    assert_eq!(follow_up.name, format!("{} 2", TRANSITION_REQUEST_NAME));
    assert_eq!(follow_up.dependent_phase, Some(Phase::Provision));
    assert_eq!(follow_up.transition_config().unwrap().request_names, vec!["p"]);

    let finish = builder.build_finish_request(3).await.unwrap();
    assert_eq!(finish.name, FINISH_REQUEST_NAME);
    assert_eq!(finish.phase, Phase::Finish);
    assert_eq!(finish.dependent_phase, Some(Phase::Transition));

    // Transition and Finish results are hidden.
    for request in [&initial, &follow_up, &finish] {
        assert!(s.result(request.partition_result).await.hidden);
    }
    assert_eq!(s.monitor.master_result().await.unwrap().partition_results.len(), 3);
}

#[tokio::test]
async fn test_provision_requests_cover_affected_identities() {
    let s = setup(PropagationSettings::default()).await;
    let mut event = s.store.events.list_all().remove(0);

    let batch = s.builder(2).build_provision_requests(&mut event, 0).await.unwrap();

    assert_eq!(batch.identities_to_process, 3);
    assert_eq!(
        batch.request_names(),
        vec![
            "Role Propagation Partition Engineering (1) - 1 of 2",
            "Role Propagation Partition Engineering (1) - 2 of 2",
        ]
    );
    assert!(decode_ids(&s.store.codec, &batch.compressed_skip_list)
        .unwrap()
        .is_empty());

    let mut ids = Vec::new();
    for request in &batch.requests {
        assert_eq!(request.phase, Phase::Provision);
        assert_eq!(request.dependent_phase, None);
        assert!(!s.result(request.partition_result).await.hidden);
        let RequestPayload::Provision(config) = &request.payload else {
            panic!("expected a provision payload");
        };
        assert_eq!(config.event_id, event.id);
        ids.extend(decode_ids(&s.store.codec, &config.partition.identity_list).unwrap());
    }
    assert_eq!(ids, vec!["i1", "i2", "i3"]);

    // The first visit persists the affected count.
    let stored = s.store.events.find_by_id(event.id).await.unwrap().unwrap();
    assert_eq!(stored.affected_identity_count, 3);
}

#[tokio::test]
async fn test_partition_result_registered_once_per_name() {
    let s = setup(PropagationSettings::default()).await;

    let first = s.monitor.register_partition_result("Partition A", false).await.unwrap();
    let second = s.monitor.register_partition_result("Partition A", true).await.unwrap();

    assert_eq!(first, second);
    let master = s.monitor.master_result().await.unwrap();
    assert_eq!(master.partition_results.len(), 1);
    assert!(!s.result(first).await.hidden);
}

#[test]
fn test_invalid_phase_is_rejected() {
    let err = Request::new(
        "bogus",
        4,
        None,
        TaskResultId::new(),
        RequestPayload::Finish(Default::default()),
    )
    .unwrap_err();
    assert_eq!(err, RequestError::InvalidPhase(4));
    assert!(Phase::try_from(0).is_err());
}

#[tokio::test]
async fn test_expired_deadline_stops_selection() {
    let s = setup(PropagationSettings {
        duration_minutes: 5,
        ..PropagationSettings::default()
    })
    .await;
    let ids = s.service.event_ids(Utc::now()).await.unwrap();
    assert_eq!(ids.len(), 2);

    let selection = s
        .service
        .next_event(&s.monitor, ids.clone(), Some(Utc::now() - Duration::minutes(1)))
        .await
        .unwrap();

    assert_eq!(selection.stop, SelectionStop::TimedOut);
    assert!(selection.event.is_none());
    assert_eq!(selection.remaining, ids);
    let master = s.monitor.master_result().await.unwrap();
    assert!(master
        .messages
        .iter()
        .any(|m| m.kind == MessageKind::Info && m.text.contains("5 minutes")));
}

#[tokio::test]
async fn test_selection_pops_from_head() {
    let s = setup(PropagationSettings::default()).await;
    let ids = s.service.event_ids(Utc::now()).await.unwrap();

    let selection = s.service.next_event(&s.monitor, ids.clone(), None).await.unwrap();

    assert_eq!(selection.stop, SelectionStop::Selected);
    assert_eq!(selection.event.unwrap().id, ids[0]);
    assert_eq!(selection.remaining, vec![ids[1]]);
}

#[tokio::test]
async fn test_progress_skips_missing_identities() {
    let s = setup(PropagationSettings::default()).await;
    let event = s.store.events.list_all().remove(0);
    let ids = vec!["ghost".to_string(), "i1".to_string(), "i2".to_string()];

    let outcome = s
        .service
        .provision_identities(&s.monitor, &event, &ids, false)
        .await
        .unwrap();

    assert_eq!(outcome.report().total, 2);
    let master = s.monitor.master_result().await.unwrap();
    assert_eq!(
        master.progress.as_deref(),
        Some("Processing Identity [bob] (2 of 3).")
    );
}
