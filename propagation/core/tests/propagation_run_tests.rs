// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end propagation runs over the in-memory adapters.
//!
//! Each test seeds a store from a YAML fixture, runs the propagation until
//! the request queue is drained, then inspects the events left behind, the
//! master result and what the provisioning collaborators saw.

use propagation_core::application::task_monitor::TaskMonitor;
use propagation_core::application::{PropagationRunner, RolePropagationService};
use propagation_core::domain::codec::decode_ids;
use propagation_core::domain::event::EventStatus;
use propagation_core::domain::events::{DeletionReason, PropagationEvent};
use propagation_core::domain::propagation_config::PropagationSettings;
use propagation_core::domain::repository::RoleRepository;
use propagation_core::domain::task_result::{CompletionStatus, MessageKind, TaskResult};
use propagation_core::infrastructure::fixture::{Fixture, SeededStore};
use propagation_core::infrastructure::request_queue::InMemoryRequestQueue;
use propagation_core::infrastructure::EventBus;
use std::collections::BTreeSet;
use std::sync::Arc;

const ENGINEERING: &str = r#"
roles:
  - { id: r1, name: Engineering }
  - { id: r2, name: Finance }
  - { id: r3, name: Empty }
identities:
  - { id: i1, name: alice, role_assignments: [{ assignment_id: a1, role_id: r1, role_name: Engineering }] }
  - { id: i2, name: bob, role_assignments: [{ assignment_id: a2, role_id: r1, role_name: Engineering }] }
  - id: i3
    name: carol
    role_assignments:
      - { assignment_id: a3, role_id: r1, role_name: Engineering }
      - { assignment_id: a4, role_id: r2, role_name: Finance }
  - { id: i4, name: dave, role_assignments: [{ assignment_id: a5, role_id: r1, role_name: Engineering }] }
  - { id: i5, name: erin, role_assignments: [{ assignment_id: a6, role_id: r1, role_name: Engineering }] }
  - { id: i6, name: frank, role_assignments: [{ assignment_id: a7, role_id: r2, role_name: Finance }] }
"#;

struct Harness {
    store: SeededStore,
    runner: PropagationRunner,
    bus: EventBus,
}

impl Harness {
    fn monitor(&self, result: &TaskResult) -> TaskMonitor {
        TaskMonitor::new(result.id, Arc::new(self.store.results.clone()))
    }

    async fn partition_results(&self, result: &TaskResult) -> Vec<TaskResult> {
        self.monitor(result).partition_results().await.unwrap()
    }
}

fn settings() -> PropagationSettings {
    PropagationSettings {
        max_partitions: 2,
        ..PropagationSettings::default()
    }
}

async fn harness(extra: &str, settings: PropagationSettings) -> Harness {
    let fixture = Fixture::from_yaml_str(&format!("{}{}", ENGINEERING, extra)).unwrap();
    let store = fixture.seed(&settings).await.unwrap();
    let bus = EventBus::with_default_capacity();
    let service = RolePropagationService::new(store.dependencies(), settings).with_event_bus(bus.clone());
    let runner = PropagationRunner::new(
        Arc::new(service),
        Arc::new(InMemoryRequestQueue::new()),
        Arc::new(store.results.clone()),
    );
    Harness { store, runner, bus }
}

fn has_message(result: &TaskResult, kind: MessageKind, fragment: &str) -> bool {
    result
        .messages
        .iter()
        .any(|m| m.kind == kind && m.text.contains(fragment))
}

#[tokio::test]
async fn test_successful_run_deletes_event() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
"#,
        settings(),
    )
    .await;

    let result = h.runner.run().await.unwrap();

    assert_eq!(result.completion_status, Some(CompletionStatus::Success));
    assert!(has_message(&result, MessageKind::Info, "Role propagation completed"));
    assert!(h.store.events.list_all().is_empty());
    assert_eq!(h.store.provisioner.executed().len(), 5);

    assert_eq!(result.stats.events_total, 1);
    assert_eq!(result.stats.events_processed, 1);
    assert_eq!(result.stats.events_succeeded, 1);
    assert_eq!(result.stats.events_pending, 0);
    assert_eq!(result.stats.event_tally, 1);
    assert_eq!(result.stats.debug_total, 5);
}

#[tokio::test]
async fn test_failed_identity_keeps_event_failed() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
failing_identities: [i3]
"#,
        settings(),
    )
    .await;

    let result = h.runner.run().await.unwrap();

    assert_eq!(result.completion_status, Some(CompletionStatus::Error));
    assert!(has_message(&result, MessageKind::Error, "completed with failures"));

    let events = h.store.events.list_all();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.status, EventStatus::Failed);
    // Nothing was skipped, so every affected identity counts.
    assert_eq!(event.affected_identity_count, 5);
    assert_eq!(event.failed_identity_ids, BTreeSet::from(["i3".to_string()]));
    assert!(event.skipped_identity_ids.is_empty());
    assert_eq!(event.failed_attempts, 0);

    let details = &result.event_details[0];
    assert_eq!(details.role_name, "Engineering");
    assert_eq!(details.identities_to_process, 5);
    assert_eq!(details.identities_succeeded, 4);
    assert_eq!(details.identities_failed, 1);
    assert_eq!(details.status, EventStatus::Failed);
    assert_eq!(result.stats.events_failed, 1);

    // i1..i3 land in the first partition of two.
    let partitions = h.partition_results(&result).await;
    let first = partitions
        .iter()
        .find(|p| p.name == "Role Propagation Partition Engineering (1) - 1 of 2")
        .unwrap();
    assert!(!first.hidden);
    assert_eq!(first.stats.total, 2);
    assert_eq!(first.completion_status, Some(CompletionStatus::Error));
    assert!(has_message(
        first,
        MessageKind::Error,
        "Error propagating changes for role Engineering to identity carol"
    ));
    assert!(has_message(
        first,
        MessageKind::Error,
        "1 identities failed provisioning for role Engineering"
    ));
    let failed = decode_ids(&h.store.codec, first.failed_identities.as_deref().unwrap()).unwrap();
    assert_eq!(failed, vec!["i3".to_string()]);

    let second = partitions
        .iter()
        .find(|p| p.name == "Role Propagation Partition Engineering (1) - 2 of 2")
        .unwrap();
    assert_eq!(second.stats.total, 2);
    assert_eq!(second.completion_status, Some(CompletionStatus::Success));
}

#[tokio::test]
async fn test_identity_failed_earlier_is_skipped() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
  - { role_id: r2, role_name: Finance }
failing_identities: [i3]
"#,
        settings(),
    )
    .await;

    let result = h.runner.run().await.unwrap();

    // i3 holds both roles but is only provisioned for the first event.
    assert_eq!(h.store.provisioner.executed_for("i3").len(), 1);
    assert_eq!(h.store.provisioner.executed_for("i6").len(), 1);

    let events = h.store.events.list_all();
    assert_eq!(events.len(), 2);
    let finance = events.iter().find(|e| e.role_name == "Finance").unwrap();
    assert_eq!(finance.status, EventStatus::Failed);
    assert!(finance.failed_identity_ids.is_empty());
    assert_eq!(finance.skipped_identity_ids, BTreeSet::from(["i3".to_string()]));
    // Skipped identities are left out of the affected count.
    assert_eq!(finance.affected_identity_count, 1);
    assert!(finance
        .skipped_identity_ids
        .is_disjoint(&finance.failed_identity_ids));
    assert_eq!(finance.failed_attempts, 0);

    let details = result
        .event_details
        .iter()
        .find(|d| d.role_name == "Finance")
        .unwrap();
    assert_eq!(details.identities_to_process, 2);
    assert_eq!(details.identities_succeeded, 1);
    assert_eq!(details.identities_skipped, 1);

    let partitions = h.partition_results(&result).await;
    assert!(partitions
        .iter()
        .any(|p| p.hidden && has_message(p, MessageKind::Error, "1 identities were skipped for role Finance")));
    assert_eq!(result.stats.event_tally, 2);
}

#[tokio::test]
async fn test_repeated_failure_prunes_event() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
failing_identities: [i3]
"#,
        PropagationSettings {
            max_failed_attempts: 1,
            ..settings()
        },
    )
    .await;

    h.runner.run().await.unwrap();
    assert_eq!(h.store.events.list_all()[0].failed_attempts, 0);

    // The retry only provisions the identity that failed and makes no progress.
    let result = h.runner.run().await.unwrap();

    assert!(h.store.events.list_all().is_empty());
    assert_eq!(h.store.provisioner.executed_for("i3").len(), 2);
    assert_eq!(h.store.provisioner.executed_for("i1").len(), 1);
    assert!(has_message(&result, MessageKind::Warn, "was pruned after 1 failed attempts"));
    assert_eq!(result.stats.events_pruned, 1);

    let details = &result.event_details[0];
    assert_eq!(details.status, EventStatus::Pruned);
    assert_eq!(details.identities_to_process, 1);
    assert_eq!(details.identities_failed, 1);
}

#[tokio::test]
async fn test_invalid_events_are_deleted_without_provisioning() {
    let h = harness(
        r#"
events:
  - { role_id: rX, role_name: Ghost }
  - { role_id: r2, role_name: Finance, role_deleted: true }
  - { role_id: r3, role_name: Empty }
"#,
        settings(),
    )
    .await;

    let mut receiver = h.bus.subscribe();
    let result = h.runner.run().await.unwrap();

    assert!(h.store.events.list_all().is_empty());
    assert!(h.store.provisioner.executed().is_empty());
    // The deleted role cascades.
    assert!(h.store.roles.find_by_id("r2").await.unwrap().is_none());
    assert!(h.store.roles.find_by_id("r3").await.unwrap().is_some());

    assert_eq!(result.event_details.len(), 3);
    assert!(result.event_details.iter().all(|d| d.identities_to_process == 0));
    assert_eq!(result.stats.event_tally, 0);
    assert_eq!(result.completion_status, Some(CompletionStatus::Success));

    let partitions = h.partition_results(&result).await;
    assert_eq!(partitions.len(), 2);
    assert!(partitions.iter().all(|p| p.hidden));

    let mut reasons = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let PropagationEvent::EventDeleted { reason, .. } = event {
            reasons.push(reason);
        }
    }
    assert_eq!(
        reasons,
        vec![
            DeletionReason::RoleMissing,
            DeletionReason::RoleInvalid,
            DeletionReason::NoAffectedIdentities
        ]
    );
}

#[tokio::test]
async fn test_failure_threshold_terminates_run() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
  - { role_id: r2, role_name: Finance }
failing_identities: [i1, i2, i3]
"#,
        PropagationSettings {
            max_failure_threshold: 50,
            ..settings()
        },
    )
    .await;

    let result = h.runner.run().await.unwrap();

    assert!(result.terminated);
    assert_eq!(result.completion_status, Some(CompletionStatus::Terminated));
    assert!(has_message(
        &result,
        MessageKind::Error,
        "Partition Role Change Propagation Transition 2 failed"
    ));

    // Finance is never selected.
    assert!(h.store.provisioner.executed_for("i6").is_empty());
    let finance = h
        .store
        .events
        .list_all()
        .into_iter()
        .find(|e| e.role_name == "Finance")
        .unwrap();
    assert_eq!(finance.status, EventStatus::Pending);

    let partitions = h.partition_results(&result).await;
    let transition = partitions
        .iter()
        .find(|p| p.name == "Role Change Propagation Transition 2")
        .unwrap();
    assert!(transition.terminated);
    assert!(has_message(transition, MessageKind::Error, "Exceeded failure threshold"));
}

#[tokio::test]
async fn test_failure_threshold_ignores_skipped_identities() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
  - { role_id: r2, role_name: Finance }
failing_identities: [i3, i6]
"#,
        PropagationSettings {
            max_failure_threshold: 60,
            ..settings()
        },
    )
    .await;

    let result = h.runner.run().await.unwrap();

    // Engineering fails 1 of 5; Finance fails its only processed identity.
    assert!(result.terminated);
    assert_eq!(result.completion_status, Some(CompletionStatus::Terminated));

    let finance = h
        .store
        .events
        .list_all()
        .into_iter()
        .find(|e| e.role_name == "Finance")
        .unwrap();
    assert_eq!(finance.affected_identity_count, 1);
    assert_eq!(finance.failed_identity_ids, BTreeSet::from(["i6".to_string()]));
    assert_eq!(finance.skipped_identity_ids, BTreeSet::from(["i3".to_string()]));

    let partitions = h.partition_results(&result).await;
    let transition = partitions
        .iter()
        .find(|p| p.name == "Role Change Propagation Transition 3")
        .unwrap();
    assert!(transition.terminated);
    assert!(has_message(transition, MessageKind::Error, "Exceeded failure threshold"));
}

#[tokio::test]
async fn test_terminated_run_selects_nothing() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
"#,
        settings(),
    )
    .await;

    let handle = h.runner.start().await.unwrap();
    handle.terminate();
    let result = h.runner.run_to_completion(&handle).await.unwrap();

    assert!(result.terminated);
    assert!(has_message(&result, MessageKind::Warn, "was terminated"));
    assert!(h.store.provisioner.executed().is_empty());
    assert_eq!(h.store.events.list_all().len(), 1);
}

#[tokio::test]
async fn test_missing_workflow_falls_back_to_provisioning() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
"#,
        PropagationSettings {
            workflow: Some("Propagate Roles".to_string()),
            ..settings()
        },
    )
    .await;

    let result = h.runner.run().await.unwrap();

    assert_eq!(h.store.provisioner.executed().len(), 5);
    assert!(h.store.workflows.launched().is_empty());
    let warnings = result
        .messages
        .iter()
        .filter(|m| m.kind == MessageKind::Warn && m.text.contains("Propagate Roles"))
        .collect::<Vec<_>>();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].text.contains("for role Engineering"));
    assert_eq!(result.completion_status, Some(CompletionStatus::Warning));
}

#[tokio::test]
async fn test_configured_workflow_is_launched() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
workflows: [Propagate Roles]
"#,
        PropagationSettings {
            workflow: Some("Propagate Roles".to_string()),
            ..settings()
        },
    )
    .await;

    let result = h.runner.run().await.unwrap();

    assert!(h.store.provisioner.executed().is_empty());
    let launched: Vec<String> = h
        .store
        .workflows
        .launched()
        .into_iter()
        .map(|(workflow, id)| {
            assert_eq!(workflow, "Propagate Roles");
            id
        })
        .collect();
    assert_eq!(launched.len(), 5);
    assert!(h.store.events.list_all().is_empty());
    assert_eq!(result.completion_status, Some(CompletionStatus::Success));
}

#[tokio::test]
async fn test_identities_refreshed_when_policies_checked() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
failing_identities: [i5]
"#,
        PropagationSettings {
            check_policies: true,
            ..settings()
        },
    )
    .await;

    let result = h.runner.run().await.unwrap();

    let mut refreshed = h.store.refresher.refreshed();
    refreshed.sort();
    assert_eq!(refreshed, vec!["i1", "i2", "i3", "i4"]);

    let total: usize = h
        .partition_results(&result)
        .await
        .iter()
        .map(|p| p.stats.identities_refreshed)
        .sum();
    assert_eq!(total, 4);
}

#[tokio::test]
async fn test_uncompilable_plan_terminates_run() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
uncompilable_identities: [i4]
"#,
        settings(),
    )
    .await;

    let result = h.runner.run().await.unwrap();

    assert!(result.terminated);
    assert!(has_message(
        &result,
        MessageKind::Error,
        "Partition Role Propagation Partition Engineering (1) - 2 of 2 failed"
    ));

    let partitions = h.partition_results(&result).await;
    let failed = partitions
        .iter()
        .find(|p| p.name == "Role Propagation Partition Engineering (1) - 2 of 2")
        .unwrap();
    assert!(failed.terminated);
    assert_eq!(failed.completion_status, Some(CompletionStatus::Terminated));

    // The event is left pending for the next run.
    assert!(h.store.provisioner.executed_for("i5").is_empty());
    let events = h.store.events.list_all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Pending);
    assert!(result.event_details.is_empty());
}

#[tokio::test]
async fn test_run_publishes_lifecycle_events() {
    let h = harness(
        r#"
events:
  - { role_id: r1, role_name: Engineering }
"#,
        settings(),
    )
    .await;

    let mut receiver = h.bus.subscribe();
    h.runner.run().await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(PropagationEvent::RunStarted { event_count: 1, .. })));
    assert!(matches!(
        events.last(),
        Some(PropagationEvent::RunFinished {
            status: CompletionStatus::Success,
            ..
        })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        PropagationEvent::EventSelected {
            identities_to_process: 5,
            partitions: 2,
            ..
        }
    )));
    let provisioned = events
        .iter()
        .filter(|e| matches!(e, PropagationEvent::PartitionProvisioned { .. }))
        .count();
    assert_eq!(provisioned, 2);
    assert!(events.iter().any(|e| matches!(
        e,
        PropagationEvent::EventDeleted {
            reason: DeletionReason::Succeeded,
            ..
        }
    )));
}
