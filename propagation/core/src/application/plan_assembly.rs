// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Per-Identity Plan Assembly
//!
//! An event carries one plan for the role. Before it is provisioned for an
//! identity the plan is specialised:
//!
//! 1. [`add_role_requests`] rewrites the governance `assignedRoles` requests so
//!    that every other role the identity holds is retained and only the
//!    event's role receives the plan's operation.
//! 2. [`set_native_id_assignments`] splits application account requests per
//!    native identity, using role detections first and the assignment's role
//!    targets as a fallback.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::domain::event::RoleChangeEvent;
use crate::domain::identity::{RoleAssignment, RoleDetection};
use crate::domain::plan::{
    AccountOperation, AccountRequest, AttributeRequest, AttributeValue, Operation,
    ProvisioningPlan, ATT_ASSIGNED_ROLES,
};

fn is_event_role(assignment: &RoleAssignment, event: &RoleChangeEvent) -> bool {
    assignment.references(Some(&event.role_id), Some(&event.role_name))
}

/// Replace the governance `assignedRoles` requests with one request per
/// non-negative assignment.
pub fn add_role_requests(
    assignments: &[RoleAssignment],
    plan: &mut ProvisioningPlan,
    event: &RoleChangeEvent,
) {
    if assignments.is_empty() {
        return;
    }

    let role_operation = plan.role_operation();
    let request = plan.governance_request_or_insert();
    request.attribute_requests.clear();

    for assignment in assignments.iter().filter(|a| !a.negative) {
        let operation = if is_event_role(assignment, event) {
            role_operation.unwrap_or(Operation::Retain)
        } else {
            Operation::Retain
        };

        request.attribute_requests.push(AttributeRequest {
            name: ATT_ASSIGNED_ROLES.to_string(),
            operation: Some(operation),
            value: Some(AttributeValue::Single(assignment.role_name.clone())),
            assignment_id: Some(assignment.assignment_id.clone()),
            add_date: assignment.start_date,
            remove_date: assignment.end_date,
        });
    }
}

fn push_unique(requests: &mut Vec<AccountRequest>, request: AccountRequest) {
    if !requests.contains(&request) {
        requests.push(request);
    }
}

/// Split non-governance account requests across the identity's accounts.
pub fn set_native_id_assignments(
    plan: &mut ProvisioningPlan,
    assignments: &[RoleAssignment],
    detections: &[RoleDetection],
    event: &RoleChangeEvent,
) {
    let mut assembled: Vec<AccountRequest> = Vec::new();

    for request in &plan.account_requests {
        if request.is_governance() {
            push_unique(&mut assembled, request.clone());
            continue;
        }

        let mut by_native_identity: BTreeMap<String, AccountRequest> = BTreeMap::new();
        let mut seen_values: HashSet<String> = HashSet::new();
        let mut targets_processed: HashSet<String> = HashSet::new();

        for assignment in assignments
            .iter()
            .filter(|a| !a.negative && is_event_role(a, event))
        {
            debug!(assignment = %assignment.assignment_id, "Resolving role targets");

            for attribute in &request.attribute_requests {
                let native_identity = match &attribute.value {
                    Some(AttributeValue::List(values)) => {
                        let mut found = None;
                        for value in values {
                            found = native_identity_for_detection(
                                detections,
                                &assignment.assignment_id,
                                &request.application,
                                &attribute.name,
                                value,
                            );
                            add_attribute_value(
                                &mut by_native_identity,
                                &mut seen_values,
                                &request.application,
                                attribute.operation,
                                found.as_deref(),
                                &attribute.name,
                                value,
                                true,
                            );
                        }
                        found
                    }
                    Some(AttributeValue::Single(value)) => {
                        let found = native_identity_for_detection(
                            detections,
                            &assignment.assignment_id,
                            &request.application,
                            &attribute.name,
                            value,
                        );
                        add_attribute_value(
                            &mut by_native_identity,
                            &mut seen_values,
                            &request.application,
                            attribute.operation,
                            found.as_deref(),
                            &attribute.name,
                            value,
                            false,
                        );
                        found
                    }
                    None => None,
                };

                if native_identity.is_some() {
                    continue;
                }

                // A role without targets (e.g. disabled) is still an assignment.
                if assignment.targets.is_empty() {
                    push_unique(&mut assembled, request.clone());
                    continue;
                }

                for target in assignment
                    .targets
                    .iter()
                    .filter(|t| t.application_name == request.application)
                {
                    debug!(
                        native_identity = %target.native_identity,
                        application = %request.application,
                        "Found native identity from role target"
                    );
                    if !targets_processed.insert(request.application.clone()) {
                        warn!(
                            "Multiple role targets use application {}; account requests will be duplicated across all accounts",
                            request.application
                        );
                    }
                    let mut split = request.clone();
                    split.native_identity = Some(target.native_identity.clone());
                    push_unique(&mut assembled, split);
                }
                break;
            }

            for split in by_native_identity.values() {
                push_unique(&mut assembled, split.clone());
            }
        }
    }

    plan.account_requests = assembled;
}

#[allow(clippy::too_many_arguments)]
fn add_attribute_value(
    by_native_identity: &mut BTreeMap<String, AccountRequest>,
    seen_values: &mut HashSet<String>,
    application: &str,
    operation: Option<Operation>,
    native_identity: Option<&str>,
    name: &str,
    value: &str,
    list_value: bool,
) {
    let Some(native_identity) = native_identity else {
        return;
    };
    debug!(
        native_identity = %native_identity,
        application = %application,
        "Found native identity from role detection"
    );

    let request = by_native_identity
        .entry(native_identity.to_string())
        .or_insert_with(|| {
            let mut request = AccountRequest::new(application, AccountOperation::Modify);
            request.native_identity = Some(native_identity.to_string());
            request
        });

    if request.attribute_request(name).is_none() {
        request
            .attribute_requests
            .push(AttributeRequest::new(name, operation, None));
    }

    if let Some(attribute) = request.attribute_request_mut(name) {
        if list_value {
            match &mut attribute.value {
                Some(AttributeValue::List(values)) => values.push(value.to_string()),
                _ => attribute.value = Some(AttributeValue::List(vec![value.to_string()])),
            }
        } else {
            attribute.value = Some(AttributeValue::single(value));
        }
    }

    let key = format!("{}{}{}{}", application, native_identity, name, value);
    if !seen_values.insert(key) {
        warn!("Duplicate attribute requests across multiple role targets; the role should be changed to remove this redundancy");
    }
}

/// Native identity of the detected account holding `value` for the
/// assignment. When several detections match, the last one wins.
pub fn native_identity_for_detection(
    detections: &[RoleDetection],
    assignment_id: &str,
    application: &str,
    attribute: &str,
    value: &str,
) -> Option<String> {
    let mut native_identity = None;

    for detection in detections
        .iter()
        .filter(|d| d.assignment_ids.iter().any(|id| id == assignment_id))
    {
        let found = detection
            .targets
            .iter()
            .filter(|t| t.application_name == application)
            .find(|t| {
                t.items.iter().any(|item| {
                    item.name == attribute
                        && match &item.value {
                            AttributeValue::Single(v) => v == value,
                            AttributeValue::List(vs) => vs.iter().any(|v| v == value),
                        }
                })
            });

        if let Some(target) = found {
            native_identity = Some(target.native_identity.clone());
        }
    }

    native_identity
}
