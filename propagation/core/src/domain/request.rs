// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Phase-Tagged Requests
//!
//! A propagation run is a sequence of [`Request`]s, each tagged with a
//! [`Phase`]. A request with a `dependent_phase` only becomes runnable once
//! no other queued or running request of that phase remains; this is how a
//! Transition waits for the Provision partitions of the previous event and
//! how Finish waits for the last Transition.
//!
//! Phases are persisted as integers (Provision=1, Transition=2, Finish=3).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::event::EventId;
use crate::domain::partition::Partition;
use crate::domain::repository::RepositoryError;
use crate::domain::task_result::TaskResultId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Phase {
    Provision = 1,
    Transition = 2,
    Finish = 3,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Provision => "provision",
            Phase::Transition => "transition",
            Phase::Finish => "finish",
        }
    }
}

impl TryFrom<i32> for Phase {
    type Error = RequestError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::Provision),
            2 => Ok(Phase::Transition),
            3 => Ok(Phase::Finish),
            other => Err(RequestError::InvalidPhase(other)),
        }
    }
}

impl From<Phase> for i32 {
    fn from(phase: Phase) -> Self {
        phase as i32
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid phase value: {0}")]
    InvalidPhase(i32),

    #[error("Request {name} carries a {actual} payload but is tagged {expected}")]
    PayloadMismatch {
        name: String,
        expected: Phase,
        actual: Phase,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work for one Provision partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionConfig {
    pub partition: Partition,
    pub event_id: EventId,
    pub refresh_identities: bool,
}

/// State handed from one Transition to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Event ids still to visit, in processing order.
    pub event_ids: Vec<EventId>,
    pub max_partitions: usize,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub event_tally: usize,
    /// Event provisioned by the Provision requests this Transition waits on.
    #[serde(default)]
    pub previous_event: Option<EventId>,
    #[serde(default)]
    pub request_names: Vec<String>,
    #[serde(default)]
    pub identities_to_process: usize,
    /// Compressed CSV of identities skipped for `previous_event`.
    #[serde(default)]
    pub new_skip_list: Option<String>,
    #[serde(default)]
    pub extensions: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishConfig {
    pub event_tally: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestPayload {
    Provision(ProvisionConfig),
    Transition(TransitionConfig),
    Finish(FinishConfig),
}

impl RequestPayload {
    pub fn phase(&self) -> Phase {
        match self {
            RequestPayload::Provision(_) => Phase::Provision,
            RequestPayload::Transition(_) => Phase::Transition,
            RequestPayload::Finish(_) => Phase::Finish,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub name: String,
    pub phase: Phase,
    #[serde(default)]
    pub dependent_phase: Option<Phase>,
    /// Partition result registered for this request.
    pub partition_result: TaskResultId,
    pub payload: RequestPayload,
}

impl Request {
    /// Build a request whose phase is given as a raw integer.
    pub fn new(
        name: impl Into<String>,
        raw_phase: i32,
        dependent_phase: Option<Phase>,
        partition_result: TaskResultId,
        payload: RequestPayload,
    ) -> Result<Self, RequestError> {
        let name = name.into();
        let phase = Phase::try_from(raw_phase)?;
        if payload.phase() != phase {
            return Err(RequestError::PayloadMismatch {
                name,
                expected: phase,
                actual: payload.phase(),
            });
        }
        Ok(Self {
            id: RequestId::new(),
            name,
            phase,
            dependent_phase,
            partition_result,
            payload,
        })
    }

    pub fn transition_config(&self) -> Option<&TransitionConfig> {
        match &self.payload {
            RequestPayload::Transition(config) => Some(config),
            _ => None,
        }
    }
}

/// Scheduler queue for phase-tagged requests.
///
/// A request is ready when it has no dependent phase, or when no other queued
/// or running request has that phase.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Enqueue a request
    async fn add_request(&self, request: Request) -> Result<(), RepositoryError>;

    /// Take every ready request and mark it running
    async fn take_ready(&self) -> Result<Vec<Request>, RepositoryError>;

    /// Remove a running request from the queue
    async fn mark_complete(&self, id: RequestId) -> Result<(), RepositoryError>;

    /// Snapshot of queued and running requests
    async fn list(&self) -> Result<Vec<Request>, RepositoryError>;

    async fn is_empty(&self) -> Result<bool, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_integer_values() {
        assert_eq!(i32::from(Phase::Provision), 1);
        assert_eq!(i32::from(Phase::Transition), 2);
        assert_eq!(i32::from(Phase::Finish), 3);
        assert_eq!(Phase::try_from(0), Err(RequestError::InvalidPhase(0)));
        assert_eq!(Phase::try_from(4), Err(RequestError::InvalidPhase(4)));
    }

    #[test]
    fn test_phase_decoding_rejects_unknown_values() {
        let phase: Phase = serde_json::from_str("2").unwrap();
        assert_eq!(phase, Phase::Transition);
        assert!(serde_json::from_str::<Phase>("7").is_err());
        assert_eq!(serde_json::to_string(&Phase::Finish).unwrap(), "3");
    }

    #[test]
    fn test_request_rejects_mismatched_payload() {
        let result = Request::new(
            "finish",
            2,
            None,
            TaskResultId::new(),
            RequestPayload::Finish(FinishConfig::default()),
        );
        assert!(matches!(result, Err(RequestError::PayloadMismatch { .. })));

        let result = Request::new(
            "bogus",
            9,
            None,
            TaskResultId::new(),
            RequestPayload::Finish(FinishConfig::default()),
        );
        assert_eq!(result.unwrap_err(), RequestError::InvalidPhase(9));
    }
}
