// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-memory phase-aware request queue.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::domain::repository::RepositoryError;
use crate::domain::request::{Request, RequestId, RequestQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Queued,
    Running,
}

#[derive(Debug)]
struct Slot {
    request: Request,
    state: SlotState,
}

#[derive(Clone, Default)]
pub struct InMemoryRequestQueue {
    slots: Arc<Mutex<Vec<Slot>>>,
}

impl InMemoryRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestQueue for InMemoryRequestQueue {
    async fn add_request(&self, request: Request) -> Result<(), RepositoryError> {
        debug!(request = %request.name, phase = %request.phase, "Queued request");
        self.slots.lock().push(Slot {
            request,
            state: SlotState::Queued,
        });
        Ok(())
    }

    async fn take_ready(&self) -> Result<Vec<Request>, RepositoryError> {
        let mut slots = self.slots.lock();

        let ready: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Queued)
            .filter(|(index, slot)| match slot.request.dependent_phase {
                None => true,
                Some(phase) => !slots
                    .iter()
                    .enumerate()
                    .any(|(other, s)| other != *index && s.request.phase == phase),
            })
            .map(|(index, _)| index)
            .collect();

        let mut taken = Vec::with_capacity(ready.len());
        for index in ready {
            slots[index].state = SlotState::Running;
            taken.push(slots[index].request.clone());
        }
        Ok(taken)
    }

    async fn mark_complete(&self, id: RequestId) -> Result<(), RepositoryError> {
        let mut slots = self.slots.lock();
        let position = slots
            .iter()
            .position(|slot| slot.request.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("request {}", id)))?;
        slots.remove(position);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Request>, RepositoryError> {
        Ok(self.slots.lock().iter().map(|slot| slot.request.clone()).collect())
    }

    async fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.slots.lock().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::{FinishConfig, Phase, RequestPayload, TransitionConfig};
    use crate::domain::task_result::TaskResultId;

    fn transition(dependent: Option<Phase>) -> Request {
        Request::new(
            "transition",
            2,
            dependent,
            TaskResultId::new(),
            RequestPayload::Transition(TransitionConfig::default()),
        )
        .unwrap()
    }

    fn finish() -> Request {
        Request::new(
            "finish",
            3,
            Some(Phase::Transition),
            TaskResultId::new(),
            RequestPayload::Finish(FinishConfig::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_finish_waits_for_running_transition() {
        let queue = InMemoryRequestQueue::new();
        let first = transition(None);
        queue.add_request(first.clone()).await.unwrap();

        let ready = queue.take_ready().await.unwrap();
        assert_eq!(ready.len(), 1);

        queue.add_request(finish()).await.unwrap();
        assert!(queue.take_ready().await.unwrap().is_empty());

        queue.mark_complete(first.id).await.unwrap();
        let ready = queue.take_ready().await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].phase, Phase::Finish);
    }

    #[tokio::test]
    async fn test_dependent_transition_ignores_itself() {
        let queue = InMemoryRequestQueue::new();
        queue.add_request(transition(Some(Phase::Transition))).await.unwrap();
        assert_eq!(queue.take_ready().await.unwrap().len(), 1);
        assert!(queue.take_ready().await.unwrap().is_empty());
        assert!(!queue.is_empty().await.unwrap());
    }
}
