use super::{
    errors::{StateMachineError, StateMachineResult},
    events::DomainTaskEvent,
    states::DomainTaskState,
};
use crate::checkpoint::CheckpointStore;
use crate::error::ProvisionerError;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Store-backed lifecycle state machine for domain tasks
#[derive(Clone)]
pub struct DomainStateMachine {
    store: Arc<dyn CheckpointStore>,
}

impl std::fmt::Debug for DomainStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainStateMachine").finish_non_exhaustive()
    }
}

impl DomainStateMachine {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Get the persisted state of a domain task
    pub async fn current_state(&self, domain: &str) -> StateMachineResult<DomainTaskState> {
        let task = self
            .store
            .find(domain)
            .await
            .map_err(persistence_error)?
            .ok_or_else(|| StateMachineError::NotFound(domain.to_string()))?;
        Ok(task.state())
    }

    /// Attempt to transition the task state, persisting the target on success
    pub async fn transition(
        &self,
        domain: &str,
        event: DomainTaskEvent,
    ) -> StateMachineResult<DomainTaskState> {
        let current_state = self.current_state(domain).await?;
        let target_state = Self::determine_target_state(current_state, &event)?;

        match event {
            // Requeue and restart also reset counters and checkpoints
            DomainTaskEvent::Requeue => self.store.requeue(domain).await,
            DomainTaskEvent::Restart => self.store.restart(domain).await,
            _ => self.store.set_status(domain, target_state, Utc::now()).await,
        }
        .map_err(persistence_error)?;

        debug!(
            domain = %domain,
            from = %current_state,
            to = %target_state,
            event = event.event_type(),
            "Domain task transitioned"
        );

        Ok(target_state)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: DomainTaskState,
        event: &DomainTaskEvent,
    ) -> StateMachineResult<DomainTaskState> {
        use DomainTaskState::*;

        let target = match (current_state, event) {
            // Dispatch transitions
            (Pending, DomainTaskEvent::Dispatch) => Active,
            (WaitingOnPropagation, DomainTaskEvent::Dispatch) => Active,

            // Attempt outcomes
            (Active, DomainTaskEvent::AwaitPropagation) => WaitingOnPropagation,
            (Active, DomainTaskEvent::Complete) => Completed,

            // Failure transitions
            (Pending | Active | WaitingOnPropagation, DomainTaskEvent::Fail(_)) => Failed,

            // Operator actions and crash recovery
            (Pending | Active | WaitingOnPropagation | Failed, DomainTaskEvent::Requeue) => Pending,
            (_, DomainTaskEvent::Restart) => Pending,

            // Invalid transitions
            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }
}

fn persistence_error(err: ProvisionerError) -> StateMachineError {
    match err {
        ProvisionerError::NotFound(domain) => StateMachineError::NotFound(domain),
        other => StateMachineError::Persistence(other.to_string()),
    }
}
