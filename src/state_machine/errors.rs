use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on event {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Domain task not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
