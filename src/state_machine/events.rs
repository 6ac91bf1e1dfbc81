use serde::{Deserialize, Serialize};

/// Events that drive domain task lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainTaskEvent {
    /// A worker slot was acquired for the task
    Dispatch,
    /// The attempt released its slot to wait for DNS convergence
    AwaitPropagation,
    /// Verified, DNS configured and signing CNAMEs published
    Complete,
    /// Terminal or exhausted failure with the recorded message
    Fail(String),
    /// Operator or crash recovery put the task back in the queue
    Requeue,
    /// Operator cleared all checkpoints
    Restart,
}

impl DomainTaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::AwaitPropagation => "await_propagation",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Requeue => "requeue",
            Self::Restart => "restart",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
