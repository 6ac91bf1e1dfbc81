//! Engine-boundary error taxonomy.

use super::types::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How a failure is handled once it leaves a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// DNS not yet visible, console timeout; retried, never surfaced
    Transient,
    /// Invalid credentials, locked account, not authorized; aborts the task
    Terminal,
    /// Signing activation failure; handed to the reconciler
    Deferred,
    /// Full-entity retry ceiling reached
    EntityExhausted,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::Terminal => write!(f, "Terminal"),
            ErrorCategory::Deferred => write!(f, "Deferred"),
            ErrorCategory::EntityExhausted => write!(f, "Entity Exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{phase} failed ({category}): {message}")]
pub struct PhaseError {
    pub phase: Phase,
    pub category: ErrorCategory,
    pub message: String,
}

impl PhaseError {
    pub fn new(phase: Phase, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            phase,
            category,
            message: message.into(),
        }
    }

    pub fn transient(phase: Phase, message: impl Into<String>) -> Self {
        Self::new(phase, ErrorCategory::Transient, message)
    }

    pub fn terminal(phase: Phase, message: impl Into<String>) -> Self {
        Self::new(phase, ErrorCategory::Terminal, message)
    }

    pub fn is_terminal(&self) -> bool {
        self.category == ErrorCategory::Terminal
    }

    /// Same failure, recategorized (for example once the entity budget is spent)
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }
}
