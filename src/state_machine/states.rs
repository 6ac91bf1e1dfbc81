use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one domain provisioning attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DomainTaskState {
    /// Accepted into the queue, no worker has picked it up yet
    #[default]
    Pending,
    /// Holding a worker slot and a live automation session
    Active,
    /// Parked until a submitted DNS change becomes externally visible
    WaitingOnPropagation,
    /// Verified, mail records configured and signing CNAMEs published
    Completed,
    /// Terminal failure or full-entity retry budget exhausted
    Failed,
}

impl DomainTaskState {
    /// Check if this is a terminal state (no automatic transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if the task still needs foreground work
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Active | Self::WaitingOnPropagation
        )
    }

    /// Check if the task currently counts against scheduler capacity
    pub fn occupies_worker(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::WaitingOnPropagation => "waiting_on_propagation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DomainTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DomainTaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "waiting_on_propagation" => Ok(Self::WaitingOnPropagation),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid domain task state: {s}")),
        }
    }
}
