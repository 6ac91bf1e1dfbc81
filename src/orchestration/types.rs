//! Shared orchestration types: the ordered phase list and the outcome of one
//! full-entity attempt.

use super::errors::PhaseError;
use crate::models::Checkpoint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One ordered stage of domain provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Login,
    AddDomain,
    VerifyDomain,
    ConfigureDns,
    ConfigureSigningCnames,
    EnableSigning,
}

impl Phase {
    /// Execution order
    pub const ALL: [Phase; 6] = [
        Phase::Login,
        Phase::AddDomain,
        Phase::VerifyDomain,
        Phase::ConfigureDns,
        Phase::ConfigureSigningCnames,
        Phase::EnableSigning,
    ];

    /// Name recorded in `error_step`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::AddDomain => "add_domain",
            Self::VerifyDomain => "verify_domain",
            Self::ConfigureDns => "configure_dns",
            Self::ConfigureSigningCnames => "configure_signing_cnames",
            Self::EnableSigning => "enable_signing",
        }
    }

    /// The checkpoint gating this phase; login is never checkpointed
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        match self {
            Self::Login => None,
            Self::AddDomain => Some(Checkpoint::DomainAdded),
            Self::VerifyDomain => Some(Checkpoint::DomainVerified),
            Self::ConfigureDns => Some(Checkpoint::DnsConfigured),
            Self::ConfigureSigningCnames => Some(Checkpoint::SigningCnamesAdded),
            Self::EnableSigning => Some(Checkpoint::SigningEnabled),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running the phase engine once for one domain
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Verified, DNS configured and signing CNAMEs published.
    /// `signing_deferred` is set when activation was handed to the reconciler.
    Completed { signing_deferred: bool },
    /// A phase exhausted its retries with a transient error; park and retry later
    Retry(PhaseError),
    /// Unretryable failure; the task must be failed immediately
    Terminal(PhaseError),
}

impl AttemptOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn error(&self) -> Option<&PhaseError> {
        match self {
            Self::Completed { .. } => None,
            Self::Retry(error) | Self::Terminal(error) => Some(error),
        }
    }
}
