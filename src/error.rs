//! Error types for the provisioning core.

use crate::config::ConfigurationError;
use crate::integrations::automation::AutomationError;
use crate::integrations::dns::DnsError;
use crate::state_machine::StateMachineError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProvisionerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Domain task not found: {0}")]
    NotFound(String),
    #[error("Automation error: {0}")]
    AutomationError(String),
    #[error("DNS error: {0}")]
    DnsError(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for ProvisionerError {
    fn from(err: sqlx::Error) -> Self {
        ProvisionerError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for ProvisionerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ProvisionerError::DatabaseError(format!("migration failed: {err}"))
    }
}

impl From<ConfigurationError> for ProvisionerError {
    fn from(err: ConfigurationError) -> Self {
        ProvisionerError::ConfigurationError(err.to_string())
    }
}

impl From<StateMachineError> for ProvisionerError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::NotFound(domain) => ProvisionerError::NotFound(domain),
            StateMachineError::Persistence(message) => ProvisionerError::DatabaseError(message),
            other => ProvisionerError::InvalidState(other.to_string()),
        }
    }
}

impl From<AutomationError> for ProvisionerError {
    fn from(err: AutomationError) -> Self {
        ProvisionerError::AutomationError(err.to_string())
    }
}

impl From<DnsError> for ProvisionerError {
    fn from(err: DnsError) -> Self {
        ProvisionerError::DnsError(err.to_string())
    }
}

impl From<serde_json::Error> for ProvisionerError {
    fn from(err: serde_json::Error) -> Self {
        ProvisionerError::ValidationError(format!("JSON serialization error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ProvisionerError>;
