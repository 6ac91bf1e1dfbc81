//! Administration console automation interface.
//!
//! Each method is one logical interaction. Implementations do their own
//! element lookup and click handling; the engine wraps every call in its
//! sub-step retry layer and classifies the returned [`AutomationError`].

use crate::models::TenantCredential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Opaque reference to one live, authenticated console session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub opened_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id,
            opened_at: Utc::now(),
        }
    }
}

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub session: SessionHandle,
    /// Set when the console forced a password change during login
    pub rotated_password: Option<String>,
}

impl LoginOutcome {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            rotated_password: None,
        }
    }
}

/// Console response to submitting a domain.
///
/// `added` is true when the tenant now lists the domain, whether it was
/// submitted by this call or was already present. `already_verified` is true
/// when the console reports ownership as already proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddDomainOutcome {
    pub added: bool,
    pub already_verified: bool,
}

/// Mail routing values the console expects in DNS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRecords {
    pub mx: String,
    pub spf: String,
}

/// The two provider-issued signing-key CNAME targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningCnames {
    pub selector1: String,
    pub selector2: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutomationError {
    /// Recoverable interaction failure (stale page, slow render, flaky click)
    #[error("Console interaction failed: {0}")]
    Transient(String),

    #[error("Console interaction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Expected console element not found: {0}")]
    ElementNotFound(String),

    /// The session is gone; a fresh login is required
    #[error("Console session expired: {0}")]
    SessionExpired(String),

    /// Invalid credentials, locked account, or explicit "not authorized"
    #[error("{0}")]
    Terminal(String),
}

impl AutomationError {
    /// Terminal errors abort the task and skip every retry layer
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub fn requires_new_session(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}

/// Console capability consumed by the phase engine
#[async_trait]
pub trait AutomationSession: Send + Sync {
    /// Open an authenticated session for the credential's tenant
    async fn login(&self, credential: &TenantCredential) -> Result<LoginOutcome, AutomationError>;

    /// Submit the domain to the tenant
    async fn add_domain(
        &self,
        session: &SessionHandle,
        domain: &str,
    ) -> Result<AddDomainOutcome, AutomationError>;

    /// Read the ownership-proof TXT value the console wants published
    async fn get_ownership_token(
        &self,
        session: &SessionHandle,
        domain: &str,
    ) -> Result<String, AutomationError>;

    /// Ask the console to check the ownership record; `false` means not yet visible
    async fn verify_domain(
        &self,
        session: &SessionHandle,
        domain: &str,
    ) -> Result<bool, AutomationError>;

    async fn get_mail_records(
        &self,
        session: &SessionHandle,
        domain: &str,
    ) -> Result<MailRecords, AutomationError>;

    async fn get_signing_cnames(
        &self,
        session: &SessionHandle,
        domain: &str,
    ) -> Result<SigningCnames, AutomationError>;

    /// Ask the console to activate message signing; `false` means refused for now
    async fn enable_signing(
        &self,
        session: &SessionHandle,
        domain: &str,
    ) -> Result<bool, AutomationError>;

    /// Reset the session to a clean page between phase attempts
    async fn reload(&self, session: &SessionHandle) -> Result<(), AutomationError>;

    /// Release every resource held by the session
    async fn close(&self, session: SessionHandle);
}
