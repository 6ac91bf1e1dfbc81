//! # Tenant Credential Model
//!
//! Administrator login material for one identity tenant. Owned by the
//! surrounding CRUD layer; the provisioning core only reads it, except to
//! hand back a rotated working password when the console forces a change
//! during login.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredential {
    pub tenant_id: Uuid,
    pub admin_email: String,
    pub password: String,
    /// Seed for the time-based MFA code generator, if the account uses one
    pub mfa_seed: Option<String>,
}

impl TenantCredential {
    pub fn new(tenant_id: Uuid, admin_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            tenant_id,
            admin_email: admin_email.into(),
            password: password.into(),
            mfa_seed: None,
        }
    }

    pub fn with_mfa_seed(mut self, seed: impl Into<String>) -> Self {
        self.mfa_seed = Some(seed.into());
        self
    }
}

// Secrets never reach log output
impl fmt::Debug for TenantCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantCredential")
            .field("tenant_id", &self.tenant_id)
            .field("admin_email", &self.admin_email)
            .field("password", &"[MASKED]")
            .field("mfa_seed", &self.mfa_seed.as_ref().map(|_| "[MASKED]"))
            .finish()
    }
}
