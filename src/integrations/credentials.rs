//! Credential source owned by the surrounding CRUD layer.

use crate::error::{ProvisionerError, Result};
use crate::models::TenantCredential;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

/// Read access to tenant admin credentials, plus the single write the core
/// performs: recording a password the console rotated during login
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential_for(&self, tenant_id: Uuid) -> Result<TenantCredential>;

    async fn record_rotated_password(&self, tenant_id: Uuid, new_password: &str) -> Result<()>;
}

/// In-process credential source for embedding and tests
#[derive(Debug, Default)]
pub struct StaticCredentialSource {
    credentials: DashMap<Uuid, TenantCredential>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(self, credential: TenantCredential) -> Self {
        self.insert(credential);
        self
    }

    pub fn insert(&self, credential: TenantCredential) {
        self.credentials.insert(credential.tenant_id, credential);
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn credential_for(&self, tenant_id: Uuid) -> Result<TenantCredential> {
        self.credentials
            .get(&tenant_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ProvisionerError::NotFound(format!("no credential for tenant {tenant_id}"))
            })
    }

    async fn record_rotated_password(&self, tenant_id: Uuid, new_password: &str) -> Result<()> {
        let mut entry = self.credentials.get_mut(&tenant_id).ok_or_else(|| {
            ProvisionerError::NotFound(format!("no credential for tenant {tenant_id}"))
        })?;
        entry.password = new_password.to_string();
        info!(tenant_id = %tenant_id, "🔑 CREDENTIALS: Recorded rotated admin password");
        Ok(())
    }
}
