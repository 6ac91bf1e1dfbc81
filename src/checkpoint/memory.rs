//! In-memory checkpoint store.
//!
//! Same semantics as the Postgres store, backed by a `DashMap` keyed by
//! domain name. Each method holds the entry lock for exactly one row, which
//! mirrors the single-row-update guarantee of the database implementation.

use super::CheckpointStore;
use crate::error::{ProvisionerError, Result};
use crate::integrations::{MailRecords, SigningCnames};
use crate::models::{Checkpoint, DomainTask, NewDomainTask};
use crate::state_machine::DomainTaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    tasks: DashMap<String, DomainTask>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a full row; used to seed scenarios
    pub fn upsert(&self, task: DomainTask) {
        self.tasks.insert(task.domain_name.clone(), task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn update<T>(&self, domain: &str, apply: impl FnOnce(&mut DomainTask) -> T) -> Result<T> {
        let mut entry = self
            .tasks
            .get_mut(domain)
            .ok_or_else(|| ProvisionerError::NotFound(domain.to_string()))?;
        let task = entry.value_mut();
        let value = apply(task);
        task.updated_at = Utc::now();
        Ok(value)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create(&self, new_task: NewDomainTask) -> Result<Option<DomainTask>> {
        match self.tasks.entry(new_task.domain_name.clone()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(slot) => {
                let task = DomainTask::from_new(new_task, Utc::now());
                slot.insert(task.clone());
                Ok(Some(task))
            }
        }
    }

    async fn find(&self, domain: &str) -> Result<Option<DomainTask>> {
        Ok(self.tasks.get(domain).map(|entry| entry.value().clone()))
    }

    async fn list_by_states(&self, states: &[DomainTaskState]) -> Result<Vec<DomainTask>> {
        let mut tasks: Vec<DomainTask> = self
            .tasks
            .iter()
            .filter(|entry| states.contains(&entry.value().state()))
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    async fn list_signing_pending(&self) -> Result<Vec<DomainTask>> {
        let mut tasks: Vec<DomainTask> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().signing_deferred())
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|task| task.verified_at);
        Ok(tasks)
    }

    async fn set_status(
        &self,
        domain: &str,
        state: DomainTaskState,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(domain, |task| {
            task.status = state.to_string();
            if state == DomainTaskState::Completed {
                task.completed_at = Some(at);
            }
        })
    }

    async fn record_zone_id(&self, domain: &str, zone_id: &str) -> Result<()> {
        self.update(domain, |task| task.dns_zone_id = Some(zone_id.to_string()))
    }

    async fn record_ownership_token(&self, domain: &str, token: &str) -> Result<()> {
        self.update(domain, |task| task.ownership_token = Some(token.to_string()))
    }

    async fn record_mail_records(&self, domain: &str, records: &MailRecords) -> Result<()> {
        self.update(domain, |task| {
            task.mx_target = Some(records.mx.clone());
            task.spf_value = Some(records.spf.clone());
        })
    }

    async fn record_signing_cnames(&self, domain: &str, cnames: &SigningCnames) -> Result<()> {
        self.update(domain, |task| {
            task.signing_cname_selector1 = Some(cnames.selector1.clone());
            task.signing_cname_selector2 = Some(cnames.selector2.clone());
        })
    }

    async fn mark_checkpoint(
        &self,
        domain: &str,
        checkpoint: Checkpoint,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(domain, |task| match checkpoint {
            Checkpoint::DomainAdded => task.domain_added = true,
            Checkpoint::DomainVerified => {
                task.domain_verified = true;
                task.verified_at.get_or_insert(at);
            }
            Checkpoint::DnsConfigured => task.dns_configured = true,
            Checkpoint::SigningCnamesAdded => task.signing_cnames_added = true,
            Checkpoint::SigningEnabled => {
                task.signing_enabled = true;
                task.signing_enabled_at = Some(at);
                task.phase_error = None;
                task.error_step = None;
            }
        })
    }

    async fn mark_added_and_verified(&self, domain: &str, at: DateTime<Utc>) -> Result<()> {
        self.update(domain, |task| {
            task.domain_added = true;
            task.domain_verified = true;
            task.verified_at.get_or_insert(at);
        })
    }

    async fn increment_retry_count(&self, domain: &str) -> Result<i32> {
        self.update(domain, |task| {
            task.retry_count += 1;
            task.retry_count
        })
    }

    async fn record_failure(&self, domain: &str, error_step: &str, error: &str) -> Result<()> {
        self.update(domain, |task| {
            task.phase_error = Some(error.to_string());
            task.error_step = Some(error_step.to_string());
        })
    }

    async fn record_signing_deferred(&self, domain: &str, at: DateTime<Utc>) -> Result<()> {
        self.update(domain, |task| task.last_retry_at = Some(at))
    }

    async fn record_signing_retry_failure(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<i32> {
        self.update(domain, |task| {
            task.signing_retry_count += 1;
            task.last_retry_at = Some(at);
            task.phase_error = Some(error.to_string());
            task.error_step = Some("enable_signing".to_string());
            task.signing_retry_count
        })
    }

    async fn requeue(&self, domain: &str) -> Result<()> {
        self.update(domain, |task| {
            task.status = DomainTaskState::Pending.to_string();
            task.retry_count = 0;
            task.phase_error = None;
            task.error_step = None;
        })
    }

    async fn restart(&self, domain: &str) -> Result<()> {
        self.update(domain, |task| {
            let fresh = DomainTask::from_new(
                NewDomainTask {
                    domain_name: task.domain_name.clone(),
                    tenant_id: task.tenant_id,
                    dns_zone_id: task.dns_zone_id.clone(),
                },
                task.created_at,
            );
            *task = DomainTask {
                domain_task_uuid: task.domain_task_uuid,
                ..fresh
            };
        })
    }
}
