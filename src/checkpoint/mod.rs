//! # Checkpoint Store
//!
//! Durable, idempotent persistence of [`DomainTask`] rows.
//!
//! ## Guarantees
//!
//! - Every write is a single atomic statement scoped to one domain, issued
//!   right after the corresponding side effect is confirmed. Nothing is batched
//!   until the end of a run, so a crash loses at most the in-progress phase.
//! - Checkpoint writes only ever set a flag to `true`. The sole path that
//!   clears flags is [`CheckpointStore::restart`], an explicit operator action.
//! - Captured values (ownership token, mail records, signing CNAMEs) are
//!   written once on acquisition and reused on every later attempt.
//!
//! Two implementations share these semantics: [`PgCheckpointStore`] for
//! production and [`InMemoryCheckpointStore`] for embedding and tests.

pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::integrations::{MailRecords, SigningCnames};
use crate::models::{Checkpoint, DomainTask, NewDomainTask};
use crate::state_machine::DomainTaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::InMemoryCheckpointStore;
pub use postgres::PgCheckpointStore;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert a new task; `None` when the domain already has a row
    async fn create(&self, new_task: NewDomainTask) -> Result<Option<DomainTask>>;

    async fn find(&self, domain: &str) -> Result<Option<DomainTask>>;

    /// All tasks whose persisted status is one of `states`, oldest first
    async fn list_by_states(&self, states: &[DomainTaskState]) -> Result<Vec<DomainTask>>;

    /// Tasks with signing CNAMEs published but signing not yet enabled
    async fn list_signing_pending(&self) -> Result<Vec<DomainTask>>;

    /// Persist a lifecycle state; entering `Completed` stamps `completed_at`
    async fn set_status(&self, domain: &str, state: DomainTaskState, at: DateTime<Utc>)
        -> Result<()>;

    async fn record_zone_id(&self, domain: &str, zone_id: &str) -> Result<()>;

    async fn record_ownership_token(&self, domain: &str, token: &str) -> Result<()>;

    async fn record_mail_records(&self, domain: &str, records: &MailRecords) -> Result<()>;

    async fn record_signing_cnames(&self, domain: &str, cnames: &SigningCnames) -> Result<()>;

    /// Set one flag to `true`. `DomainVerified` also stamps `verified_at`;
    /// `SigningEnabled` stamps `signing_enabled_at` and clears `phase_error`.
    async fn mark_checkpoint(
        &self,
        domain: &str,
        checkpoint: Checkpoint,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Set `domain_added` and `domain_verified` in one statement, for a
    /// console that reports the domain as already verified
    async fn mark_added_and_verified(&self, domain: &str, at: DateTime<Utc>) -> Result<()>;

    /// Count one full-entity retry, returning the new count
    async fn increment_retry_count(&self, domain: &str) -> Result<i32>;

    /// Record a terminal or exhausted failure for operator attention
    async fn record_failure(&self, domain: &str, error_step: &str, error: &str) -> Result<()>;

    /// Foreground signing activation was deferred at `at`
    async fn record_signing_deferred(&self, domain: &str, at: DateTime<Utc>) -> Result<()>;

    /// A reconciler attempt failed; returns the new signing retry count
    async fn record_signing_retry_failure(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<i32>;

    /// Back to `pending` keeping every checkpoint; resets the entity counter
    async fn requeue(&self, domain: &str) -> Result<()>;

    /// Back to `pending` with all checkpoints and captured values cleared
    async fn restart(&self, domain: &str) -> Result<()>;
}
