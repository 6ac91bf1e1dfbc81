//! Postgres-backed checkpoint store.
//!
//! Every mutating method is exactly one `UPDATE ... WHERE domain_name = $1`
//! (or one `INSERT`), so each write is atomic on its own and no cross-task
//! locking is needed.

use super::CheckpointStore;
use crate::error::{ProvisionerError, Result};
use crate::integrations::{MailRecords, SigningCnames};
use crate::models::{Checkpoint, DomainTask, NewDomainTask};
use crate::state_machine::DomainTaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPoolOptions, PgQueryResult};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

const TASK_COLUMNS: &str = r#"
    domain_task_uuid, domain_name, tenant_id, dns_zone_id, status,
    domain_added, domain_verified, dns_configured, signing_cnames_added, signing_enabled,
    ownership_token, mx_target, spf_value, signing_cname_selector1, signing_cname_selector2,
    retry_count, signing_retry_count, last_retry_at, phase_error, error_step,
    verified_at, signing_enabled_at, completed_at, created_at, updated_at
"#;

/// Embedded schema migrations.
///
/// Use this in tests with: #[sqlx::test(migrator = "provisioner_core::checkpoint::postgres::MIGRATOR")]
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized for the scheduler plus the reconciler
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: std::time::Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        info!(max_connections, "🗄️ CHECKPOINT: Connected to checkpoint database");
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        debug!("Checkpoint store migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn ensure_updated(result: PgQueryResult, domain: &str) -> Result<()> {
        if result.rows_affected() == 0 {
            return Err(ProvisionerError::NotFound(domain.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn create(&self, new_task: NewDomainTask) -> Result<Option<DomainTask>> {
        let sql = format!(
            r#"
            INSERT INTO provisioner_domain_tasks
                (domain_task_uuid, domain_name, tenant_id, dns_zone_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', NOW(), NOW())
            ON CONFLICT (domain_name) DO NOTHING
            RETURNING {TASK_COLUMNS}
            "#
        );

        let task = sqlx::query_as::<_, DomainTask>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_task.domain_name)
            .bind(new_task.tenant_id)
            .bind(&new_task.dns_zone_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(task)
    }

    async fn find(&self, domain: &str) -> Result<Option<DomainTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM provisioner_domain_tasks WHERE domain_name = $1"
        );
        let task = sqlx::query_as::<_, DomainTask>(&sql)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn list_by_states(&self, states: &[DomainTaskState]) -> Result<Vec<DomainTask>> {
        let states: Vec<String> = states.iter().map(|s| s.to_string()).collect();
        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS} FROM provisioner_domain_tasks
            WHERE status = ANY($1)
            ORDER BY created_at ASC
            "#
        );
        let tasks = sqlx::query_as::<_, DomainTask>(&sql)
            .bind(&states)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn list_signing_pending(&self) -> Result<Vec<DomainTask>> {
        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS} FROM provisioner_domain_tasks
            WHERE signing_cnames_added AND NOT signing_enabled
            ORDER BY verified_at ASC NULLS FIRST
            "#
        );
        let tasks = sqlx::query_as::<_, DomainTask>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn set_status(
        &self,
        domain: &str,
        state: DomainTaskState,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE provisioner_domain_tasks
            SET status = $2,
                completed_at = CASE WHEN $2 = 'completed' THEN $3 ELSE completed_at END,
                updated_at = NOW()
            WHERE domain_name = $1
            "#,
        )
        .bind(domain)
        .bind(state.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }

    async fn record_zone_id(&self, domain: &str, zone_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE provisioner_domain_tasks SET dns_zone_id = $2, updated_at = NOW() WHERE domain_name = $1",
        )
        .bind(domain)
        .bind(zone_id)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }

    async fn record_ownership_token(&self, domain: &str, token: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE provisioner_domain_tasks SET ownership_token = $2, updated_at = NOW() WHERE domain_name = $1",
        )
        .bind(domain)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }

    async fn record_mail_records(&self, domain: &str, records: &MailRecords) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE provisioner_domain_tasks
            SET mx_target = $2, spf_value = $3, updated_at = NOW()
            WHERE domain_name = $1
            "#,
        )
        .bind(domain)
        .bind(&records.mx)
        .bind(&records.spf)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }

    async fn record_signing_cnames(&self, domain: &str, cnames: &SigningCnames) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE provisioner_domain_tasks
            SET signing_cname_selector1 = $2, signing_cname_selector2 = $3, updated_at = NOW()
            WHERE domain_name = $1
            "#,
        )
        .bind(domain)
        .bind(&cnames.selector1)
        .bind(&cnames.selector2)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }

    async fn mark_checkpoint(
        &self,
        domain: &str,
        checkpoint: Checkpoint,
        at: DateTime<Utc>,
    ) -> Result<()> {
        // Only the verified and signing flags carry a timestamp column
        let (sql, stamped) = match checkpoint {
            Checkpoint::DomainAdded => (
                "UPDATE provisioner_domain_tasks SET domain_added = TRUE, updated_at = NOW() WHERE domain_name = $1",
                false,
            ),
            Checkpoint::DomainVerified => (
                r#"
                UPDATE provisioner_domain_tasks
                SET domain_verified = TRUE, verified_at = COALESCE(verified_at, $2), updated_at = NOW()
                WHERE domain_name = $1
                "#,
                true,
            ),
            Checkpoint::DnsConfigured => (
                "UPDATE provisioner_domain_tasks SET dns_configured = TRUE, updated_at = NOW() WHERE domain_name = $1",
                false,
            ),
            Checkpoint::SigningCnamesAdded => (
                "UPDATE provisioner_domain_tasks SET signing_cnames_added = TRUE, updated_at = NOW() WHERE domain_name = $1",
                false,
            ),
            Checkpoint::SigningEnabled => (
                r#"
                UPDATE provisioner_domain_tasks
                SET signing_enabled = TRUE, signing_enabled_at = $2,
                    phase_error = NULL, error_step = NULL, updated_at = NOW()
                WHERE domain_name = $1
                "#,
                true,
            ),
        };

        let query = sqlx::query(sql).bind(domain);
        let query = if stamped { query.bind(at) } else { query };
        let result = query.execute(&self.pool).await?;
        Self::ensure_updated(result, domain)
    }

    async fn mark_added_and_verified(&self, domain: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE provisioner_domain_tasks
            SET domain_added = TRUE, domain_verified = TRUE,
                verified_at = COALESCE(verified_at, $2), updated_at = NOW()
            WHERE domain_name = $1
            "#,
        )
        .bind(domain)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }

    async fn increment_retry_count(&self, domain: &str) -> Result<i32> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE provisioner_domain_tasks
            SET retry_count = retry_count + 1, updated_at = NOW()
            WHERE domain_name = $1
            RETURNING retry_count
            "#,
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        count.ok_or_else(|| ProvisionerError::NotFound(domain.to_string()))
    }

    async fn record_failure(&self, domain: &str, error_step: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE provisioner_domain_tasks
            SET phase_error = $2, error_step = $3, updated_at = NOW()
            WHERE domain_name = $1
            "#,
        )
        .bind(domain)
        .bind(error)
        .bind(error_step)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }

    async fn record_signing_deferred(&self, domain: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE provisioner_domain_tasks SET last_retry_at = $2, updated_at = NOW() WHERE domain_name = $1",
        )
        .bind(domain)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }

    async fn record_signing_retry_failure(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<i32> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE provisioner_domain_tasks
            SET signing_retry_count = signing_retry_count + 1,
                last_retry_at = $2,
                phase_error = $3,
                error_step = 'enable_signing',
                updated_at = NOW()
            WHERE domain_name = $1
            RETURNING signing_retry_count
            "#,
        )
        .bind(domain)
        .bind(at)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;
        count.ok_or_else(|| ProvisionerError::NotFound(domain.to_string()))
    }

    async fn requeue(&self, domain: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE provisioner_domain_tasks
            SET status = 'pending', retry_count = 0,
                phase_error = NULL, error_step = NULL, updated_at = NOW()
            WHERE domain_name = $1
            "#,
        )
        .bind(domain)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }

    async fn restart(&self, domain: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE provisioner_domain_tasks
            SET status = 'pending',
                domain_added = FALSE, domain_verified = FALSE, dns_configured = FALSE,
                signing_cnames_added = FALSE, signing_enabled = FALSE,
                ownership_token = NULL, mx_target = NULL, spf_value = NULL,
                signing_cname_selector1 = NULL, signing_cname_selector2 = NULL,
                retry_count = 0, signing_retry_count = 0, last_retry_at = NULL,
                phase_error = NULL, error_step = NULL,
                verified_at = NULL, signing_enabled_at = NULL, completed_at = NULL,
                updated_at = NOW()
            WHERE domain_name = $1
            "#,
        )
        .bind(domain)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, domain)
    }
}
