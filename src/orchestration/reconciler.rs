//! # Signing Reconciler
//!
//! Background job that retries signing activation for domains whose signing
//! CNAMEs are published but whose activation was deferred.
//!
//! ## Rules
//!
//! - A tick does nothing while a foreground batch holds the run-state flag.
//! - A domain is retried only inside the retry window measured from its
//!   verification, and no sooner than the minimum spacing after its last try.
//! - Every retry uses a fresh, standalone automation session that is closed
//!   before the next domain is considered. Login and activation are each
//!   bounded by the engine's phase timeout; a timeout counts as a failure.
//! - A store error while recording one domain's result is logged and the
//!   tick moves on to the next candidate.
//! - Failures increment `signing_retry_count` and are recorded for operators,
//!   but never change the task's lifecycle status. Once the window closes the
//!   domain simply stops being a candidate.

use super::error_classifier::{ErrorClassifier, StandardErrorClassifier};
use super::errors::PhaseError;
use super::retry::{retry_substep_until, RetryPolicy};
use super::run_state::RunState;
use super::types::Phase;
use crate::checkpoint::CheckpointStore;
use crate::config::{EngineConfig, ReconciliationConfig};
use crate::constants::events;
use crate::error::Result;
use crate::events::EventPublisher;
use crate::integrations::{AutomationSession, CredentialSource};
use crate::models::{Checkpoint, DomainTask, SigningRetryEligibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one reconciliation tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// The tick did nothing because a foreground batch was running
    pub skipped: bool,
    /// Domains with signing still pending
    pub candidates: usize,
    pub attempted: usize,
    pub enabled: usize,
    pub failed: usize,
    /// Last attempt too recent
    pub too_soon: usize,
    /// Retry window closed; left without signing for good
    pub expired: usize,
    /// Results that could not be written to the store
    pub unsaved: usize,
    /// A foreground batch started part-way through the tick
    pub interrupted: bool,
}

pub struct SigningReconciler {
    automation: Arc<dyn AutomationSession>,
    credentials: Arc<dyn CredentialSource>,
    store: Arc<dyn CheckpointStore>,
    classifier: Arc<dyn ErrorClassifier>,
    run_state: Arc<RunState>,
    publisher: EventPublisher,
    config: ReconciliationConfig,
    retry_policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for SigningReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningReconciler")
            .field("config", &self.config)
            .field("retry_policy", &self.retry_policy)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl SigningReconciler {
    pub fn new(
        automation: Arc<dyn AutomationSession>,
        credentials: Arc<dyn CredentialSource>,
        store: Arc<dyn CheckpointStore>,
        run_state: Arc<RunState>,
        config: ReconciliationConfig,
        engine_config: &EngineConfig,
    ) -> Self {
        Self {
            automation,
            credentials,
            store,
            classifier: Arc::new(StandardErrorClassifier::new()),
            run_state,
            publisher: EventPublisher::default(),
            config,
            retry_policy: RetryPolicy::substep(engine_config),
            attempt_timeout: engine_config.phase_timeout(),
        }
    }

    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub async fn tick(&self) -> Result<ReconcileReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one reconciliation pass as of `now`
    #[instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        if self.run_state.is_batch_running() {
            debug!("RECONCILE: Foreground batch running, skipping tick");
            report.skipped = true;
            return Ok(report);
        }

        let candidates = self.store.list_signing_pending().await?;
        report.candidates = candidates.len();

        for task in candidates {
            match task.signing_retry_eligibility(
                now,
                self.config.retry_window(),
                self.config.min_retry_spacing(),
            ) {
                SigningRetryEligibility::Eligible => {}
                SigningRetryEligibility::TooSoon => {
                    report.too_soon += 1;
                    continue;
                }
                SigningRetryEligibility::WindowExpired => {
                    debug!(domain = %task.domain_name, "RECONCILE: Retry window closed");
                    report.expired += 1;
                    continue;
                }
                SigningRetryEligibility::NotApplicable => continue,
            }

            if self.run_state.is_batch_running() {
                info!("RECONCILE: Foreground batch started, yielding");
                report.interrupted = true;
                break;
            }

            report.attempted += 1;
            match self.retry_signing(&task).await {
                Ok(()) => {
                    if let Err(e) = self
                        .store
                        .mark_checkpoint(&task.domain_name, Checkpoint::SigningEnabled, now)
                        .await
                    {
                        error!(
                            domain = %task.domain_name,
                            error = %e,
                            "RECONCILE: Signing enabled but checkpoint not recorded"
                        );
                        report.unsaved += 1;
                        continue;
                    }
                    report.enabled += 1;
                    info!(domain = %task.domain_name, "✅ RECONCILE: Signing enabled");
                    self.publisher.publish(
                        events::DOMAIN_SIGNING_ENABLED,
                        &task.domain_name,
                        json!({ "signing_retry_count": task.signing_retry_count }),
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    let count = match self
                        .store
                        .record_signing_retry_failure(&task.domain_name, now, &error.message)
                        .await
                    {
                        Ok(count) => count,
                        Err(e) => {
                            error!(
                                domain = %task.domain_name,
                                error = %e,
                                "RECONCILE: Signing retry failure not recorded"
                            );
                            report.unsaved += 1;
                            task.signing_retry_count + 1
                        }
                    };
                    warn!(
                        domain = %task.domain_name,
                        signing_retry_count = count,
                        error = %error,
                        "⚠️ RECONCILE: Signing retry failed"
                    );
                    self.publisher.publish(
                        events::DOMAIN_SIGNING_RETRY_FAILED,
                        &task.domain_name,
                        json!({ "signing_retry_count": count, "error": error.message }),
                    );
                }
            }
        }

        if report.candidates > 0 {
            info!(
                candidates = report.candidates,
                enabled = report.enabled,
                failed = report.failed,
                expired = report.expired,
                "🔁 RECONCILE: Tick complete"
            );
        }
        Ok(report)
    }

    /// Fresh login, one activation request, close
    async fn retry_signing(&self, task: &DomainTask) -> std::result::Result<(), PhaseError> {
        let phase = Phase::EnableSigning;
        let credential = self
            .credentials
            .credential_for(task.tenant_id)
            .await
            .map_err(|e| PhaseError::transient(Phase::Login, e.to_string()))?;

        let login = self
            .bounded(Phase::Login, async {
                retry_substep_until(
                    self.retry_policy,
                    "login",
                    |e| self.classifier.classify_automation(Phase::Login, e).is_terminal(),
                    || self.automation.login(&credential),
                )
                .await
                .map_err(|e| self.classifier.classify_automation(Phase::Login, &e))
            })
            .await?;

        if let Some(rotated) = login.rotated_password {
            if let Err(e) = self
                .credentials
                .record_rotated_password(task.tenant_id, &rotated)
                .await
            {
                warn!(domain = %task.domain_name, error = %e, "Rotated password could not be recorded");
            }
        }

        let session = login.session;
        let result = self
            .bounded(phase, async {
                retry_substep_until(
                    self.retry_policy,
                    "enable_signing",
                    |e| self.classifier.classify_automation(phase, e).is_terminal(),
                    || self.automation.enable_signing(&session, &task.domain_name),
                )
                .await
                .map_err(|e| self.classifier.classify_automation(phase, &e))
            })
            .await;
        self.automation.close(session).await;

        match result? {
            true => Ok(()),
            false => Err(PhaseError::transient(
                phase,
                "console refused to activate signing",
            )),
        }
    }

    /// Bound one console step by the attempt timeout
    async fn bounded<T>(
        &self,
        phase: Phase,
        step: impl Future<Output = std::result::Result<T, PhaseError>>,
    ) -> std::result::Result<T, PhaseError> {
        match tokio::time::timeout(self.attempt_timeout, step).await {
            Ok(result) => result,
            Err(_) => Err(PhaseError::transient(
                phase,
                format!("signing retry timed out after {:?}", self.attempt_timeout),
            )),
        }
    }

    /// Tick on the configured interval until shutdown
    pub async fn run(self: Arc<Self>) {
        if !self.config.enabled {
            info!("RECONCILE: Disabled by configuration");
            return;
        }

        info!(
            interval_seconds = self.config.interval_seconds,
            "🚀 RECONCILE: Background reconciliation started"
        );
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tokio::select! {
                        result = self.tick() => {
                            if let Err(e) = result {
                                error!(error = %e, "RECONCILE: Tick failed");
                            }
                        }
                        _ = self.run_state.shutdown_requested() => break,
                    }
                }
                _ = self.run_state.shutdown_requested() => break,
            }
        }
        info!("🛑 RECONCILE: Background reconciliation stopped");
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
