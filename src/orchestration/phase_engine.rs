//! # Phase Engine
//!
//! Runs the ordered phase list for one domain, honoring checkpoints.
//!
//! ## Overview
//!
//! Each call to [`PhaseEngine::execute`] is one full-entity attempt: a fresh
//! login, then every phase whose checkpoint is still unset, in order. A phase
//! whose checkpoint is already `true` issues no calls at all, so an attempt
//! resumes exactly where the previous one stopped.
//!
//! ## Retry Layers
//!
//! ```text
//! execute()                     one full-entity attempt (counted by the scheduler)
//!   └─ run_phase()              phase_max_attempts, reload/re-login in between,
//!        │                      each attempt bounded by phase_timeout
//!        └─ retry_substep()     substep_max_attempts per console or DNS call
//! ```
//!
//! ## Checkpoint Discipline
//!
//! A flag is written only after the side effect is confirmed: DNS writes are
//! compared against the record the provider reports back, and console steps
//! are confirmed by the console's own answer. Captured values (ownership
//! token, mail records, signing CNAMEs) are persisted the moment they are
//! read and reused by every later attempt.
//!
//! ## Outcomes
//!
//! - Verification that never succeeds, or any other phase exhausting its
//!   retries with a transient error, yields [`AttemptOutcome::Retry`].
//! - A terminal console or DNS error yields [`AttemptOutcome::Terminal`].
//! - `ConfigureDns` failing does not stop signing CNAME setup; the attempt
//!   still ends in `Retry` so mail routing is revisited.
//! - `EnableSigning` failing is deferred to the reconciler and the attempt
//!   reports [`AttemptOutcome::Completed`] with `signing_deferred = true`.

use super::error_classifier::{ErrorClassifier, StandardErrorClassifier};
use super::errors::{ErrorCategory, PhaseError};
use super::retry::{retry_substep_until, RetryPolicy};
use super::types::{AttemptOutcome, Phase};
use crate::checkpoint::CheckpointStore;
use crate::config::EngineConfig;
use crate::constants::events;
use crate::error::{ProvisionerError, Result};
use crate::events::EventPublisher;
use crate::integrations::{
    AddDomainOutcome, AutomationError, AutomationSession, CredentialSource, DnsError,
    DnsProvider, DnsRecord, MailRecords, SessionHandle, SigningCnames,
};
use crate::logging::log_phase_operation;
use crate::models::{Checkpoint, DomainTask, TenantCredential};
use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Per-attempt mutable state; never shared between attempts
struct AttemptContext {
    domain: String,
    credential: TenantCredential,
    session: Option<SessionHandle>,
    zone_id: Option<String>,
}

pub struct PhaseEngine {
    automation: Arc<dyn AutomationSession>,
    dns: Arc<dyn DnsProvider>,
    credentials: Arc<dyn CredentialSource>,
    store: Arc<dyn CheckpointStore>,
    classifier: Arc<dyn ErrorClassifier>,
    publisher: EventPublisher,
    config: EngineConfig,
}

impl std::fmt::Debug for PhaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseEngine")
            .field("classifier", &self.classifier.classifier_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PhaseEngine {
    pub fn new(
        automation: Arc<dyn AutomationSession>,
        dns: Arc<dyn DnsProvider>,
        credentials: Arc<dyn CredentialSource>,
        store: Arc<dyn CheckpointStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            automation,
            dns,
            credentials,
            store,
            classifier: Arc::new(StandardErrorClassifier::new()),
            publisher: EventPublisher::default(),
            config,
        }
    }

    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one full-entity attempt for `domain`.
    ///
    /// Only a missing task or an unreadable checkpoint store is an `Err`;
    /// every collaborator failure is folded into the returned outcome. The
    /// automation session opened by this attempt is always closed before
    /// returning.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn execute(&self, domain: &str) -> Result<AttemptOutcome> {
        let task = self
            .store
            .find(domain)
            .await?
            .ok_or_else(|| ProvisionerError::NotFound(domain.to_string()))?;

        let credential = match self.credentials.credential_for(task.tenant_id).await {
            Ok(credential) => credential,
            Err(ProvisionerError::NotFound(message)) => {
                return Ok(AttemptOutcome::Terminal(PhaseError::terminal(
                    Phase::Login,
                    format!("no credential available: {message}"),
                )))
            }
            Err(error) => {
                return Ok(AttemptOutcome::Retry(PhaseError::transient(
                    Phase::Login,
                    format!("credential lookup failed: {error}"),
                )))
            }
        };

        let mut ctx = AttemptContext {
            domain: task.domain_name.clone(),
            credential,
            session: None,
            zone_id: task.dns_zone_id.clone(),
        };

        let outcome = match self.run_phases(&mut ctx, task).await {
            Ok(outcome) => outcome,
            Err(error) if error.is_terminal() => AttemptOutcome::Terminal(error),
            Err(error) => AttemptOutcome::Retry(error),
        };

        if let Some(session) = ctx.session.take() {
            self.automation.close(session).await;
        }

        debug!(domain = %domain, outcome = ?outcome, "Attempt finished");
        Ok(outcome)
    }

    async fn run_phases(
        &self,
        ctx: &mut AttemptContext,
        mut task: DomainTask,
    ) -> std::result::Result<AttemptOutcome, PhaseError> {
        let domain = ctx.domain.clone();

        // Phase 1: sessions are never carried across attempts
        self.login(ctx).await?;

        // Phase 2
        if task.domain_added {
            self.log_skipped(&domain, Phase::AddDomain);
        } else {
            let outcome: AddDomainOutcome = self
                .run_phase(ctx, Phase::AddDomain, |session| {
                    self.add_domain_attempt(session, &domain)
                })
                .await?;

            if outcome.already_verified && !task.domain_verified {
                self.store
                    .mark_added_and_verified(&domain, Utc::now())
                    .await
                    .map_err(|e| persist_failed(Phase::AddDomain, e))?;
                task.domain_verified = true;
                self.phase_completed(&domain, Phase::AddDomain);
                self.phase_completed(&domain, Phase::VerifyDomain);
                info!(domain = %domain, "✅ PHASE: Console reports domain already verified");
            } else {
                self.mark(&domain, Phase::AddDomain, Checkpoint::DomainAdded)
                    .await?;
            }
            task.domain_added = true;
        }

        // Phase 3
        if task.domain_verified {
            self.log_skipped(&domain, Phase::VerifyDomain);
        } else {
            let zone_id = self.zone_id(ctx, Phase::VerifyDomain).await?;
            self.run_phase(ctx, Phase::VerifyDomain, |session| {
                self.verify_attempt(session, &domain, &zone_id)
            })
            .await?;
            self.mark(&domain, Phase::VerifyDomain, Checkpoint::DomainVerified)
                .await?;
            task.domain_verified = true;
        }

        // Phase 4: mail routing is not a prerequisite for signing setup
        let mut dns_failure = None;
        if task.dns_configured {
            self.log_skipped(&domain, Phase::ConfigureDns);
        } else {
            match self.configure_dns(ctx).await {
                Ok(()) => {
                    self.mark(&domain, Phase::ConfigureDns, Checkpoint::DnsConfigured)
                        .await?;
                    task.dns_configured = true;
                }
                Err(error) if error.is_terminal() => return Err(error),
                Err(error) => {
                    warn!(
                        domain = %domain,
                        error = %error,
                        "⚠️ PHASE: DNS configuration failed, continuing with signing setup"
                    );
                    dns_failure = Some(error);
                }
            }
        }

        // Phase 5
        let mut cnames_published_now = false;
        if task.signing_cnames_added {
            self.log_skipped(&domain, Phase::ConfigureSigningCnames);
        } else {
            let zone_id = self.zone_id(ctx, Phase::ConfigureSigningCnames).await?;
            self.run_phase(ctx, Phase::ConfigureSigningCnames, |session| {
                self.signing_cnames_attempt(session, &domain, &zone_id)
            })
            .await?;
            self.mark(
                &domain,
                Phase::ConfigureSigningCnames,
                Checkpoint::SigningCnamesAdded,
            )
            .await?;
            task.signing_cnames_added = true;
            cnames_published_now = true;
        }

        // Phase 6: failure here is deferred, never fatal
        let mut signing_deferred = false;
        if task.signing_enabled {
            self.log_skipped(&domain, Phase::EnableSigning);
        } else {
            if cnames_published_now {
                self.settle(self.config.signing_settle()).await;
            }
            match self
                .run_phase(ctx, Phase::EnableSigning, |session| {
                    self.enable_signing_attempt(session, &domain)
                })
                .await
            {
                Ok(()) => {
                    self.mark(&domain, Phase::EnableSigning, Checkpoint::SigningEnabled)
                        .await?;
                    task.signing_enabled = true;
                }
                Err(error) => {
                    let error = error.with_category(ErrorCategory::Deferred);
                    warn!(
                        domain = %domain,
                        error = %error,
                        "⏳ PHASE: Signing activation deferred to reconciliation"
                    );
                    if let Err(e) = self
                        .store
                        .record_signing_deferred(&domain, Utc::now())
                        .await
                    {
                        warn!(domain = %domain, error = %e, "Failed to record signing deferral");
                    }
                    signing_deferred = true;
                }
            }
        }

        if let Some(error) = dns_failure {
            return Ok(AttemptOutcome::Retry(error));
        }

        debug_assert!(task.is_provisioned());
        Ok(AttemptOutcome::Completed { signing_deferred })
    }

    /// Phase-level retry around one phase body.
    ///
    /// Between attempts the session is reloaded; if the reload fails the
    /// session is closed and the next attempt logs in again.
    async fn run_phase<T, F, Fut>(
        &self,
        ctx: &mut AttemptContext,
        phase: Phase,
        mut attempt_fn: F,
    ) -> std::result::Result<T, PhaseError>
    where
        F: FnMut(SessionHandle) -> Fut,
        Fut: Future<Output = std::result::Result<T, PhaseError>>,
    {
        let policy = RetryPolicy::phase(&self.config);
        let phase_timeout = self.config.phase_timeout();
        let mut attempt = 1;

        loop {
            let session = self.session(ctx).await?;
            log_phase_operation(&ctx.domain, phase.as_str(), attempt, "started", None);

            let result = match tokio::time::timeout(phase_timeout, attempt_fn(session)).await {
                Ok(result) => result,
                Err(_) => Err(PhaseError::transient(
                    phase,
                    format!("phase attempt timed out after {phase_timeout:?}"),
                )),
            };

            match result {
                Ok(value) => {
                    log_phase_operation(&ctx.domain, phase.as_str(), attempt, "succeeded", None);
                    return Ok(value);
                }
                Err(error) if error.is_terminal() || policy.is_last_attempt(attempt) => {
                    log_phase_operation(
                        &ctx.domain,
                        phase.as_str(),
                        attempt,
                        "failed",
                        Some(error.message.as_str()),
                    );
                    return Err(error);
                }
                Err(error) => {
                    log_phase_operation(
                        &ctx.domain,
                        phase.as_str(),
                        attempt,
                        "retrying",
                        Some(error.message.as_str()),
                    );
                    self.reset_session(ctx).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Current session, logging in when there is none
    async fn session(
        &self,
        ctx: &mut AttemptContext,
    ) -> std::result::Result<SessionHandle, PhaseError> {
        if let Some(session) = &ctx.session {
            return Ok(session.clone());
        }
        self.login(ctx).await
    }

    async fn login(
        &self,
        ctx: &mut AttemptContext,
    ) -> std::result::Result<SessionHandle, PhaseError> {
        if let Some(stale) = ctx.session.take() {
            self.automation.close(stale).await;
        }

        let policy = RetryPolicy::phase(&self.config);
        let phase_timeout = self.config.phase_timeout();
        let mut attempt = 1;

        loop {
            log_phase_operation(&ctx.domain, Phase::Login.as_str(), attempt, "started", None);
            let result = tokio::time::timeout(
                phase_timeout,
                self.console(Phase::Login, "login", || {
                    self.automation.login(&ctx.credential)
                }),
            )
            .await
            .unwrap_or_else(|_| {
                Err(PhaseError::transient(
                    Phase::Login,
                    format!("login timed out after {phase_timeout:?}"),
                ))
            });

            match result {
                Ok(outcome) => {
                    if let Some(rotated) = outcome.rotated_password {
                        self.record_rotation(ctx, rotated).await;
                    }
                    log_phase_operation(&ctx.domain, Phase::Login.as_str(), attempt, "succeeded", None);
                    ctx.session = Some(outcome.session.clone());
                    return Ok(outcome.session);
                }
                Err(error) if error.is_terminal() || policy.is_last_attempt(attempt) => {
                    log_phase_operation(
                        &ctx.domain,
                        Phase::Login.as_str(),
                        attempt,
                        "failed",
                        Some(error.message.as_str()),
                    );
                    return Err(error);
                }
                Err(error) => {
                    log_phase_operation(
                        &ctx.domain,
                        Phase::Login.as_str(),
                        attempt,
                        "retrying",
                        Some(error.message.as_str()),
                    );
                    attempt += 1;
                }
            }
        }
    }

    /// The console forced a password change; keep using the new one
    async fn record_rotation(&self, ctx: &mut AttemptContext, rotated: String) {
        let tenant_id = ctx.credential.tenant_id;
        match self
            .credentials
            .record_rotated_password(tenant_id, &rotated)
            .await
        {
            Ok(()) => info!(domain = %ctx.domain, tenant_id = %tenant_id, "🔑 PHASE: Recorded rotated admin password"),
            Err(e) => warn!(
                domain = %ctx.domain,
                tenant_id = %tenant_id,
                error = %e,
                "Console rotated the admin password but it could not be recorded"
            ),
        }
        ctx.credential.password = rotated;
    }

    async fn reset_session(&self, ctx: &mut AttemptContext) {
        let Some(session) = ctx.session.as_ref() else {
            return;
        };
        if let Err(error) = self.automation.reload(session).await {
            debug!(domain = %ctx.domain, error = %error, "Session reload failed, logging in again");
            if let Some(session) = ctx.session.take() {
                self.automation.close(session).await;
            }
        }
    }

    /// Hosting zone for the domain, resolved once and persisted
    async fn zone_id(
        &self,
        ctx: &mut AttemptContext,
        phase: Phase,
    ) -> std::result::Result<String, PhaseError> {
        if let Some(zone_id) = &ctx.zone_id {
            return Ok(zone_id.clone());
        }

        let domain = ctx.domain.clone();
        let zone_id = self
            .dns_call(phase, "zone_id", || self.dns.zone_id(&domain))
            .await?;
        self.store
            .record_zone_id(&domain, &zone_id)
            .await
            .map_err(|e| persist_failed(phase, e))?;
        ctx.zone_id = Some(zone_id.clone());
        Ok(zone_id)
    }

    async fn add_domain_attempt(
        &self,
        session: SessionHandle,
        domain: &str,
    ) -> std::result::Result<AddDomainOutcome, PhaseError> {
        let outcome = self
            .console(Phase::AddDomain, "add_domain", || {
                self.automation.add_domain(&session, domain)
            })
            .await?;

        if !outcome.added {
            return Err(PhaseError::transient(
                Phase::AddDomain,
                "console did not list the domain after submission",
            ));
        }

        if !outcome.already_verified {
            self.ownership_token(Phase::AddDomain, &session, domain)
                .await?;
        }

        Ok(outcome)
    }

    async fn verify_attempt(
        &self,
        session: SessionHandle,
        domain: &str,
        zone_id: &str,
    ) -> std::result::Result<(), PhaseError> {
        let phase = Phase::VerifyDomain;
        let token = self.ownership_token(phase, &session, domain).await?;

        let record = self
            .dns_call(phase, "ensure_txt", || self.dns.ensure_txt(zone_id, &token))
            .await?;
        confirm_read_back(phase, &record, &token)?;

        self.settle(self.config.verification_settle()).await;

        let verified = self
            .console(phase, "verify_domain", || {
                self.automation.verify_domain(&session, domain)
            })
            .await?;
        if !verified {
            return Err(PhaseError::transient(
                phase,
                "console could not see the ownership record yet",
            ));
        }
        Ok(())
    }

    async fn configure_dns(&self, ctx: &mut AttemptContext) -> std::result::Result<(), PhaseError> {
        let domain = ctx.domain.clone();
        let zone_id = self.zone_id(ctx, Phase::ConfigureDns).await?;
        self.run_phase(ctx, Phase::ConfigureDns, |session| {
            self.configure_dns_attempt(session, &domain, &zone_id)
        })
        .await
    }

    async fn configure_dns_attempt(
        &self,
        session: SessionHandle,
        domain: &str,
        zone_id: &str,
    ) -> std::result::Result<(), PhaseError> {
        let phase = Phase::ConfigureDns;
        let records = self.mail_records(&session, domain).await?;

        let mx = self
            .dns_call(phase, "ensure_mx", || self.dns.ensure_mx(zone_id, &records.mx))
            .await?;
        confirm_read_back(phase, &mx, &records.mx)?;

        let spf = self
            .dns_call(phase, "ensure_txt_spf", || {
                self.dns.ensure_txt_spf(zone_id, &records.spf)
            })
            .await?;
        confirm_read_back(phase, &spf, &records.spf)
    }

    async fn signing_cnames_attempt(
        &self,
        session: SessionHandle,
        domain: &str,
        zone_id: &str,
    ) -> std::result::Result<(), PhaseError> {
        let phase = Phase::ConfigureSigningCnames;
        let cnames = self.signing_cnames(&session, domain).await?;

        let targets = [
            (self.config.signing_selector1_label.as_str(), &cnames.selector1),
            (self.config.signing_selector2_label.as_str(), &cnames.selector2),
        ];
        for (label, target) in targets {
            let record = self
                .dns_call(phase, "ensure_cname", || {
                    self.dns.ensure_cname(zone_id, label, target)
                })
                .await?;
            confirm_read_back(phase, &record, target)?;
        }
        Ok(())
    }

    async fn enable_signing_attempt(
        &self,
        session: SessionHandle,
        domain: &str,
    ) -> std::result::Result<(), PhaseError> {
        let enabled = self
            .console(Phase::EnableSigning, "enable_signing", || {
                self.automation.enable_signing(&session, domain)
            })
            .await?;
        if !enabled {
            return Err(PhaseError::transient(
                Phase::EnableSigning,
                "console refused to activate signing",
            ));
        }
        Ok(())
    }

    /// Stored ownership token, or read it from the console and persist it
    async fn ownership_token(
        &self,
        phase: Phase,
        session: &SessionHandle,
        domain: &str,
    ) -> std::result::Result<String, PhaseError> {
        if let Some(token) = self.captured(phase, domain, |t| t.ownership_token.clone()).await? {
            return Ok(token);
        }

        let token = self
            .console(phase, "get_ownership_token", || {
                self.automation.get_ownership_token(session, domain)
            })
            .await?;
        self.store
            .record_ownership_token(domain, &token)
            .await
            .map_err(|e| persist_failed(phase, e))?;
        Ok(token)
    }

    async fn mail_records(
        &self,
        session: &SessionHandle,
        domain: &str,
    ) -> std::result::Result<MailRecords, PhaseError> {
        let phase = Phase::ConfigureDns;
        let stored = self
            .captured(phase, domain, |t| match (&t.mx_target, &t.spf_value) {
                (Some(mx), Some(spf)) => Some(MailRecords {
                    mx: mx.clone(),
                    spf: spf.clone(),
                }),
                _ => None,
            })
            .await?;
        if let Some(records) = stored {
            return Ok(records);
        }

        let records = self
            .console(phase, "get_mail_records", || {
                self.automation.get_mail_records(session, domain)
            })
            .await?;
        self.store
            .record_mail_records(domain, &records)
            .await
            .map_err(|e| persist_failed(phase, e))?;
        Ok(records)
    }

    async fn signing_cnames(
        &self,
        session: &SessionHandle,
        domain: &str,
    ) -> std::result::Result<SigningCnames, PhaseError> {
        let phase = Phase::ConfigureSigningCnames;
        let stored = self
            .captured(phase, domain, |t| {
                t.signing_cnames().map(|(s1, s2)| SigningCnames {
                    selector1: s1.to_string(),
                    selector2: s2.to_string(),
                })
            })
            .await?;
        if let Some(cnames) = stored {
            return Ok(cnames);
        }

        let cnames = self
            .console(phase, "get_signing_cnames", || {
                self.automation.get_signing_cnames(session, domain)
            })
            .await?;
        self.store
            .record_signing_cnames(domain, &cnames)
            .await
            .map_err(|e| persist_failed(phase, e))?;
        Ok(cnames)
    }

    /// Read a captured value from the latest persisted row
    async fn captured<T>(
        &self,
        phase: Phase,
        domain: &str,
        select: impl FnOnce(&DomainTask) -> Option<T>,
    ) -> std::result::Result<Option<T>, PhaseError> {
        let task = self
            .store
            .find(domain)
            .await
            .map_err(|e| persist_failed(phase, e))?;
        Ok(task.as_ref().and_then(select))
    }

    /// One console interaction under sub-step retry
    async fn console<T, F, Fut>(
        &self,
        phase: Phase,
        operation: &str,
        call: F,
    ) -> std::result::Result<T, PhaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, AutomationError>>,
    {
        retry_substep_until(
            RetryPolicy::substep(&self.config),
            operation,
            |e| self.classifier.classify_automation(phase, e).is_terminal(),
            call,
        )
        .await
        .map_err(|e| self.classifier.classify_automation(phase, &e))
    }

    /// One DNS provider call under sub-step retry
    async fn dns_call<T, F, Fut>(
        &self,
        phase: Phase,
        operation: &str,
        call: F,
    ) -> std::result::Result<T, PhaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, DnsError>>,
    {
        retry_substep_until(
            RetryPolicy::substep(&self.config),
            operation,
            |e| self.classifier.classify_dns(phase, e).is_terminal(),
            call,
        )
        .await
        .map_err(|e| self.classifier.classify_dns(phase, &e))
    }

    async fn mark(
        &self,
        domain: &str,
        phase: Phase,
        checkpoint: Checkpoint,
    ) -> std::result::Result<(), PhaseError> {
        self.store
            .mark_checkpoint(domain, checkpoint, Utc::now())
            .await
            .map_err(|e| persist_failed(phase, e))?;
        self.phase_completed(domain, phase);
        Ok(())
    }

    fn phase_completed(&self, domain: &str, phase: Phase) {
        info!(domain = %domain, phase = %phase, "✅ PHASE: Checkpoint set");
        self.publisher.publish(
            events::DOMAIN_PHASE_COMPLETED,
            domain,
            json!({ "phase": phase.as_str() }),
        );
    }

    fn log_skipped(&self, domain: &str, phase: Phase) {
        log_phase_operation(domain, phase.as_str(), 0, "skipped", Some("checkpoint already set"));
    }

    async fn settle(&self, interval: Duration) {
        if !interval.is_zero() {
            debug!(seconds = interval.as_secs(), "Waiting for DNS change to settle");
            tokio::time::sleep(interval).await;
        }
    }
}

fn confirm_read_back(
    phase: Phase,
    record: &DnsRecord,
    expected: &str,
) -> std::result::Result<(), PhaseError> {
    if record.has_content(expected) {
        Ok(())
    } else {
        Err(PhaseError::transient(
            phase,
            format!(
                "{} record {} read back as {:?}, expected {:?}",
                record.record_type, record.name, record.content, expected
            ),
        ))
    }
}

fn persist_failed(phase: Phase, error: ProvisionerError) -> PhaseError {
    PhaseError::transient(phase, format!("checkpoint store write failed: {error}"))
}
