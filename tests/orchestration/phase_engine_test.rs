use crate::common::{fast_engine_config, TestHarness, TestHarnessBuilder};
use provisioner_core::checkpoint::CheckpointStore;
use provisioner_core::config::EngineConfig;
use provisioner_core::constants::events;
use provisioner_core::error::ProvisionerError;
use provisioner_core::integrations::{
    AddDomainOutcome, AutomationError, CredentialSource, DnsError, DnsRecordType,
};
use provisioner_core::models::{Checkpoint, NewDomainTask};
use provisioner_core::orchestration::{AttemptOutcome, ErrorCategory, Phase};
use chrono::Utc;
use uuid::Uuid;

fn expect_retry(outcome: AttemptOutcome) -> provisioner_core::orchestration::PhaseError {
    match outcome {
        AttemptOutcome::Retry(error) => error,
        other => panic!("expected Retry, got {other:?}"),
    }
}

fn expect_terminal(outcome: AttemptOutcome) -> provisioner_core::orchestration::PhaseError {
    match outcome {
        AttemptOutcome::Terminal(error) => error,
        other => panic!("expected Terminal, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fresh_domain_runs_every_phase() {
    let harness = TestHarness::new();
    harness.seed("fresh.example.com").await;

    let outcome = harness.engine.execute("fresh.example.com").await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Completed { signing_deferred: false });

    let task = harness.task("fresh.example.com").await;
    assert!(task.domain_added);
    assert!(task.domain_verified);
    assert!(task.dns_configured);
    assert!(task.signing_cnames_added);
    assert!(task.signing_enabled);
    assert!(task.verified_at.is_some());
    assert!(task.signing_enabled_at.is_some());
    assert_eq!(task.dns_zone_id.as_deref(), Some("zone-fresh-example-com"));
    assert!(task.ownership_token.is_some());
    assert!(task.mx_target.is_some());
    assert!(task.signing_cname_selector1.is_some());

    assert_eq!(
        harness.automation.methods_for("fresh.example.com"),
        vec![
            "add_domain",
            "get_ownership_token",
            "verify_domain",
            "get_mail_records",
            "get_signing_cnames",
            "enable_signing",
        ]
    );
    assert_eq!(harness.dns.writes_of(DnsRecordType::Mx).len(), 1);
    assert_eq!(harness.dns.writes_of(DnsRecordType::Cname).len(), 2);
    assert_eq!(harness.automation.live_sessions(), 0);
}

#[tokio::test]
async fn test_already_verified_domain_skips_verification() {
    let harness = TestHarness::new();
    harness.seed("a.com").await;
    harness.automation.add_domain_returns(
        "a.com",
        AddDomainOutcome {
            added: true,
            already_verified: true,
        },
    );
    let mut events_rx = harness.publisher.subscribe();

    let outcome = harness.engine.execute("a.com").await.unwrap();
    assert!(outcome.is_completed());

    let task = harness.task("a.com").await;
    assert!(task.domain_added);
    assert!(task.domain_verified);
    assert!(task.verified_at.is_some());
    assert_eq!(harness.automation.count_for("verify_domain", "a.com"), 0);
    assert_eq!(harness.automation.count_for("get_ownership_token", "a.com"), 0);
    assert!(harness
        .dns
        .writes_of(DnsRecordType::Txt)
        .iter()
        .all(|w| !w.record.content.starts_with("MS=")));

    let mut phases = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        if event.name == events::DOMAIN_PHASE_COMPLETED {
            phases.push(event.context["phase"].as_str().unwrap_or_default().to_string());
        }
    }
    assert!(phases.contains(&"add_domain".to_string()));
    assert!(phases.contains(&"verify_domain".to_string()));
}

#[tokio::test]
async fn test_resume_after_verification_only_logs_in_then_configures_dns() {
    let harness = TestHarness::new();
    harness.seed("b.com").await;
    let now = Utc::now();
    harness
        .store
        .mark_checkpoint("b.com", Checkpoint::DomainAdded, now)
        .await
        .unwrap();
    harness
        .store
        .mark_checkpoint("b.com", Checkpoint::DomainVerified, now)
        .await
        .unwrap();

    let outcome = harness.engine.execute("b.com").await.unwrap();
    assert!(outcome.is_completed());

    let methods = harness.automation.methods_for("b.com");
    assert!(!methods.contains(&"add_domain"));
    assert!(!methods.contains(&"get_ownership_token"));
    assert!(!methods.contains(&"verify_domain"));
    assert_eq!(methods.first(), Some(&"get_mail_records"));
    assert_eq!(harness.automation.count("login"), 1);

    let task = harness.task("b.com").await;
    assert!(task.dns_configured);
    assert_eq!(harness.dns.writes_of(DnsRecordType::Mx).len(), 1);
}

#[tokio::test]
async fn test_verification_exhausting_phase_retries_yields_retry() {
    let harness = TestHarness::new();
    harness.seed("slow.example.com").await;
    harness.automation.verify_never_succeeds("slow.example.com");

    let outcome = harness.engine.execute("slow.example.com").await.unwrap();
    let error = expect_retry(outcome);
    assert_eq!(error.phase, Phase::VerifyDomain);
    assert_eq!(error.category, ErrorCategory::Transient);

    // One call per phase attempt; the token is fetched once and reused
    assert_eq!(harness.automation.count_for("verify_domain", "slow.example.com"), 3);
    assert_eq!(
        harness
            .automation
            .count_for("get_ownership_token", "slow.example.com"),
        1
    );
    assert_eq!(harness.automation.count("reload"), 2);

    let task = harness.task("slow.example.com").await;
    assert!(task.domain_added);
    assert!(!task.domain_verified);
    assert!(!task.dns_configured);
    assert_eq!(task.retry_count, 0);
    assert_eq!(harness.automation.count_for("get_mail_records", "slow.example.com"), 0);
    assert_eq!(harness.automation.live_sessions(), 0);
}

#[tokio::test]
async fn test_captured_token_is_reused_across_attempts() {
    let harness = TestHarness::new();
    harness.seed("reuse.example.com").await;
    harness.automation.verify_fails("reuse.example.com", 3);

    let first = harness.engine.execute("reuse.example.com").await.unwrap();
    expect_retry(first);
    let token = harness.task("reuse.example.com").await.ownership_token;
    assert!(token.is_some());

    let second = harness.engine.execute("reuse.example.com").await.unwrap();
    assert!(second.is_completed());

    assert_eq!(harness.automation.count_for("add_domain", "reuse.example.com"), 1);
    assert_eq!(
        harness
            .automation
            .count_for("get_ownership_token", "reuse.example.com"),
        1
    );
    assert_eq!(harness.task("reuse.example.com").await.ownership_token, token);
    assert_eq!(harness.dns.zone_lookups(), 1);
}

#[tokio::test]
async fn test_locked_account_is_terminal_without_retries() {
    let harness = TestHarness::new();
    harness.seed("locked.example.com").await;
    harness
        .automation
        .fail_login(AutomationError::Terminal("Your account has been locked".into()));

    let outcome = harness.engine.execute("locked.example.com").await.unwrap();
    let error = expect_terminal(outcome);
    assert_eq!(error.phase, Phase::Login);
    assert_eq!(harness.automation.count("login"), 1);
    assert_eq!(harness.automation.count("add_domain"), 0);
}

#[tokio::test]
async fn test_console_banner_marks_untyped_error_terminal() {
    let harness = TestHarnessBuilder::new()
        .engine_config(EngineConfig {
            substep_max_attempts: 3,
            ..fast_engine_config()
        })
        .build();
    harness.seed("banner.example.com").await;
    for _ in 0..3 {
        harness
            .automation
            .fail_login(AutomationError::Transient("Your account has been locked".into()));
    }

    let outcome = harness.engine.execute("banner.example.com").await.unwrap();
    let error = expect_terminal(outcome);
    assert_eq!(error.phase, Phase::Login);
    assert_eq!(error.category, ErrorCategory::Terminal);
    // A lockout banner stops every retry layer on the first answer
    assert_eq!(harness.automation.count("login"), 1);
}

#[tokio::test]
async fn test_invalid_credentials_banner_is_not_retried() {
    let harness = TestHarness::new();
    harness.seed("badpass.example.com").await;
    harness
        .automation
        .fail_login(AutomationError::Transient("Invalid credentials".into()));

    let error = expect_terminal(harness.engine.execute("badpass.example.com").await.unwrap());
    assert_eq!(error.category, ErrorCategory::Terminal);
    assert_eq!(harness.automation.count("login"), 1);
}

#[tokio::test]
async fn test_missing_credential_is_terminal() {
    let harness = TestHarness::new();
    harness
        .store
        .create(NewDomainTask::new("orphan.example.com", Uuid::new_v4()))
        .await
        .unwrap();

    let outcome = harness.engine.execute("orphan.example.com").await.unwrap();
    let error = expect_terminal(outcome);
    assert_eq!(error.phase, Phase::Login);
    assert_eq!(harness.automation.count("login"), 0);
}

#[tokio::test]
async fn test_unknown_domain_is_not_found() {
    let harness = TestHarness::new();
    let err = harness.engine.execute("missing.example.com").await.unwrap_err();
    assert!(matches!(err, ProvisionerError::NotFound(_)));
}

#[tokio::test]
async fn test_signing_failure_is_deferred_not_fatal() {
    let harness = TestHarness::new();
    harness.seed("defer.example.com").await;
    harness
        .automation
        .enable_signing_results("defer.example.com", vec![Ok(false), Ok(false), Ok(false)]);

    let outcome = harness.engine.execute("defer.example.com").await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Completed { signing_deferred: true });

    let task = harness.task("defer.example.com").await;
    assert!(task.is_provisioned());
    assert!(task.signing_cnames_added);
    assert!(!task.signing_enabled);
    assert!(task.signing_deferred());
    assert!(task.last_retry_at.is_some());
    assert_eq!(harness.automation.count_for("enable_signing", "defer.example.com"), 3);
}

#[tokio::test]
async fn test_dns_failure_does_not_block_signing_setup() {
    let harness = TestHarness::new();
    harness.seed("mx.example.com").await;
    harness
        .dns
        .fail_mx_always(DnsError::Transient("429 Too Many Requests".into()));

    let outcome = harness.engine.execute("mx.example.com").await.unwrap();
    let error = expect_retry(outcome);
    assert_eq!(error.phase, Phase::ConfigureDns);

    let task = harness.task("mx.example.com").await;
    assert!(!task.dns_configured);
    assert!(task.signing_cnames_added);
    assert!(task.signing_enabled);
    assert!(task.mx_target.is_some());
}

#[tokio::test]
async fn test_missing_zone_is_terminal() {
    let harness = TestHarness::new();
    harness.seed("nozone.example.com").await;
    harness.dns.missing_zone("nozone.example.com");

    let outcome = harness.engine.execute("nozone.example.com").await.unwrap();
    let error = expect_terminal(outcome);
    assert_eq!(error.phase, Phase::VerifyDomain);
    assert!(harness.task("nozone.example.com").await.domain_added);
}

#[tokio::test]
async fn test_unconfirmed_write_leaves_checkpoint_unset() {
    let harness = TestHarness::new();
    harness.seed("stale.example.com").await;
    harness.dns.stale_read_back(DnsRecordType::Cname);

    let outcome = harness.engine.execute("stale.example.com").await.unwrap();
    let error = expect_retry(outcome);
    assert_eq!(error.phase, Phase::ConfigureSigningCnames);

    let task = harness.task("stale.example.com").await;
    assert!(task.dns_configured);
    assert!(!task.signing_cnames_added);
    assert_eq!(harness.automation.count_for("enable_signing", "stale.example.com"), 0);
}

#[tokio::test]
async fn test_ownership_token_read_back_is_case_sensitive() {
    let harness = TestHarness::new();
    harness.seed("case.example.com").await;
    harness.dns.lowercase_read_back(DnsRecordType::Txt);

    let error = expect_retry(harness.engine.execute("case.example.com").await.unwrap());
    assert_eq!(error.phase, Phase::VerifyDomain);
    assert!(!harness.task("case.example.com").await.domain_verified);
    assert_eq!(harness.automation.count_for("verify_domain", "case.example.com"), 0);
}

#[tokio::test]
async fn test_rotated_password_is_recorded() {
    let harness = TestHarness::new();
    harness.seed("rotate.example.com").await;
    harness.automation.rotate_password_on_login("rotated-secret");

    let outcome = harness.engine.execute("rotate.example.com").await.unwrap();
    assert!(outcome.is_completed());

    let credential = harness
        .credentials
        .credential_for(harness.tenant_id)
        .await
        .unwrap();
    assert_eq!(credential.password, "rotated-secret");
}

#[tokio::test]
async fn test_failed_reload_logs_in_again() {
    let harness = TestHarness::new();
    harness.seed("reload.example.com").await;
    harness.automation.verify_fails("reload.example.com", 1);
    harness
        .automation
        .fail_reload(AutomationError::SessionExpired("signed out".into()));

    let outcome = harness.engine.execute("reload.example.com").await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(harness.automation.count("login"), 2);
    assert_eq!(
        harness.automation.sessions_opened(),
        harness.automation.sessions_closed()
    );
    assert_eq!(harness.automation.live_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_settle_intervals_are_honored() {
    let mut config = fast_engine_config();
    config.phase_timeout_seconds = 180;
    config.verification_settle_seconds = 30;
    config.signing_settle_seconds = 60;
    let harness = TestHarnessBuilder::new().engine_config(config).build();
    harness.seed("settle.example.com").await;

    let started = tokio::time::Instant::now();
    let outcome = harness.engine.execute("settle.example.com").await.unwrap();
    assert!(outcome.is_completed());
    assert!(started.elapsed() >= std::time::Duration::from_secs(90));
}
