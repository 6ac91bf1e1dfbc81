use crate::common::{fast_scheduler_config, ScriptedAutomation, TestHarness, TestHarnessBuilder};
use provisioner_core::checkpoint::CheckpointStore;
use provisioner_core::config::SchedulerConfig;
use provisioner_core::error::ProvisionerError;
use provisioner_core::integrations::AutomationError;
use provisioner_core::models::NewDomainTask;
use provisioner_core::orchestration::{ConcurrencyScheduler, TickReport};
use provisioner_core::state_machine::DomainTaskState;
use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

/// Tick until at least one attempt has been persisted
async fn tick_until_finished(scheduler: &ConcurrencyScheduler) -> TickReport {
    for _ in 0..500 {
        let report = scheduler.tick().await;
        if report.finished > 0 {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("no attempt finished in time");
}

fn slow_poll_config(max_entity_retries: i32) -> SchedulerConfig {
    SchedulerConfig {
        propagation_poll_interval_seconds: 120,
        ..fast_scheduler_config(1, max_entity_retries)
    }
}

#[tokio::test]
async fn test_batch_completes_every_domain() {
    let harness = TestHarness::new();
    for domain in ["one.example.com", "two.example.com", "three.example.com"] {
        assert!(harness
            .scheduler
            .enqueue(NewDomainTask::new(domain, harness.tenant_id))
            .await
            .unwrap());
    }

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 0);
    assert!(!summary.stopped_early);

    for domain in ["one.example.com", "two.example.com", "three.example.com"] {
        let task = harness.task(domain).await;
        assert_eq!(task.state(), DomainTaskState::Completed);
        assert!(task.completed_at.is_some());
    }
    assert!(!harness.run_state.is_batch_running());
    assert_eq!(harness.automation.live_sessions(), 0);
}

#[tokio::test]
async fn test_enqueue_normalizes_and_rejects_duplicates() {
    let harness = TestHarness::new();
    assert!(harness
        .scheduler
        .enqueue(NewDomainTask::new("  Mixed.Example.COM. ", harness.tenant_id))
        .await
        .unwrap());
    assert!(!harness
        .scheduler
        .enqueue(NewDomainTask::new("mixed.example.com", harness.tenant_id))
        .await
        .unwrap());
    assert_eq!(harness.scheduler.list_pending(), vec!["mixed.example.com"]);

    let err = harness
        .scheduler
        .enqueue(NewDomainTask::new("not a domain", harness.tenant_id))
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionerError::ValidationError(_)));
}

#[tokio::test]
async fn test_first_failed_attempt_parks_with_one_retry() {
    let harness = TestHarnessBuilder::new()
        .scheduler_config(slow_poll_config(10))
        .build();
    harness.automation.verify_never_succeeds("c.example.com");
    harness
        .scheduler
        .enqueue(NewDomainTask::new("c.example.com", harness.tenant_id))
        .await
        .unwrap();

    let report = tick_until_finished(&harness.scheduler).await;
    assert_eq!(report.parked, 1);
    assert_eq!(report.active, 0);
    assert_eq!(report.waiting, 1);

    let task = harness.task("c.example.com").await;
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.state(), DomainTaskState::WaitingOnPropagation);
    assert_eq!(harness.scheduler.list_waiting(), vec!["c.example.com"]);
    assert!(harness.scheduler.list_active().is_empty());

    // Not due for another poll interval
    let report = harness.scheduler.tick().await;
    assert_eq!(report.dispatched, 0);
}

#[tokio::test]
async fn test_domain_fails_at_retry_ceiling() {
    let harness = TestHarnessBuilder::new()
        .scheduler_config(fast_scheduler_config(1, 3))
        .build();
    harness.automation.verify_never_succeeds("d.example.com");
    harness
        .scheduler
        .enqueue(NewDomainTask::new("d.example.com", harness.tenant_id))
        .await
        .unwrap();

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.parked, 2);
    assert_eq!(summary.dispatched, 3);

    let task = harness.task("d.example.com").await;
    assert_eq!(task.state(), DomainTaskState::Failed);
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.error_step.as_deref(), Some("verify_domain"));
    assert!(task.phase_error.is_some());
    // Three entity attempts, three phase attempts each
    assert_eq!(harness.automation.count_for("verify_domain", "d.example.com"), 9);
    assert!(harness.scheduler.list_waiting().is_empty());
}

#[tokio::test]
async fn test_terminal_failure_skips_entity_retries() {
    let harness = TestHarness::new();
    harness
        .automation
        .fail_login(AutomationError::Terminal("Access denied".into()));
    harness
        .scheduler
        .enqueue(NewDomainTask::new("e.example.com", harness.tenant_id))
        .await
        .unwrap();

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.dispatched, 1);

    let task = harness.task("e.example.com").await;
    assert_eq!(task.state(), DomainTaskState::Failed);
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.error_step.as_deref(), Some("login"));
}

#[tokio::test]
async fn test_active_domains_never_exceed_capacity() {
    let harness = TestHarnessBuilder::new()
        .automation(ScriptedAutomation::new().with_latency(Duration::from_millis(20)))
        .scheduler_config(fast_scheduler_config(2, 10))
        .build();
    for i in 0..6 {
        harness
            .scheduler
            .enqueue(NewDomainTask::new(
                format!("cap{i}.example.com"),
                harness.tenant_id,
            ))
            .await
            .unwrap();
    }

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.completed, 6);
    assert!(summary.peak_active <= 2);
    assert!(harness.automation.max_live_sessions() <= 2);
    assert_eq!(harness.automation.live_sessions(), 0);
}

#[tokio::test]
async fn test_at_most_one_session_per_domain() {
    let tenants: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    let harness = TestHarnessBuilder::new()
        .automation(ScriptedAutomation::new().with_latency(Duration::from_millis(10)))
        .scheduler_config(fast_scheduler_config(4, 10))
        .tenants(&tenants)
        .build();
    for (i, tenant) in tenants.iter().enumerate() {
        harness
            .scheduler
            .enqueue(NewDomainTask::new(format!("tenant{i}.example.com"), *tenant))
            .await
            .unwrap();
        harness.automation.verify_fails(&format!("tenant{i}.example.com"), 1);
    }

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.completed, 4);
    assert_eq!(harness.automation.max_live_sessions_per_tenant(), 1);
    assert!(harness.automation.max_live_sessions() <= 4);
}

#[tokio::test]
async fn test_resume_incomplete_reloads_unfinished_tasks() {
    let harness = TestHarness::new();
    let now = Utc::now();
    harness.seed("pending.example.com").await;
    harness.seed("active.example.com").await;
    harness.seed("waiting.example.com").await;
    harness.seed("done.example.com").await;
    harness
        .store
        .set_status("active.example.com", DomainTaskState::Active, now)
        .await
        .unwrap();
    harness
        .store
        .set_status("waiting.example.com", DomainTaskState::WaitingOnPropagation, now)
        .await
        .unwrap();
    harness
        .store
        .increment_retry_count("active.example.com")
        .await
        .unwrap();
    harness
        .store
        .set_status("done.example.com", DomainTaskState::Completed, now)
        .await
        .unwrap();

    let resumed = harness.scheduler.resume_incomplete().await.unwrap();
    assert_eq!(resumed, 3);
    assert_eq!(harness.scheduler.list_pending().len(), 3);

    // Crash-interrupted attempts keep their entity retry count
    let interrupted = harness.task("active.example.com").await;
    assert_eq!(interrupted.state(), DomainTaskState::WaitingOnPropagation);
    assert_eq!(interrupted.retry_count, 1);

    // Already tracked domains are not queued twice
    assert_eq!(harness.scheduler.resume_incomplete().await.unwrap(), 0);

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(harness.automation.count_for("add_domain", "done.example.com"), 0);
}

#[tokio::test]
async fn test_requeue_keeps_checkpoints_and_resets_retries() {
    let harness = TestHarnessBuilder::new()
        .scheduler_config(fast_scheduler_config(1, 1))
        .build();
    harness.automation.verify_fails("f.example.com", 3);
    harness
        .scheduler
        .enqueue(NewDomainTask::new("f.example.com", harness.tenant_id))
        .await
        .unwrap();

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.failed, 1);
    let failed = harness.task("f.example.com").await;
    assert_eq!(failed.retry_count, 1);
    assert!(failed.domain_added);

    harness.scheduler.requeue("f.example.com").await.unwrap();
    let requeued = harness.task("f.example.com").await;
    assert_eq!(requeued.state(), DomainTaskState::Pending);
    assert_eq!(requeued.retry_count, 0);
    assert!(requeued.domain_added);
    assert!(requeued.phase_error.is_none());
    assert_eq!(harness.scheduler.list_pending(), vec!["f.example.com"]);

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(harness.automation.count_for("add_domain", "f.example.com"), 1);
}

#[tokio::test]
async fn test_restart_clears_checkpoints() {
    let harness = TestHarness::new();
    harness
        .scheduler
        .enqueue(NewDomainTask::new("g.example.com", harness.tenant_id))
        .await
        .unwrap();
    harness.scheduler.run_batch().await.unwrap();
    assert!(harness.task("g.example.com").await.signing_enabled);

    harness.scheduler.restart("g.example.com").await.unwrap();
    let restarted = harness.task("g.example.com").await;
    assert_eq!(restarted.state(), DomainTaskState::Pending);
    assert!(!restarted.domain_added);
    assert!(!restarted.signing_enabled);
    assert!(restarted.ownership_token.is_none());

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(harness.automation.count_for("add_domain", "g.example.com"), 2);
}

#[tokio::test]
async fn test_reset_rejected_while_attempt_in_flight() {
    let harness = TestHarnessBuilder::new()
        .automation(ScriptedAutomation::new().with_latency(Duration::from_millis(50)))
        .build();
    harness
        .scheduler
        .enqueue(NewDomainTask::new("h.example.com", harness.tenant_id))
        .await
        .unwrap();

    let report = harness.scheduler.tick().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(harness.scheduler.list_active(), vec!["h.example.com"]);

    let err = harness.scheduler.requeue("h.example.com").await.unwrap_err();
    assert!(matches!(err, ProvisionerError::InvalidState(_)));
}

#[tokio::test]
async fn test_stop_lets_in_flight_attempts_finish() {
    let harness = TestHarnessBuilder::new()
        .automation(ScriptedAutomation::new().with_latency(Duration::from_millis(50)))
        .scheduler_config(fast_scheduler_config(1, 10))
        .build();
    for domain in ["s1.example.com", "s2.example.com", "s3.example.com"] {
        harness
            .scheduler
            .enqueue(NewDomainTask::new(domain, harness.tenant_id))
            .await
            .unwrap();
    }

    let scheduler = harness.scheduler.clone();
    let batch = tokio::spawn(async move { scheduler.run_batch().await });
    tokio::time::sleep(Duration::from_millis(15)).await;
    harness.scheduler.request_stop();

    let summary = batch.await.unwrap().unwrap();
    assert!(summary.stopped_early);
    assert_eq!(summary.completed, 1);
    assert_eq!(harness.scheduler.list_pending().len(), 2);
    assert_eq!(harness.scheduler.active_count(), 0);
    assert_eq!(harness.automation.live_sessions(), 0);
}

#[tokio::test]
async fn test_second_batch_is_rejected_while_running() {
    let harness = TestHarnessBuilder::new()
        .automation(ScriptedAutomation::new().with_latency(Duration::from_millis(30)))
        .build();
    harness
        .scheduler
        .enqueue(NewDomainTask::new("i.example.com", harness.tenant_id))
        .await
        .unwrap();

    let scheduler = harness.scheduler.clone();
    let batch = tokio::spawn(async move { scheduler.run_batch().await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    let err = harness.scheduler.run_batch().await.unwrap_err();
    assert!(matches!(err, ProvisionerError::InvalidState(_)));
    assert_eq!(batch.await.unwrap().unwrap().completed, 1);
}

#[tokio::test]
async fn test_unsaved_retry_outcome_keeps_domain_scheduled() {
    let harness = TestHarnessBuilder::new()
        .scheduler_config(slow_poll_config(10))
        .build();
    harness.automation.verify_fails("u.example.com", 3);
    harness.faults.fail_next("increment_retry_count", 1);
    harness
        .scheduler
        .enqueue(NewDomainTask::new("u.example.com", harness.tenant_id))
        .await
        .unwrap();

    let report = tick_until_finished(&harness.scheduler).await;
    assert_eq!(report.unsaved, 1);
    assert_eq!(report.parked, 0);
    assert_eq!(report.active, 0);
    assert!(!report.is_idle());
    assert_eq!(harness.scheduler.list_waiting(), vec!["u.example.com"]);

    // The row was never moved off `active` and no retry was counted
    let task = harness.task("u.example.com").await;
    assert_eq!(task.state(), DomainTaskState::Active);
    assert_eq!(task.retry_count, 0);
}

#[tokio::test]
async fn test_unsaved_outcome_is_retried_to_completion() {
    let harness = TestHarness::new();
    harness.automation.verify_fails("v.example.com", 3);
    harness.faults.fail_next("increment_retry_count", 1);
    harness
        .scheduler
        .enqueue(NewDomainTask::new("v.example.com", harness.tenant_id))
        .await
        .unwrap();

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.unsaved, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(harness.automation.count_for("verify_domain", "v.example.com"), 4);

    let task = harness.task("v.example.com").await;
    assert_eq!(task.state(), DomainTaskState::Completed);
    assert_eq!(task.retry_count, 0);
    assert!(harness.scheduler.list_waiting().is_empty());
}

#[tokio::test]
async fn test_unsaved_completion_is_retried() {
    let harness = TestHarness::new();
    harness
        .scheduler
        .enqueue(NewDomainTask::new("w.example.com", harness.tenant_id))
        .await
        .unwrap();

    let report = harness.scheduler.tick().await;
    assert_eq!(report.dispatched, 1);
    // The write that completes the row fails once
    harness.faults.fail_next("set_status", 1);

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.unsaved, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(
        harness.task("w.example.com").await.state(),
        DomainTaskState::Completed
    );
}

#[tokio::test]
async fn test_dispatch_write_failure_holds_domain() {
    let harness = TestHarness::new();
    harness.faults.fail_next("set_status", 1);
    harness
        .scheduler
        .enqueue(NewDomainTask::new("x.example.com", harness.tenant_id))
        .await
        .unwrap();

    let report = harness.scheduler.tick().await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.waiting, 1);
    assert_eq!(
        harness.task("x.example.com").await.state(),
        DomainTaskState::Pending
    );

    let summary = harness.scheduler.run_batch().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(
        harness.task("x.example.com").await.state(),
        DomainTaskState::Completed
    );
}
