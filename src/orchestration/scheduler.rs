//! # Concurrency Scheduler
//!
//! Bounded worker pool that turns queued domains into phase engine attempts.
//!
//! ## Overview
//!
//! The scheduler keeps three collections:
//!
//! - a FIFO **pending** queue of domains that have never run or were requeued,
//! - the [`PropagationWaitQueue`] of domains parked until DNS converges,
//! - the **active** map of domains currently holding a worker slot.
//!
//! Worker slots are semaphore permits, one per live automation session. A
//! domain enters the active map only while holding a permit, and the permit is
//! released only after the domain has left the map, so `active <= capacity`
//! holds at every observable point. Waiting domains hold nothing.
//!
//! ## Tick
//!
//! ```text
//! tick()
//!  ├─ drain finished attempts   persist outcome, leave active map, release permit
//!  └─ dispatch                  while a permit is free:
//!                                 pending front, else longest-waiting due domain
//! ```
//!
//! ## Full-Entity Retry
//!
//! Every attempt that ends in [`AttemptOutcome::Retry`] increments
//! `retry_count` once. Below the ceiling the domain is parked; at the ceiling
//! it is failed with the last error recorded.
//!
//! ## Unsaved Outcomes
//!
//! When the store rejects the write that records an attempt's outcome, the
//! domain is held in the wait queue and marked unsaved. Its row is still
//! `active`, so the next dispatch claims it without a transition and runs the
//! attempt again from its checkpoints.

use super::errors::{ErrorCategory, PhaseError};
use super::phase_engine::PhaseEngine;
use super::run_state::RunState;
use super::types::{AttemptOutcome, Phase};
use super::wait_queue::PropagationWaitQueue;
use crate::checkpoint::CheckpointStore;
use crate::config::SchedulerConfig;
use crate::constants::events;
use crate::error::{ProvisionerError, Result};
use crate::events::EventPublisher;
use crate::logging::log_domain_operation;
use crate::models::{DomainTask, NewDomainTask};
use crate::state_machine::{
    DomainStateMachine, DomainTaskEvent, DomainTaskState, StateMachineError,
};
use crate::validation::validate_domain_name;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Snapshot of one scheduling tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub active: usize,
    pub pending: usize,
    pub waiting: usize,
    pub dispatched: usize,
    /// Attempts whose outcome was persisted during this tick
    pub finished: usize,
    pub completed: usize,
    pub failed: usize,
    pub parked: usize,
    pub signing_deferred: usize,
    /// Attempts whose outcome could not be written and will run again
    pub unsaved: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.active == 0 && self.pending == 0 && self.waiting == 0
    }
}

/// Totals for one [`ConcurrencyScheduler::run_batch`] call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub ticks: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub parked: usize,
    pub signing_deferred: usize,
    pub unsaved: usize,
    /// Highest number of simultaneously active domains observed
    pub peak_active: usize,
    pub stopped_early: bool,
}

impl BatchSummary {
    fn absorb(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.dispatched += report.dispatched;
        self.completed += report.completed;
        self.failed += report.failed;
        self.parked += report.parked;
        self.signing_deferred += report.signing_deferred;
        self.unsaved += report.unsaved;
    }
}

/// What happened to a domain once its attempt was persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Completed { signing_deferred: bool },
    Parked,
    Failed,
    /// Outcome not persisted; held in the wait queue for another attempt
    Unsaved,
    Dropped,
}

/// A finished attempt on its way back to the scheduler, still holding its slot
struct Completion {
    domain: String,
    outcome: Result<AttemptOutcome>,
    permit: OwnedSemaphorePermit,
}

pub struct ConcurrencyScheduler {
    engine: Arc<PhaseEngine>,
    store: Arc<dyn CheckpointStore>,
    state_machine: DomainStateMachine,
    config: SchedulerConfig,
    pending: Mutex<VecDeque<String>>,
    wait_queue: PropagationWaitQueue,
    active: DashMap<String, Instant>,
    /// Domains whose row was left `active` by an unsaved outcome
    unsaved: DashSet<String>,
    slots: Arc<Semaphore>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Completion>>,
    completion_notify: Arc<Notify>,
    publisher: EventPublisher,
    run_state: Arc<RunState>,
    peak_active: AtomicUsize,
}

impl std::fmt::Debug for ConcurrencyScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyScheduler")
            .field("capacity", &self.config.capacity)
            .field("pending", &self.pending.lock().len())
            .field("waiting", &self.wait_queue.len())
            .field("active", &self.active.len())
            .finish()
    }
}

impl ConcurrencyScheduler {
    pub fn new(
        engine: Arc<PhaseEngine>,
        store: Arc<dyn CheckpointStore>,
        config: SchedulerConfig,
        run_state: Arc<RunState>,
        publisher: EventPublisher,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let capacity = config.capacity.max(1);
        Self {
            engine,
            state_machine: DomainStateMachine::new(Arc::clone(&store)),
            store,
            config,
            pending: Mutex::new(VecDeque::new()),
            wait_queue: PropagationWaitQueue::new(),
            active: DashMap::new(),
            unsaved: DashSet::new(),
            slots: Arc::new(Semaphore::new(capacity)),
            completions_tx,
            completions_rx: tokio::sync::Mutex::new(completions_rx),
            completion_notify: Arc::new(Notify::new()),
            publisher,
            run_state,
            peak_active: AtomicUsize::new(0),
        }
    }

    /// Accept a domain into the pending queue.
    ///
    /// Returns `false` when the domain already has a task; the existing row
    /// is left untouched.
    pub async fn enqueue(&self, new_task: NewDomainTask) -> Result<bool> {
        let domain = validate_domain_name(&new_task.domain_name)?;
        let created = self
            .store
            .create(NewDomainTask {
                domain_name: domain.clone(),
                ..new_task
            })
            .await?;

        if created.is_none() {
            log_domain_operation("enqueue", &domain, "duplicate", None, None);
            return Ok(false);
        }

        self.push_pending(&domain);
        log_domain_operation("enqueue", &domain, "accepted", Some(0), None);
        self.publisher
            .publish(events::DOMAIN_ENQUEUED, &domain, json!({}));
        Ok(true)
    }

    /// Persisted snapshot for one domain
    pub async fn get_status(&self, domain: &str) -> Result<Option<DomainTask>> {
        self.store.find(domain).await
    }

    /// Domains parked in the propagation wait queue, longest wait first
    pub fn list_waiting(&self) -> Vec<String> {
        self.wait_queue.list()
    }

    pub fn list_pending(&self) -> Vec<String> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn list_active(&self) -> Vec<String> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity.max(1)
    }

    pub fn wait_queue(&self) -> &PropagationWaitQueue {
        &self.wait_queue
    }

    pub fn run_state(&self) -> &Arc<RunState> {
        &self.run_state
    }

    /// Load every unfinished task persisted by an earlier process.
    ///
    /// Tasks left `active` by a crash are moved to `waiting_on_propagation`
    /// first so their entity retry count is preserved. Returns the number of
    /// domains queued.
    pub async fn resume_incomplete(&self) -> Result<usize> {
        let tasks = self
            .store
            .list_by_states(&[
                DomainTaskState::Pending,
                DomainTaskState::Active,
                DomainTaskState::WaitingOnPropagation,
            ])
            .await?;

        let mut resumed = 0;
        for task in tasks {
            let domain = task.domain_name.clone();
            if self.is_tracked(&domain) {
                continue;
            }
            if task.state() == DomainTaskState::Active {
                self.state_machine
                    .transition(&domain, DomainTaskEvent::AwaitPropagation)
                    .await?;
            }
            self.push_pending(&domain);
            resumed += 1;
            log_domain_operation(
                "resume",
                &domain,
                task.state().as_str(),
                Some(task.retry_count),
                None,
            );
        }

        info!(resumed = resumed, "🔄 SCHEDULER: Resumed incomplete domains");
        Ok(resumed)
    }

    /// Operator action: back to `pending` keeping every checkpoint
    pub async fn requeue(&self, domain: &str) -> Result<()> {
        self.reset(domain, DomainTaskEvent::Requeue, events::DOMAIN_REQUEUED)
            .await
    }

    /// Operator action: clear every checkpoint and start over
    pub async fn restart(&self, domain: &str) -> Result<()> {
        self.reset(domain, DomainTaskEvent::Restart, events::DOMAIN_RESTARTED)
            .await
    }

    async fn reset(&self, domain: &str, event: DomainTaskEvent, event_name: &str) -> Result<()> {
        if self.active.contains_key(domain) {
            return Err(ProvisionerError::InvalidState(format!(
                "{domain} has an attempt in flight"
            )));
        }

        let operation = event.event_type();
        self.state_machine.transition(domain, event).await?;
        self.wait_queue.remove(domain);
        self.unsaved.remove(domain);
        if !self.pending.lock().iter().any(|queued| queued == domain) {
            self.push_pending(domain);
        }

        log_domain_operation(operation, domain, "pending", None, None);
        self.publisher.publish(event_name, domain, json!({}));
        Ok(())
    }

    /// Ask a running batch to stop dispatching; in-flight attempts finish
    pub fn request_stop(&self) {
        info!("🛑 SCHEDULER: Stop requested");
        self.run_state.request_stop();
    }

    /// Run ticks until every queued domain is completed or failed, or until a
    /// stop is requested and the in-flight attempts have drained.
    pub async fn run_batch(&self) -> Result<BatchSummary> {
        let _guard = self.run_state.try_begin_batch().ok_or_else(|| {
            ProvisionerError::InvalidState("a batch is already running".to_string())
        })?;

        info!(
            capacity = self.capacity(),
            pending = self.pending.lock().len(),
            waiting = self.wait_queue.len(),
            "🚀 SCHEDULER: Batch started"
        );

        let mut summary = BatchSummary::default();
        loop {
            let report = self.tick().await;
            summary.absorb(&report);

            if self.run_state.stop_requested() && report.active == 0 {
                summary.stopped_early = !report.is_idle();
                break;
            }
            if report.is_idle() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval()) => {}
                _ = self.completion_notify.notified() => {}
            }
        }
        summary.peak_active = self.peak_active();

        info!(
            completed = summary.completed,
            failed = summary.failed,
            signing_deferred = summary.signing_deferred,
            stopped_early = summary.stopped_early,
            "🏁 SCHEDULER: Batch finished"
        );
        Ok(summary)
    }

    /// One scheduling pass: persist finished attempts, then fill free slots
    #[instrument(skip(self))]
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        self.drain_completions(&mut report).await;

        if !self.run_state.stop_requested() {
            report.dispatched = self.dispatch_ready().await;
        }

        report.active = self.active.len();
        report.pending = self.pending.lock().len();
        report.waiting = self.wait_queue.len();
        debug!(report = ?report, "SCHEDULER: Tick complete");
        report
    }

    async fn drain_completions(&self, report: &mut TickReport) {
        let mut receiver = self.completions_rx.lock().await;
        while let Ok(completion) = receiver.try_recv() {
            let Completion {
                domain,
                outcome,
                permit,
            } = completion;

            let disposition = self.handle_outcome(&domain, outcome).await;

            // Leave the active map before the slot becomes available again
            self.active.remove(&domain);
            drop(permit);

            report.finished += 1;
            match disposition {
                Disposition::Completed { signing_deferred } => {
                    report.completed += 1;
                    if signing_deferred {
                        report.signing_deferred += 1;
                    }
                }
                Disposition::Parked => report.parked += 1,
                Disposition::Failed => report.failed += 1,
                Disposition::Unsaved => report.unsaved += 1,
                Disposition::Dropped => {}
            }
        }
    }

    async fn dispatch_ready(&self) -> usize {
        let mut due = self
            .wait_queue
            .due(self.config.propagation_poll_interval())
            .into_iter();
        let mut dispatched = 0;

        loop {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };

            let next = self.pending.lock().pop_front().or_else(|| {
                due.by_ref()
                    .find(|domain| self.wait_queue.remove(domain).is_some())
            });
            let Some(domain) = next else {
                break;
            };

            if self.dispatch(domain, permit).await {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Move one domain into the active map and start its attempt
    async fn dispatch(&self, domain: String, permit: OwnedSemaphorePermit) -> bool {
        match self.claim(&domain).await {
            Ok(()) => {}
            Err(StateMachineError::Persistence(e)) => {
                warn!(domain = %domain, error = %e, "SCHEDULER: Dispatch not persisted, holding domain");
                self.hold_unsaved(&domain, &e);
                return false;
            }
            Err(e) => {
                warn!(domain = %domain, error = %e, "SCHEDULER: Domain cannot be dispatched, dropping");
                self.unsaved.remove(&domain);
                return false;
            }
        }

        self.active.insert(domain.clone(), Instant::now());
        self.peak_active
            .fetch_max(self.active.len(), Ordering::AcqRel);

        log_domain_operation("dispatch", &domain, "active", None, None);
        self.publisher
            .publish(events::DOMAIN_DISPATCHED, &domain, json!({}));

        let engine = Arc::clone(&self.engine);
        let completions = self.completions_tx.clone();
        let notify = Arc::clone(&self.completion_notify);
        tokio::spawn(async move {
            let outcome = engine.execute(&domain).await;
            if completions
                .send(Completion {
                    domain,
                    outcome,
                    permit,
                })
                .is_err()
            {
                debug!("Scheduler dropped before attempt finished");
            }
            notify.notify_one();
        });
        true
    }

    /// Move the persisted row to `active`. A row already `active` because its
    /// last outcome was never saved belongs to this scheduler and is reused.
    async fn claim(&self, domain: &str) -> std::result::Result<(), StateMachineError> {
        if self.unsaved.contains(domain)
            && self.state_machine.current_state(domain).await? == DomainTaskState::Active
        {
            self.unsaved.remove(domain);
            return Ok(());
        }

        self.state_machine
            .transition(domain, DomainTaskEvent::Dispatch)
            .await?;
        self.unsaved.remove(domain);
        Ok(())
    }

    /// Keep a domain whose state could not be written in the wait queue so
    /// the next due tick retries it
    fn hold_unsaved(&self, domain: &str, error: &str) {
        self.unsaved.insert(domain.to_string());
        self.wait_queue.park(domain, Phase::Login, error);
    }

    /// Persist one attempt outcome and decide where the domain goes next
    async fn handle_outcome(&self, domain: &str, outcome: Result<AttemptOutcome>) -> Disposition {
        let result = match outcome {
            Ok(AttemptOutcome::Completed { signing_deferred }) => {
                self.complete(domain, signing_deferred).await
            }
            Ok(AttemptOutcome::Retry(error)) => self.retry_or_fail(domain, error).await,
            Ok(AttemptOutcome::Terminal(error)) => self.fail(domain, error).await,
            Err(ProvisionerError::NotFound(_)) => {
                warn!(domain = %domain, "SCHEDULER: Task disappeared during attempt");
                Ok(Disposition::Dropped)
            }
            Err(e) => {
                // The store could not be read; wait a poll interval without
                // spending an entity retry
                warn!(domain = %domain, error = %e, "SCHEDULER: Attempt could not start, parking");
                self.park(domain, PhaseError::transient(Phase::Login, e.to_string()))
                    .await
            }
        };

        match result {
            Ok(disposition) => disposition,
            Err(ProvisionerError::NotFound(_)) => {
                warn!(domain = %domain, "SCHEDULER: Task disappeared while saving outcome");
                Disposition::Dropped
            }
            Err(e) => {
                error!(domain = %domain, error = %e, "SCHEDULER: Failed to persist attempt outcome, holding domain");
                self.hold_unsaved(domain, &e.to_string());
                Disposition::Unsaved
            }
        }
    }

    async fn complete(&self, domain: &str, signing_deferred: bool) -> Result<Disposition> {
        self.state_machine
            .transition(domain, DomainTaskEvent::Complete)
            .await?;

        let details = signing_deferred.then_some("signing activation deferred");
        log_domain_operation("complete", domain, "completed", None, details);
        self.publisher.publish(
            events::DOMAIN_COMPLETED,
            domain,
            json!({ "signing_deferred": signing_deferred }),
        );
        Ok(Disposition::Completed { signing_deferred })
    }

    async fn retry_or_fail(&self, domain: &str, error: PhaseError) -> Result<Disposition> {
        let retry_count = self.store.increment_retry_count(domain).await?;

        if retry_count >= self.config.max_entity_retries {
            warn!(
                domain = %domain,
                retry_count = retry_count,
                error = %error,
                "❌ SCHEDULER: Full-entity retry budget exhausted"
            );
            return self
                .fail(domain, error.with_category(ErrorCategory::EntityExhausted))
                .await;
        }

        log_domain_operation(
            "park",
            domain,
            "waiting_on_propagation",
            Some(retry_count),
            Some(error.message.as_str()),
        );
        self.park(domain, error).await
    }

    async fn park(&self, domain: &str, error: PhaseError) -> Result<Disposition> {
        self.state_machine
            .transition(domain, DomainTaskEvent::AwaitPropagation)
            .await?;
        self.wait_queue.park(domain, error.phase, error.message.clone());
        self.publisher.publish(
            events::DOMAIN_WAITING,
            domain,
            json!({ "phase": error.phase.as_str(), "error": error.message }),
        );
        Ok(Disposition::Parked)
    }

    async fn fail(&self, domain: &str, error: PhaseError) -> Result<Disposition> {
        self.store
            .record_failure(domain, error.phase.as_str(), &error.message)
            .await?;
        self.state_machine
            .transition(domain, DomainTaskEvent::fail_with_error(error.message.clone()))
            .await?;

        error!(
            domain = %domain,
            phase = %error.phase,
            category = %error.category,
            error = %error.message,
            "❌ SCHEDULER: Domain failed"
        );
        self.publisher.publish(
            events::DOMAIN_FAILED,
            domain,
            json!({
                "phase": error.phase.as_str(),
                "category": error.category,
                "error": error.message,
            }),
        );
        Ok(Disposition::Failed)
    }

    fn push_pending(&self, domain: &str) {
        self.pending.lock().push_back(domain.to_string());
    }

    fn is_tracked(&self, domain: &str) -> bool {
        self.active.contains_key(domain)
            || self.wait_queue.contains(domain)
            || self.pending.lock().iter().any(|queued| queued == domain)
    }
}
