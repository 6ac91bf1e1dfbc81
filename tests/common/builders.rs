use super::mocks::{FaultyCheckpointStore, RecordingDnsProvider, ScriptedAutomation};
use provisioner_core::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use provisioner_core::config::{EngineConfig, ReconciliationConfig, SchedulerConfig};
use provisioner_core::events::EventPublisher;
use provisioner_core::integrations::StaticCredentialSource;
use provisioner_core::models::{DomainTask, NewDomainTask, TenantCredential};
use provisioner_core::orchestration::{
    ConcurrencyScheduler, PhaseEngine, RunState, SigningReconciler,
};
use std::sync::Arc;
use uuid::Uuid;

/// Engine policy with every delay removed
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        phase_max_attempts: 3,
        substep_max_attempts: 2,
        substep_delay_ms: 0,
        phase_timeout_seconds: 5,
        verification_settle_seconds: 0,
        signing_settle_seconds: 0,
        ..EngineConfig::default()
    }
}

/// Scheduler policy that re-polls parked domains immediately
pub fn fast_scheduler_config(capacity: usize, max_entity_retries: i32) -> SchedulerConfig {
    SchedulerConfig {
        capacity,
        tick_interval_ms: 5,
        propagation_poll_interval_seconds: 0,
        max_entity_retries,
    }
}

pub fn reconciliation_config() -> ReconciliationConfig {
    ReconciliationConfig {
        enabled: true,
        interval_seconds: 1,
        retry_window_hours: 24,
        min_retry_spacing_minutes: 15,
    }
}

/// Every component wired around the in-memory store and the scripted mocks
pub struct TestHarness {
    pub tenant_id: Uuid,
    pub automation: Arc<ScriptedAutomation>,
    pub dns: Arc<RecordingDnsProvider>,
    pub credentials: Arc<StaticCredentialSource>,
    pub store: Arc<InMemoryCheckpointStore>,
    /// The store every component writes through; wraps `store`
    pub faults: Arc<FaultyCheckpointStore>,
    pub run_state: Arc<RunState>,
    pub publisher: EventPublisher,
    pub engine: Arc<PhaseEngine>,
    pub scheduler: Arc<ConcurrencyScheduler>,
    pub reconciler: Arc<SigningReconciler>,
}

pub struct TestHarnessBuilder {
    automation: ScriptedAutomation,
    engine_config: EngineConfig,
    scheduler_config: SchedulerConfig,
    reconciliation_config: ReconciliationConfig,
    extra_tenants: Vec<Uuid>,
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self {
            automation: ScriptedAutomation::new(),
            engine_config: fast_engine_config(),
            scheduler_config: fast_scheduler_config(2, 10),
            reconciliation_config: reconciliation_config(),
            extra_tenants: Vec::new(),
        }
    }
}

impl TestHarnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn automation(mut self, automation: ScriptedAutomation) -> Self {
        self.automation = automation;
        self
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    pub fn reconciliation_config(mut self, config: ReconciliationConfig) -> Self {
        self.reconciliation_config = config;
        self
    }

    /// Register credentials for additional tenants
    pub fn tenants(mut self, tenants: &[Uuid]) -> Self {
        self.extra_tenants.extend_from_slice(tenants);
        self
    }

    pub fn build(self) -> TestHarness {
        let tenant_id = Uuid::new_v4();
        let credentials = Arc::new(StaticCredentialSource::new());
        for tenant in std::iter::once(tenant_id).chain(self.extra_tenants) {
            credentials.insert(TenantCredential::new(
                tenant,
                format!("admin@{}.example", tenant.simple()),
                "initial-password",
            ));
        }

        let automation = Arc::new(self.automation);
        let dns = Arc::new(RecordingDnsProvider::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let faults = Arc::new(FaultyCheckpointStore::new(Arc::clone(&store)));
        let run_state = RunState::new();
        let publisher = EventPublisher::new(256);

        let engine = Arc::new(
            PhaseEngine::new(
                automation.clone(),
                dns.clone(),
                credentials.clone(),
                faults.clone(),
                self.engine_config.clone(),
            )
            .with_publisher(publisher.clone()),
        );
        let scheduler = Arc::new(ConcurrencyScheduler::new(
            Arc::clone(&engine),
            faults.clone(),
            self.scheduler_config,
            Arc::clone(&run_state),
            publisher.clone(),
        ));
        let reconciler = Arc::new(
            SigningReconciler::new(
                automation.clone(),
                credentials.clone(),
                faults.clone(),
                Arc::clone(&run_state),
                self.reconciliation_config,
                &self.engine_config,
            )
            .with_publisher(publisher.clone()),
        );

        TestHarness {
            tenant_id,
            automation,
            dns,
            credentials,
            store,
            faults,
            run_state,
            publisher,
            engine,
            scheduler,
            reconciler,
        }
    }
}

impl TestHarness {
    pub fn new() -> Self {
        TestHarnessBuilder::new().build()
    }

    /// Insert a fresh task for the default tenant directly into the store
    pub async fn seed(&self, domain: &str) -> DomainTask {
        self.store
            .create(NewDomainTask::new(domain, self.tenant_id))
            .await
            .expect("store write")
            .expect("domain not yet seeded")
    }

    pub async fn task(&self, domain: &str) -> DomainTask {
        self.store
            .find(domain)
            .await
            .expect("store read")
            .expect("task exists")
    }
}
