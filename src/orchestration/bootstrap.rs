//! # Provisioning System Bootstrap
//!
//! Wires the process-wide state object described by the orchestration module:
//! configuration, logging, checkpoint store, phase engine, scheduler and
//! reconciler, all created once and handed out by reference.
//!
//! Two entry points:
//!
//! - [`ProvisioningSystem::bootstrap`] loads configuration from disk and the
//!   environment, connects to Postgres and runs migrations.
//! - [`ProvisioningSystem::from_parts`] takes an already-built store and
//!   configuration, for embedding and tests. The configuration is validated
//!   the same way the loader validates it.

use super::phase_engine::PhaseEngine;
use super::reconciler::SigningReconciler;
use super::run_state::RunState;
use super::scheduler::ConcurrencyScheduler;
use crate::checkpoint::{CheckpointStore, PgCheckpointStore};
use crate::config::{ConfigManager, ConfigResult, ProvisionerConfig};
use crate::constants::defaults::EVENT_CHANNEL_CAPACITY;
use crate::events::EventPublisher;
use crate::integrations::{AutomationSession, CredentialSource, DnsProvider};
use crate::logging::init_structured_logging;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// External collaborators supplied by the embedding application
#[derive(Clone)]
pub struct Collaborators {
    pub automation: Arc<dyn AutomationSession>,
    pub dns: Arc<dyn DnsProvider>,
    pub credentials: Arc<dyn CredentialSource>,
}

/// Bootstrap configuration for the provisioning system
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// Custom configuration directory (None = auto-detect)
    pub config_directory: Option<PathBuf>,
    /// Environment override (None = auto-detect)
    pub environment_override: Option<String>,
    /// Start the background reconciler immediately
    pub start_reconciler: bool,
    /// Reload unfinished tasks from the store into the pending queue
    pub resume_incomplete: bool,
}

impl BootstrapConfig {
    pub fn for_service() -> Self {
        Self {
            start_reconciler: true,
            resume_incomplete: true,
            ..Self::default()
        }
    }
}

/// Process-wide provisioning state with explicit lifecycle
pub struct ProvisioningSystem {
    config: ProvisionerConfig,
    store: Arc<dyn CheckpointStore>,
    scheduler: Arc<ConcurrencyScheduler>,
    reconciler: Arc<SigningReconciler>,
    run_state: Arc<RunState>,
    publisher: EventPublisher,
    reconciler_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ProvisioningSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningSystem")
            .field("scheduler", &self.scheduler)
            .field("reconciler_running", &self.reconciler_handle.is_some())
            .finish_non_exhaustive()
    }
}

impl ProvisioningSystem {
    /// Load configuration, connect to the database and build every component
    pub async fn bootstrap(
        collaborators: Collaborators,
        bootstrap_config: BootstrapConfig,
    ) -> anyhow::Result<Self> {
        let config_manager = match &bootstrap_config.environment_override {
            Some(env) => ConfigManager::load_from_directory_with_env(
                bootstrap_config.config_directory.clone(),
                env,
            ),
            None => ConfigManager::load_from_directory(bootstrap_config.config_directory.clone()),
        }
        .context("failed to load provisioner configuration")?;

        let config = config_manager.config().clone();
        init_structured_logging(&config.logging);
        info!(
            environment = config_manager.environment(),
            "🚀 BOOTSTRAP: Configuration loaded"
        );

        let database_url = config
            .database
            .database_url()
            .context("no database url configured (database.url or DATABASE_URL)")?;
        let store = PgCheckpointStore::connect(
            &database_url,
            config.database.max_connections,
            config.database.acquire_timeout(),
        )
        .await
        .context("failed to connect to the checkpoint database")?;
        store
            .migrate()
            .await
            .context("failed to run checkpoint store migrations")?;
        info!("✅ BOOTSTRAP: Checkpoint store ready");

        let mut system = Self::from_parts(config, Arc::new(store), collaborators)
            .context("invalid provisioner configuration")?;

        if bootstrap_config.resume_incomplete {
            let resumed = system
                .scheduler
                .resume_incomplete()
                .await
                .context("failed to resume incomplete domains")?;
            info!(resumed = resumed, "✅ BOOTSTRAP: Incomplete domains resumed");
        }
        if bootstrap_config.start_reconciler {
            system.start_reconciler();
        }

        Ok(system)
    }

    /// Build every component around an existing store
    pub fn from_parts(
        config: ProvisionerConfig,
        store: Arc<dyn CheckpointStore>,
        collaborators: Collaborators,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let run_state = RunState::new();
        let publisher = EventPublisher::new(EVENT_CHANNEL_CAPACITY);

        let engine = Arc::new(
            PhaseEngine::new(
                Arc::clone(&collaborators.automation),
                Arc::clone(&collaborators.dns),
                Arc::clone(&collaborators.credentials),
                Arc::clone(&store),
                config.engine.clone(),
            )
            .with_publisher(publisher.clone()),
        );

        let scheduler = Arc::new(ConcurrencyScheduler::new(
            engine,
            Arc::clone(&store),
            config.scheduler.clone(),
            Arc::clone(&run_state),
            publisher.clone(),
        ));

        let reconciler = Arc::new(
            SigningReconciler::new(
                collaborators.automation,
                collaborators.credentials,
                Arc::clone(&store),
                Arc::clone(&run_state),
                config.reconciliation.clone(),
                &config.engine,
            )
            .with_publisher(publisher.clone()),
        );

        Ok(Self {
            config,
            store,
            scheduler,
            reconciler,
            run_state,
            publisher,
            reconciler_handle: None,
        })
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<ConcurrencyScheduler> {
        &self.scheduler
    }

    pub fn reconciler(&self) -> &Arc<SigningReconciler> {
        &self.reconciler
    }

    pub fn run_state(&self) -> &Arc<RunState> {
        &self.run_state
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Spawn the background reconciler; no-op if already running
    pub fn start_reconciler(&mut self) {
        if self.reconciler_handle.is_some() {
            warn!("Background reconciler already running");
            return;
        }
        self.reconciler_handle = Some(Arc::clone(&self.reconciler).spawn());
    }

    /// Stop dispatching, stop the reconciler and wait for it to exit
    pub async fn shutdown(&mut self) {
        info!("🛑 BOOTSTRAP: Shutdown requested");
        self.run_state.request_shutdown();
        if let Some(handle) = self.reconciler_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background reconciler did not exit cleanly");
            }
        }
    }
}
