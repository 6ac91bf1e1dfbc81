//! # Provisioner Configuration
//!
//! Typed configuration for the provisioning core. Every wait and retry policy
//! the engine, scheduler and reconciler use is a field here; components take
//! durations from these structs rather than embedding their own sleeps.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use provisioner_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let capacity = manager.config().scheduler.capacity;
//! let poll = manager.config().scheduler.propagation_poll_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/provisioner.yaml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Checkpoint store connection settings
    pub database: DatabaseConfig,

    /// Phase engine retry and settle policy
    pub engine: EngineConfig,

    /// Foreground worker pool and wait queue policy
    pub scheduler: SchedulerConfig,

    /// Background signing reconciliation policy
    pub reconciliation: ReconciliationConfig,

    /// Structured logging settings
    pub logging: LoggingConfig,
}

impl ProvisionerConfig {
    /// Reject configurations the scheduler or engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.capacity",
                self.scheduler.capacity,
                "at least one worker slot is required",
            ));
        }
        if self.engine.phase_max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.phase_max_attempts",
                self.engine.phase_max_attempts,
                "must be at least 1",
            ));
        }
        if self.engine.substep_max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.substep_max_attempts",
                self.engine.substep_max_attempts,
                "must be at least 1",
            ));
        }
        if self.scheduler.max_entity_retries < 1 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_entity_retries",
                self.scheduler.max_entity_retries,
                "must be at least 1",
            ));
        }
        if self.scheduler.propagation_poll_interval() < self.scheduler.tick_interval() {
            return Err(ConfigurationError::invalid_value(
                "scheduler.propagation_poll_interval_seconds",
                self.scheduler.propagation_poll_interval_seconds,
                "poll interval must not be shorter than the tick interval",
            ));
        }
        if self.reconciliation.retry_window_hours < 0
            || self.reconciliation.min_retry_spacing_minutes < 0
        {
            return Err(ConfigurationError::invalid_value(
                "reconciliation",
                format!(
                    "window={}h spacing={}m",
                    self.reconciliation.retry_window_hours,
                    self.reconciliation.min_retry_spacing_minutes
                ),
                "durations must not be negative",
            ));
        }
        Ok(())
    }
}

/// Postgres connection settings for the checkpoint store
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: defaults::DATABASE_MAX_CONNECTIONS,
            acquire_timeout_seconds: defaults::DATABASE_ACQUIRE_TIMEOUT_SECONDS,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL, falling back to `DATABASE_URL`
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Phase engine policy: the two inner retry layers and the settle intervals
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub phase_max_attempts: u32,
    pub substep_max_attempts: u32,
    pub substep_delay_ms: u64,
    pub phase_timeout_seconds: u64,
    pub verification_settle_seconds: u64,
    pub signing_settle_seconds: u64,
    pub signing_selector1_label: String,
    pub signing_selector2_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase_max_attempts: defaults::PHASE_MAX_ATTEMPTS,
            substep_max_attempts: defaults::SUBSTEP_MAX_ATTEMPTS,
            substep_delay_ms: defaults::SUBSTEP_DELAY_MS,
            phase_timeout_seconds: defaults::PHASE_TIMEOUT_SECONDS,
            verification_settle_seconds: defaults::VERIFICATION_SETTLE_SECONDS,
            signing_settle_seconds: defaults::SIGNING_SETTLE_SECONDS,
            signing_selector1_label: defaults::SIGNING_SELECTOR1_LABEL.to_string(),
            signing_selector2_label: defaults::SIGNING_SELECTOR2_LABEL.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn substep_delay(&self) -> Duration {
        Duration::from_millis(self.substep_delay_ms)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_seconds)
    }

    pub fn verification_settle(&self) -> Duration {
        Duration::from_secs(self.verification_settle_seconds)
    }

    pub fn signing_settle(&self) -> Duration {
        Duration::from_secs(self.signing_settle_seconds)
    }
}

/// Foreground scheduler policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hard ceiling on simultaneously live automation sessions
    pub capacity: usize,
    pub tick_interval_ms: u64,
    pub propagation_poll_interval_seconds: u64,
    pub max_entity_retries: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::SCHEDULER_CAPACITY,
            tick_interval_ms: defaults::SCHEDULER_TICK_INTERVAL_MS,
            propagation_poll_interval_seconds: defaults::PROPAGATION_POLL_INTERVAL_SECONDS,
            max_entity_retries: defaults::MAX_ENTITY_RETRIES,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn propagation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.propagation_poll_interval_seconds)
    }
}

/// Background signing reconciliation policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub retry_window_hours: i64,
    pub min_retry_spacing_minutes: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: defaults::RECONCILE_INTERVAL_SECONDS,
            retry_window_hours: defaults::RECONCILE_RETRY_WINDOW_HOURS,
            min_retry_spacing_minutes: defaults::RECONCILE_MIN_RETRY_SPACING_MINUTES,
        }
    }
}

impl ReconciliationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn retry_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retry_window_hours)
    }

    pub fn min_retry_spacing(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.min_retry_spacing_minutes)
    }
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
