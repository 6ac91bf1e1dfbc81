//! # Structured Logging Module
//!
//! Environment-aware structured logging for long-running provisioning batches,
//! where one domain's phases interleave with many others in the same log.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging from configuration.
///
/// `RUST_LOG` takes precedence over `config.level`. Safe to call more than
/// once; only the first call installs a subscriber.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A subscriber may already be installed by the embedding application
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing");
        }

        tracing::info!(
            pid = std::process::id(),
            json = config.json,
            level = %config.level,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log structured data for a phase execution
pub fn log_phase_operation(
    domain: &str,
    phase: &str,
    attempt: u32,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        domain = %domain,
        phase = %phase,
        attempt = attempt,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 PHASE_OPERATION"
    );
}

/// Log structured data for a domain-level lifecycle operation
pub fn log_domain_operation(
    operation: &str,
    domain: &str,
    status: &str,
    retry_count: Option<i32>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        domain = %domain,
        status = %status,
        retry_count = retry_count,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 DOMAIN_OPERATION"
    );
}
