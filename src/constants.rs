//! # System Constants
//!
//! Named defaults for every wait and retry policy in the provisioning core,
//! plus the lifecycle event names published by the scheduler and reconciler.
//!
//! Nothing outside [`crate::config`] should read the `defaults` values
//! directly; components receive their policy through configuration so that
//! wait behaviour stays in one place.

/// Default policy values used when configuration omits a field
pub mod defaults {
    /// Attempts per phase before the engine reports a phase failure
    pub const PHASE_MAX_ATTEMPTS: u32 = 3;
    /// Attempts per individual console interaction
    pub const SUBSTEP_MAX_ATTEMPTS: u32 = 3;
    /// Fixed delay between console interaction attempts
    pub const SUBSTEP_DELAY_MS: u64 = 2_000;
    /// Upper bound on a single phase attempt
    pub const PHASE_TIMEOUT_SECONDS: u64 = 180;
    /// Settle interval after publishing the ownership-proof record
    pub const VERIFICATION_SETTLE_SECONDS: u64 = 30;
    /// Settle interval after publishing the signing CNAMEs
    pub const SIGNING_SETTLE_SECONDS: u64 = 60;

    /// Simultaneously live automation sessions in the foreground pool
    pub const SCHEDULER_CAPACITY: usize = 2;
    /// Scheduler loop cadence
    pub const SCHEDULER_TICK_INTERVAL_MS: u64 = 1_000;
    /// Minimum time a domain stays parked before verification is retried
    pub const PROPAGATION_POLL_INTERVAL_SECONDS: u64 = 120;
    /// Full-entity attempts before a domain is marked failed
    pub const MAX_ENTITY_RETRIES: i32 = 10;

    /// Reconciliation cadence
    pub const RECONCILE_INTERVAL_SECONDS: u64 = 600;
    /// How long after verification signing activation keeps being retried
    pub const RECONCILE_RETRY_WINDOW_HOURS: i64 = 24;
    /// Minimum spacing between signing retries for one domain
    pub const RECONCILE_MIN_RETRY_SPACING_MINUTES: i64 = 15;

    /// DNS labels for the two provider-issued signing selectors
    pub const SIGNING_SELECTOR1_LABEL: &str = "selector1._domainkey";
    pub const SIGNING_SELECTOR2_LABEL: &str = "selector2._domainkey";

    pub const DATABASE_MAX_CONNECTIONS: u32 = 5;
    pub const DATABASE_ACQUIRE_TIMEOUT_SECONDS: u64 = 30;

    pub const EVENT_CHANNEL_CAPACITY: usize = 1_000;
}

/// Lifecycle events published on the [`crate::events::EventPublisher`]
pub mod events {
    pub const DOMAIN_ENQUEUED: &str = "domain.enqueued";
    pub const DOMAIN_DISPATCHED: &str = "domain.dispatched";
    pub const DOMAIN_PHASE_COMPLETED: &str = "domain.phase_completed";
    pub const DOMAIN_WAITING: &str = "domain.waiting";
    pub const DOMAIN_COMPLETED: &str = "domain.completed";
    pub const DOMAIN_FAILED: &str = "domain.failed";
    pub const DOMAIN_REQUEUED: &str = "domain.requeued";
    pub const DOMAIN_RESTARTED: &str = "domain.restarted";
    pub const DOMAIN_SIGNING_ENABLED: &str = "domain.signing_enabled";
    pub const DOMAIN_SIGNING_RETRY_FAILED: &str = "domain.signing_retry_failed";
}

/// Persisted table name for domain tasks
pub const DOMAIN_TASKS_TABLE: &str = "provisioner_domain_tasks";
