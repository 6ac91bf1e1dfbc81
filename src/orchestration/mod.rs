//! # Orchestration Engine
//!
//! Checkpointed provisioning of custom email domains.
//!
//! ## Core Components
//!
//! - **PhaseEngine**: runs the ordered phase list for one domain, skipping
//!   phases whose checkpoint is already set, with sub-step and phase retry
//! - **PropagationWaitQueue**: domains waiting for DNS convergence; they hold
//!   no worker slot while parked
//! - **ConcurrencyScheduler**: bounded worker pool and the full-entity retry
//!   layer
//! - **SigningReconciler**: background retry of deferred signing activation,
//!   mutually exclusive with a running batch
//! - **RunState**: process-wide batch and shutdown flags shared by the two
//! - **ProvisioningSystem**: bootstrap and lifecycle for all of the above
//!
//! ## Data Flow
//!
//! ```text
//! enqueue ─▶ pending ─▶ [slot] PhaseEngine ─┬─ Completed ─▶ completed
//!              ▲                            ├─ Retry ─────▶ wait queue ─(poll)─┐
//!              │                            │               or failed at ceiling│
//!              │                            └─ Terminal ──▶ failed              │
//!              └─────────────────────────────────────────────────────────────────┘
//!
//! SigningReconciler (every interval, unless a batch is running)
//!   signing_cnames_added && !signing_enabled && within window ─▶ enable_signing
//! ```

pub mod bootstrap;
pub mod error_classifier;
pub mod errors;
pub mod phase_engine;
pub mod reconciler;
pub mod retry;
pub mod run_state;
pub mod scheduler;
pub mod types;
pub mod wait_queue;

pub use bootstrap::{BootstrapConfig, Collaborators, ProvisioningSystem};
pub use error_classifier::{ErrorClassifier, StandardErrorClassifier};
pub use errors::{ErrorCategory, PhaseError};
pub use phase_engine::PhaseEngine;
pub use reconciler::{ReconcileReport, SigningReconciler};
pub use retry::{retry_substep, retry_substep_until, RetryPolicy};
pub use run_state::{BatchGuard, RunState};
pub use scheduler::{BatchSummary, ConcurrencyScheduler, TickReport};
pub use types::{AttemptOutcome, Phase};
pub use wait_queue::{PropagationWaitQueue, WaitEntry};
