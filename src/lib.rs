#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Provisioner Core
//!
//! Checkpointed orchestration engine for provisioning custom email domains in
//! hosted identity tenants.
//!
//! ## Overview
//!
//! Provisioning one domain means adding it to the tenant, proving ownership
//! through a DNS challenge, publishing mail-routing records and enabling
//! message signing. The console that performs most of this has no stable API
//! and DNS propagation takes minutes, so every step is checkpointed, retried
//! at three layers and resumable after a crash.
//!
//! ## Module Organization
//!
//! - [`integrations`] - Console automation, DNS provider and credential interfaces
//! - [`models`] - Domain task row and tenant credential
//! - [`checkpoint`] - Durable checkpoint store (Postgres and in-memory)
//! - [`state_machine`] - Domain task lifecycle
//! - [`orchestration`] - Phase engine, scheduler, wait queue and reconciler
//! - [`config`] - Configuration management
//! - [`events`] - Lifecycle event broadcasting
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use provisioner_core::checkpoint::InMemoryCheckpointStore;
//! use provisioner_core::config::ProvisionerConfig;
//! use provisioner_core::models::NewDomainTask;
//! use provisioner_core::orchestration::{Collaborators, ProvisioningSystem};
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let system = ProvisioningSystem::from_parts(
//!     ProvisionerConfig::default(),
//!     Arc::new(InMemoryCheckpointStore::new()),
//!     collaborators,
//! )?;
//!
//! system
//!     .scheduler()
//!     .enqueue(NewDomainTask::new("example.com", Uuid::new_v4()))
//!     .await?;
//! let summary = system.scheduler().run_batch().await?;
//! println!("completed: {}", summary.completed);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod integrations;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod validation;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, PgCheckpointStore};
pub use config::{ConfigManager, ProvisionerConfig};
pub use error::{ProvisionerError, Result};
pub use models::{Checkpoint, DomainTask, NewDomainTask, TenantCredential};
pub use orchestration::{
    AttemptOutcome, ConcurrencyScheduler, Phase, PhaseEngine, ProvisioningSystem,
    SigningReconciler,
};
pub use state_machine::{DomainTaskEvent, DomainTaskState};
