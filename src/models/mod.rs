//! # Data Models
//!
//! Persisted provisioning state and the credential input consumed by login.

pub mod domain_task;
pub mod tenant_credential;

pub use domain_task::{Checkpoint, DomainTask, NewDomainTask, SigningRetryEligibility};
pub use tenant_credential::TenantCredential;
