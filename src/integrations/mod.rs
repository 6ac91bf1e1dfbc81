//! # External Collaborators
//!
//! Capability interfaces the provisioning core consumes but does not
//! implement: the administration console driver, the DNS hosting API and the
//! credential source owned by the surrounding CRUD layer. Any concrete driver
//! (headless browser, recorded macro, vendor API) can satisfy
//! [`AutomationSession`] without changes to the engine.

pub mod automation;
pub mod credentials;
pub mod dns;

pub use automation::{
    AddDomainOutcome, AutomationError, AutomationSession, LoginOutcome, MailRecords,
    SessionHandle, SigningCnames,
};
pub use credentials::{CredentialSource, StaticCredentialSource};
pub use dns::{DnsError, DnsProvider, DnsRecord, DnsRecordType};
