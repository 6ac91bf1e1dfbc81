//! DNS hosting provider interface.
//!
//! All `ensure_*` operations are idempotent: create when missing, leave alone
//! when already correct, and replace conflicting same-purpose records. The
//! returned [`DnsRecord`] is the provider's view after the call and serves as
//! the read-back the engine checks before setting a checkpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    Txt,
    Mx,
    Cname,
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Txt => write!(f, "TXT"),
            Self::Mx => write!(f, "MX"),
            Self::Cname => write!(f, "CNAME"),
        }
    }
}

/// A record as the provider currently holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub record_type: DnsRecordType,
    /// Record name relative to the zone apex (`@` for the apex)
    pub name: String,
    pub content: String,
    pub priority: Option<u16>,
}

impl DnsRecord {
    pub fn new(record_type: DnsRecordType, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            record_type,
            name: name.into(),
            content: content.into(),
            priority: None,
        }
    }

    /// Compare the reported content with what was written. TXT values must
    /// match exactly apart from surrounding quotes; MX and CNAME targets are
    /// hostnames and also ignore case and a trailing dot.
    pub fn has_content(&self, expected: &str) -> bool {
        match self.record_type {
            DnsRecordType::Txt => unquote(&self.content) == unquote(expected),
            DnsRecordType::Mx | DnsRecordType::Cname => {
                normalize_hostname(&self.content) == normalize_hostname(expected)
            }
        }
    }
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches('"')
}

fn normalize_hostname(value: &str) -> String {
    unquote(value).trim_end_matches('.').to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    /// Rate limiting, 5xx responses, network failures
    #[error("DNS provider request failed: {0}")]
    Transient(String),

    #[error("No hosted zone found for {0}")]
    ZoneNotFound(String),

    #[error("DNS provider rejected the record: {0}")]
    Rejected(String),

    #[error("DNS provider refused credentials: {0}")]
    Unauthorized(String),
}

impl DnsError {
    /// Errors that no amount of retrying will fix
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ZoneNotFound(_) | Self::Unauthorized(_))
    }
}

/// DNS record management consumed by the phase engine
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Resolve the hosted zone for a domain
    async fn zone_id(&self, domain: &str) -> Result<String, DnsError>;

    /// Ownership-proof TXT record at the apex
    async fn ensure_txt(&self, zone_id: &str, value: &str) -> Result<DnsRecord, DnsError>;

    async fn ensure_mx(&self, zone_id: &str, target: &str) -> Result<DnsRecord, DnsError>;

    /// Sender-policy TXT record at the apex; replaces any other SPF record
    async fn ensure_txt_spf(&self, zone_id: &str, value: &str) -> Result<DnsRecord, DnsError>;

    async fn ensure_cname(
        &self,
        zone_id: &str,
        label: &str,
        target: &str,
    ) -> Result<DnsRecord, DnsError>;
}
