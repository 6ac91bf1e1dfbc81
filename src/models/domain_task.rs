//! # Domain Task Model
//!
//! One provisioning attempt over the lifetime of a custom email domain.
//!
//! ## Overview
//!
//! A `DomainTask` carries five monotonic checkpoint flags, the values captured
//! from the administration console mid-flow, and the retry bookkeeping for the
//! full-entity and signing-reconciliation layers. The phase engine reads the
//! flags to skip confirmed work; the reconciler reads and writes the same row.
//!
//! ## Database Schema
//!
//! Maps to the `provisioner_domain_tasks` table, one row per domain:
//! - `domain_name`: natural key (TEXT, unique)
//! - `domain_added` .. `signing_enabled`: checkpoint flags (BOOLEAN)
//! - `ownership_token`, `mx_target`, `spf_value`, `signing_cname_selector1`,
//!   `signing_cname_selector2`: captured values, persisted on acquisition
//! - `retry_count`: full-entity attempts, `signing_retry_count`: reconciler attempts
//! - `status`: persisted lifecycle, see [`DomainTaskState`]

use crate::state_machine::DomainTaskState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Persisted provisioning state for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DomainTask {
    pub domain_task_uuid: Uuid,
    pub domain_name: String,
    pub tenant_id: Uuid,
    pub dns_zone_id: Option<String>,
    pub status: String,

    pub domain_added: bool,
    pub domain_verified: bool,
    pub dns_configured: bool,
    pub signing_cnames_added: bool,
    pub signing_enabled: bool,

    pub ownership_token: Option<String>,
    pub mx_target: Option<String>,
    pub spf_value: Option<String>,
    pub signing_cname_selector1: Option<String>,
    pub signing_cname_selector2: Option<String>,

    pub retry_count: i32,
    pub signing_retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub phase_error: Option<String>,
    pub error_step: Option<String>,

    pub verified_at: Option<DateTime<Utc>>,
    pub signing_enabled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New domain task for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDomainTask {
    pub domain_name: String,
    pub tenant_id: Uuid,
    /// Hosting zone, when the caller already knows it
    pub dns_zone_id: Option<String>,
}

impl NewDomainTask {
    pub fn new(domain_name: impl Into<String>, tenant_id: Uuid) -> Self {
        Self {
            domain_name: domain_name.into(),
            tenant_id,
            dns_zone_id: None,
        }
    }

    pub fn with_zone_id(mut self, zone_id: impl Into<String>) -> Self {
        self.dns_zone_id = Some(zone_id.into());
        self
    }
}

/// Checkpoint flags, each gating one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    DomainAdded,
    DomainVerified,
    DnsConfigured,
    SigningCnamesAdded,
    SigningEnabled,
}

impl Checkpoint {
    /// Column backing this flag
    pub fn column(&self) -> &'static str {
        match self {
            Self::DomainAdded => "domain_added",
            Self::DomainVerified => "domain_verified",
            Self::DnsConfigured => "dns_configured",
            Self::SigningCnamesAdded => "signing_cnames_added",
            Self::SigningEnabled => "signing_enabled",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Whether the reconciler may retry signing activation for a task right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningRetryEligibility {
    Eligible,
    /// Signing already enabled or CNAMEs not yet published
    NotApplicable,
    /// Last attempt is more recent than the minimum spacing
    TooSoon,
    /// Verification is older than the retry window
    WindowExpired,
}

impl DomainTask {
    /// Build an unsaved row with all checkpoints cleared
    pub fn from_new(new_task: NewDomainTask, now: DateTime<Utc>) -> Self {
        Self {
            domain_task_uuid: Uuid::new_v4(),
            domain_name: new_task.domain_name,
            tenant_id: new_task.tenant_id,
            dns_zone_id: new_task.dns_zone_id,
            status: DomainTaskState::Pending.to_string(),
            domain_added: false,
            domain_verified: false,
            dns_configured: false,
            signing_cnames_added: false,
            signing_enabled: false,
            ownership_token: None,
            mx_target: None,
            spf_value: None,
            signing_cname_selector1: None,
            signing_cname_selector2: None,
            retry_count: 0,
            signing_retry_count: 0,
            last_retry_at: None,
            phase_error: None,
            error_step: None,
            verified_at: None,
            signing_enabled_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Persisted lifecycle state; unknown values read as pending
    pub fn state(&self) -> DomainTaskState {
        self.status.parse().unwrap_or_else(|_| {
            tracing::warn!(
                domain = %self.domain_name,
                status = %self.status,
                "Unknown status in checkpoint store, treating as pending"
            );
            DomainTaskState::Pending
        })
    }

    /// Current value of one checkpoint flag
    pub fn checkpoint(&self, checkpoint: Checkpoint) -> bool {
        match checkpoint {
            Checkpoint::DomainAdded => self.domain_added,
            Checkpoint::DomainVerified => self.domain_verified,
            Checkpoint::DnsConfigured => self.dns_configured,
            Checkpoint::SigningCnamesAdded => self.signing_cnames_added,
            Checkpoint::SigningEnabled => self.signing_enabled,
        }
    }

    /// Overall success criterion. Signing activation is deliberately absent:
    /// it is handed to the reconciler when it fails in the foreground.
    pub fn is_provisioned(&self) -> bool {
        self.domain_verified && self.dns_configured && self.signing_cnames_added
    }

    /// Provisioned but still waiting on signing activation
    pub fn signing_deferred(&self) -> bool {
        self.signing_cnames_added && !self.signing_enabled
    }

    /// Both signing CNAME targets, if captured
    pub fn signing_cnames(&self) -> Option<(&str, &str)> {
        match (&self.signing_cname_selector1, &self.signing_cname_selector2) {
            (Some(s1), Some(s2)) => Some((s1.as_str(), s2.as_str())),
            _ => None,
        }
    }

    /// Decide whether a signing retry is allowed at `now`
    pub fn signing_retry_eligibility(
        &self,
        now: DateTime<Utc>,
        retry_window: Duration,
        min_spacing: Duration,
    ) -> SigningRetryEligibility {
        if !self.signing_deferred() {
            return SigningRetryEligibility::NotApplicable;
        }

        let verified_at = self.verified_at.unwrap_or(self.created_at);
        if now - verified_at > retry_window {
            return SigningRetryEligibility::WindowExpired;
        }

        match self.last_retry_at {
            Some(last) if now - last < min_spacing => SigningRetryEligibility::TooSoon,
            _ => SigningRetryEligibility::Eligible,
        }
    }
}
