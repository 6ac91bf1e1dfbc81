//! # Phase Error Classification
//!
//! Maps collaborator failures onto the engine's error taxonomy.
//!
//! ## Overview
//!
//! Console drivers do not always type their failures precisely: a locked
//! account can surface as a generic interaction error whose only signal is
//! the banner text the console rendered. The classifier therefore checks both
//! the typed variant and the message text before deciding whether a failure
//! may be retried.
//!
//! ## Usage
//!
//! ```rust
//! use provisioner_core::integrations::AutomationError;
//! use provisioner_core::orchestration::error_classifier::{ErrorClassifier, StandardErrorClassifier};
//! use provisioner_core::orchestration::{ErrorCategory, Phase};
//!
//! let classifier = StandardErrorClassifier::new();
//! let error = classifier.classify_automation(
//!     Phase::Login,
//!     &AutomationError::Transient("Your account has been locked".into()),
//! );
//! assert_eq!(error.category, ErrorCategory::Terminal);
//! ```

use super::errors::{ErrorCategory, PhaseError};
use super::types::Phase;
use crate::integrations::{AutomationError, DnsError};

/// Console banner fragments that no amount of retrying will fix
const TERMINAL_MESSAGE_PATTERNS: &[&str] = &[
    "invalid credentials",
    "incorrect password",
    "account locked",
    "account has been locked",
    "account is locked",
    "not authorized",
    "access denied",
    "account disabled",
];

/// Trait for error classification strategies
pub trait ErrorClassifier: Send + Sync {
    fn classify_automation(&self, phase: Phase, error: &AutomationError) -> PhaseError;

    fn classify_dns(&self, phase: Phase, error: &DnsError) -> PhaseError;

    /// Get the classifier name for identification
    fn classifier_name(&self) -> &'static str;
}

/// Standard classifier: typed terminal variants plus known console messages
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier;

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Category for free text reported by the console
    pub fn classify_message(&self, message: &str) -> ErrorCategory {
        let lowered = message.to_ascii_lowercase();
        if TERMINAL_MESSAGE_PATTERNS
            .iter()
            .any(|pattern| lowered.contains(pattern))
        {
            ErrorCategory::Terminal
        } else {
            ErrorCategory::Transient
        }
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_automation(&self, phase: Phase, error: &AutomationError) -> PhaseError {
        let category = if error.is_terminal() {
            ErrorCategory::Terminal
        } else {
            self.classify_message(&error.to_string())
        };
        PhaseError::new(phase, category, error.to_string())
    }

    fn classify_dns(&self, phase: Phase, error: &DnsError) -> PhaseError {
        let category = if error.is_terminal() {
            ErrorCategory::Terminal
        } else {
            ErrorCategory::Transient
        };
        PhaseError::new(phase, category, error.to_string())
    }

    fn classifier_name(&self) -> &'static str {
        "StandardErrorClassifier"
    }
}
