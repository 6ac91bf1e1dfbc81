//! Input validation for the provisioning core
//!
//! Domain names arrive from bulk imports and operator forms. They are checked
//! here before a row is created, so the engine never submits a malformed name
//! to the console or the DNS provider.

use crate::error::{ProvisionerError, Result};

/// Maximum length of a fully qualified domain name, without the trailing dot
const MAX_DOMAIN_LENGTH: usize = 253;

/// Maximum length of a single DNS label
const MAX_LABEL_LENGTH: usize = 63;

/// Validates a domain name and returns its normalized (lowercase, no trailing dot) form
pub fn validate_domain_name(domain: &str) -> Result<String> {
    let normalized = domain.trim().trim_end_matches('.').to_ascii_lowercase();

    if normalized.is_empty() {
        return Err(ProvisionerError::ValidationError(
            "Domain name cannot be empty".to_string(),
        ));
    }

    if normalized.len() > MAX_DOMAIN_LENGTH {
        return Err(ProvisionerError::ValidationError(format!(
            "Domain name too long: {} characters (max: {MAX_DOMAIN_LENGTH})",
            normalized.len()
        )));
    }

    let labels: Vec<&str> = normalized.split('.').collect();
    if labels.len() < 2 {
        return Err(ProvisionerError::ValidationError(format!(
            "Domain name must have at least two labels: {normalized}"
        )));
    }

    for label in &labels {
        validate_label(label, &normalized)?;
    }

    // Top-level domains are never all-numeric
    if labels
        .last()
        .is_some_and(|tld| tld.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(ProvisionerError::ValidationError(format!(
            "Domain name has a numeric top-level label: {normalized}"
        )));
    }

    Ok(normalized)
}

fn validate_label(label: &str, domain: &str) -> Result<()> {
    if label.is_empty() {
        return Err(ProvisionerError::ValidationError(format!(
            "Domain name contains an empty label: {domain}"
        )));
    }

    if label.len() > MAX_LABEL_LENGTH {
        return Err(ProvisionerError::ValidationError(format!(
            "Domain label too long: {} characters (max: {MAX_LABEL_LENGTH})",
            label.len()
        )));
    }

    if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ProvisionerError::ValidationError(format!(
            "Domain label contains invalid characters: {label}"
        )));
    }

    if label.starts_with('-') || label.ends_with('-') {
        return Err(ProvisionerError::ValidationError(format!(
            "Domain label cannot start or end with a hyphen: {label}"
        )));
    }

    Ok(())
}
