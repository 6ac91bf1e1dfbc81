//! # Retry Plumbing
//!
//! Fixed-count, fixed-delay retry used by the two inner retry layers:
//!
//! - **Sub-step**: one console interaction or one DNS call, retried a few
//!   times with a short delay before the enclosing phase sees the failure.
//! - **Phase**: the phase engine drives its own loop with [`RetryPolicy`]
//!   because it reloads or replaces the session between attempts.
//!
//! The outer full-entity layer is owned by the scheduler and counted in the
//! checkpoint store, never here.

use crate::config::EngineConfig;
use crate::integrations::{AutomationError, DnsError};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Errors that can short-circuit a retry loop
pub trait RetryableError {
    /// Retrying cannot help
    fn is_terminal(&self) -> bool;

    /// Retrying on the same session cannot help; the caller must log in again
    fn requires_new_session(&self) -> bool {
        false
    }
}

impl RetryableError for AutomationError {
    fn is_terminal(&self) -> bool {
        AutomationError::is_terminal(self)
    }

    fn requires_new_session(&self) -> bool {
        AutomationError::requires_new_session(self)
    }
}

impl RetryableError for DnsError {
    fn is_terminal(&self) -> bool {
        DnsError::is_terminal(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Innermost layer, per console interaction
    pub fn substep(config: &EngineConfig) -> Self {
        Self::new(config.substep_max_attempts, config.substep_delay())
    }

    /// Middle layer, per phase; the delay is the session reload
    pub fn phase(config: &EngineConfig) -> Self {
        Self::new(config.phase_max_attempts, Duration::ZERO)
    }

    pub fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Run `operation` until it succeeds, fails terminally, loses its session,
/// or runs out of attempts. The last error is returned on exhaustion.
pub async fn retry_substep<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    attempt_fn: F,
) -> Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_substep_until(policy, operation, |_| false, attempt_fn).await
}

/// [`retry_substep`] that also stops on any error `is_fatal` accepts, such as
/// an untyped error whose message a classifier recognises as terminal
pub async fn retry_substep_until<T, E, F, Fut, P>(
    policy: RetryPolicy,
    operation: &str,
    is_fatal: P,
    mut attempt_fn: F,
) -> Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(error)
                if error.is_terminal()
                    || error.requires_new_session()
                    || is_fatal(&error)
                    || policy.is_last_attempt(attempt) =>
            {
                return Err(error)
            }
            Err(error) => {
                debug!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "Sub-step failed, retrying"
                );
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
                attempt += 1;
            }
        }
    }
}
