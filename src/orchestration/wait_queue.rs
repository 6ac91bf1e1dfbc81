//! # Propagation Wait Queue
//!
//! Domains that submitted a DNS change and must wait for external convergence
//! before their next phase can succeed. Waiting domains hold no worker slot
//! and no automation session; the scheduler promotes them back into the pool
//! once they have waited at least the poll interval and capacity allows.

use super::types::Phase;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitEntry {
    pub domain: String,
    pub parked_at: Instant,
    /// Phase that could not complete
    pub phase: Phase,
    pub last_error: String,
}

#[derive(Debug, Default)]
pub struct PropagationWaitQueue {
    entries: Mutex<HashMap<String, WaitEntry>>,
}

impl PropagationWaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a domain; re-parking an already waiting domain restarts its timer
    pub fn park(&self, domain: &str, phase: Phase, last_error: impl Into<String>) {
        self.park_at(domain, phase, last_error, Instant::now());
    }

    pub fn park_at(
        &self,
        domain: &str,
        phase: Phase,
        last_error: impl Into<String>,
        parked_at: Instant,
    ) {
        self.entries.lock().insert(
            domain.to_string(),
            WaitEntry {
                domain: domain.to_string(),
                parked_at,
                phase,
                last_error: last_error.into(),
            },
        );
    }

    /// Domains that have waited at least `poll_interval`, longest wait first
    pub fn due(&self, poll_interval: Duration) -> Vec<String> {
        self.due_at(poll_interval, Instant::now())
    }

    pub fn due_at(&self, poll_interval: Duration, now: Instant) -> Vec<String> {
        let entries = self.entries.lock();
        let mut due: Vec<&WaitEntry> = entries
            .values()
            .filter(|entry| now.saturating_duration_since(entry.parked_at) >= poll_interval)
            .collect();
        due.sort_by_key(|entry| entry.parked_at);
        due.into_iter().map(|entry| entry.domain.clone()).collect()
    }

    pub fn remove(&self, domain: &str) -> Option<WaitEntry> {
        self.entries.lock().remove(domain)
    }

    pub fn get(&self, domain: &str) -> Option<WaitEntry> {
        self.entries.lock().get(domain).cloned()
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.entries.lock().contains_key(domain)
    }

    /// Waiting domain names, longest wait first
    pub fn list(&self) -> Vec<String> {
        self.due_at(Duration::ZERO, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
