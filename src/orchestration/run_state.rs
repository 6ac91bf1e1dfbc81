//! Process-wide run state shared by the foreground scheduler and the
//! background reconciler.
//!
//! Created once at bootstrap and handed to both components. The batch flag is
//! advisory: the reconciler reads it before each tick and before each domain,
//! and skips work while a foreground batch holds it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct RunState {
    batch_running: AtomicBool,
    stop_requested: AtomicBool,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl RunState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the batch flag; `None` when another batch already holds it
    pub fn try_begin_batch(self: &Arc<Self>) -> Option<BatchGuard> {
        self.batch_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.stop_requested.store(false, Ordering::Release);
        Some(BatchGuard {
            state: Arc::clone(self),
        })
    }

    pub fn is_batch_running(&self) -> bool {
        self.batch_running.load(Ordering::Acquire)
    }

    /// Ask the running batch to stop between ticks
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Stop background loops for good
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.request_stop();
        self.shutdown_notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Resolves once shutdown has been requested
    pub async fn shutdown_requested(&self) {
        loop {
            let notified = self.shutdown_notify.notified();
            if self.is_shutdown() {
                return;
            }
            notified.await;
        }
    }
}

/// Holds the batch flag; released on drop, including on panic or early return
#[derive(Debug)]
pub struct BatchGuard {
    state: Arc<RunState>,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.state.batch_running.store(false, Ordering::Release);
    }
}
