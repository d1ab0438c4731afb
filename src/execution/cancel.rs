//! Execution Cancellation
//!
//! Each live execution owns a [`CancelHandle`]. Cancelling sets a shared flag
//! and wakes every task awaiting [`CancelHandle::cancelled`], so an in-flight
//! remote call can be abandoned at its next await point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Error returned when an execution exceeds its timeout
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Query exceeded timeout of {timeout:?}")]
pub struct TimeoutError {
    /// The timeout that was exceeded
    pub timeout: Duration,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag for one execution
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn new() -> Self {
        CancelHandle::default()
    }

    /// Request cancellation and wake waiters
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
