//! Cooperative cancellation.
//!
//! One [`CancellationToken`] is created per run and cloned into every stage.
//! Workers poll [`CancellationToken::is_cancelled`] between units of work and
//! race long waits (rate limiter, backoff sleeps) against
//! [`CancellationToken::cancelled`].

use std::sync::Arc;
use tokio::sync::watch;

/// Shared, clonable cancellation flag.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for checks the current value first, so a cancel that happened
        // before this call resolves immediately.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `false` when the sleep was cut short by cancellation.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}
