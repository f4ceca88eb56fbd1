//! Clock & Sleeper (C1): monotonic time plus a cancellable delay.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Abstracts monotonic time and cancellable sleeping so tests can run the
/// pause/backoff logic without real wall-clock delays.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Sleeps for `duration`, returning early (without error) if `cancel`
    /// is triggered first.
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = cancel.cancelled() => {}
        }
    }
}
