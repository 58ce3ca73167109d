//! Send throttling
//!
//! Sends inside one campaign run are strictly sequential with a fixed pause
//! between them; separate runs are bounded by a semaphore so campaigns of
//! different users can proceed side by side. The pause is cut short when the
//! process shuts down.

use async_trait::async_trait;
use mailpulse_common::config::DispatchConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Throttling policy for dispatch runs
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Wait for a free run slot. `None` once shutdown has begun.
    async fn acquire_run(&self) -> Option<OwnedSemaphorePermit>;

    /// Wait between two sends. Returns false if interrupted by shutdown.
    async fn pause(&self) -> bool;
}

/// Fixed-delay throttle with a bounded number of concurrent runs
pub struct SendThrottle {
    delay: Duration,
    runs: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl SendThrottle {
    pub fn new(delay: Duration, max_concurrent_runs: usize, shutdown: CancellationToken) -> Self {
        Self {
            delay,
            runs: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            shutdown,
        }
    }

    pub fn from_config(config: &DispatchConfig, shutdown: CancellationToken) -> Self {
        Self::new(
            Duration::from_millis(config.send_delay_ms),
            config.max_concurrent_campaigns,
            shutdown,
        )
    }
}

#[async_trait]
impl Throttle for SendThrottle {
    async fn acquire_run(&self) -> Option<OwnedSemaphorePermit> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            permit = self.runs.clone().acquire_owned() => permit.ok(),
        }
    }

    async fn pause(&self) -> bool {
        if self.delay.is_zero() {
            return !self.shutdown.is_cancelled();
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}
