//! Bounded exponential backoff for transient cluster failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ClusterUnreachableError, ReconcileError};
use crate::metrics::METRICS;

/// Retry policy for `ClusterUnreachable` reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds). Doubles each retry.
    pub base_delay_ms: u64,
    /// Upper bound for a single delay (milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// No retries: a single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// Only `ClusterUnreachableError` is retried; the last one is returned
/// wrapped in `ReconcileError::ClusterUnreachable` with the attempt count.
pub async fn retry_unreachable<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ReconcileError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterUnreachableError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(last) if attempt >= max_attempts => {
                return Err(ReconcileError::ClusterUnreachable {
                    attempts: attempt,
                    last,
                });
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                METRICS.inc_retries();
                tracing::warn!(
                    event = "reconcile.retry",
                    release = %err.release,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
