//! Bounded exponential backoff for transient backend failures.

use mnemos_types::config::RetryPolicy;
use mnemos_types::error::{StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Delays between attempts under one [`RetryPolicy`]: doubling from
/// `min_delay_ms`, capped at `max_delay_ms`, each stretched by up to
/// `jitter` of itself and never past the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    cap_ms: u64,
    jitter: f64,
    /// xorshift state; never zero.
    state: u64,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy) -> Self {
        let seed = Uuid::new_v4().as_u128() as u64 | 1;
        Self::seeded(policy, seed)
    }

    fn seeded(policy: &RetryPolicy, seed: u64) -> Self {
        Self {
            base_ms: policy.min_delay_ms.min(policy.max_delay_ms),
            cap_ms: policy.max_delay_ms,
            jitter: policy.jitter.clamp(0.0, 1.0),
            state: seed.max(1),
        }
    }

    /// Uniform sample in `[0, 1)`.
    fn sample(&mut self) -> f64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let base = self.base_ms;
        self.base_ms = base.saturating_mul(2).min(self.cap_ms);
        let stretch = (base as f64 * self.jitter * self.sample()) as u64;
        Some(Duration::from_millis(base.saturating_add(stretch).min(self.cap_ms)))
    }
}

/// Final result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, or
/// `policy.max_attempts` attempts (at least one) were made.
pub async fn retry_async<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delays = Backoff::new(policy);
    let mut attempts = 0;
    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "Succeeded after retrying");
                }
                return Retried {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(err) => err,
        };
        if !should_retry(&err) {
            return Retried {
                result: Err(err),
                attempts,
            };
        }
        if attempts >= max_attempts {
            warn!(attempts, error = %err, "Giving up after transient failures");
            return Retried {
                result: Err(err),
                attempts,
            };
        }
        let delay = delays.next().unwrap_or_default();
        debug!(attempts, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");
        tokio::time::sleep(delay).await;
    }
}

/// Retry a store operation on [`StoreError::Transient`] only.
pub async fn retry_transient<F, Fut, T>(policy: &RetryPolicy, operation: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    retry_async(policy, operation, StoreError::is_transient)
        .await
        .result
}
