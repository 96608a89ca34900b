//! Exponential-backoff retry around one backup attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::Result;

/// Backoff parameters for one task's retry loop.
///
/// Every failure from the wrapped operation is retryable; the loop only
/// stops once the total elapsed time crosses `max_elapsed`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay before the first retry.
    pub initial_interval: Duration,
    /// Random spread applied to every delay (0.0 - 1.0).
    pub randomization_factor: f64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Upper bound on a single delay.
    pub max_interval: Duration,
    /// Total time budget across all attempts of one task.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(250),
            randomization_factor: 0.5,
            multiplier: 1.5,
            max_interval: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn jittered(&self, interval: Duration) -> Duration {
        if self.randomization_factor <= 0.0 {
            return interval;
        }

        let delta = interval.as_secs_f64() * self.randomization_factor;
        let low = (interval.as_secs_f64() - delta).max(0.0);
        let high = interval.as_secs_f64() + delta;
        Duration::from_secs_f64(rand::thread_rng().gen_range(low..=high))
    }
}

/// Run `operation` until it succeeds or the elapsed-time budget runs out.
///
/// After the budget is exhausted the last error is returned unchanged.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if started.elapsed() >= policy.max_elapsed {
                    return Err(err);
                }

                let delay = policy.jittered(interval);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, backing off"
                );
                sleep(delay).await;

                interval = Duration::from_secs_f64(
                    (interval.as_secs_f64() * policy.multiplier)
                        .min(policy.max_interval.as_secs_f64()),
                );
                attempt += 1;
            }
        }
    }
}
