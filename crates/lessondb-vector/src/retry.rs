//! Bounded retry with binary exponential backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use lessondb_core::config::HealthCheckConfig;
use lessondb_core::Result;

const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }

    pub fn from_config(config: &HealthCheckConfig) -> Self {
        Self::new(config.retries, Duration::from_millis(BASE_DELAY_MS))
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempts run out. The last error is returned unchanged.
    pub async fn run<F, Fut, T>(&self, op_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying store call");
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
