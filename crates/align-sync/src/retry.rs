use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::error::{SyncError, SyncResult};

/// Bounded retry with exponential backoff and a per-attempt deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Pause after the `failures`-th consecutive failure.
    pub fn delay_after(&self, failures: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.multiplier.saturating_pow(failures))
    }

    /// Runs `op` until it succeeds or the attempts are spent, returning the last error.
    pub async fn run<T, F, Fut>(&self, label: &'static str, mut op: F) -> SyncResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut failures = 0;
        loop {
            let attempt = failures + 1;
            let outcome = match timeout(self.attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.attempt_timeout)),
            };
            match outcome {
                Ok(value) => {
                    if failures > 0 {
                        tracing::info!(target: "align_sync::retry", label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    failures += 1;
                    if failures >= attempts {
                        tracing::warn!(
                            target: "align_sync::retry",
                            label,
                            attempts = failures,
                            error = %err,
                            "giving up"
                        );
                        return Err(err);
                    }
                    let delay = self.delay_after(failures);
                    tracing::debug!(
                        target: "align_sync::retry",
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed; retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
