use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::warn;

/// Bounded exponential backoff for transient stage failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is the 1-based
    /// number of the attempt that just failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        self.base_delay.mul_f64(self.multiplier.max(1.0).powi(exp))
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects, the
    /// attempt budget runs out, or the next attempt would begin after `deadline`.
    /// Attempts never overlap; the last error is returned.
    pub async fn run<T, E, F, Fut>(
        &self,
        stage: &str,
        deadline: Option<Instant>,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if attempt >= max_attempts || !retryable(&err) {
                return Err(err);
            }

            let delay = self.backoff(attempt) + jitter(self.backoff(attempt));
            if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                warn!(stage, attempt, error = %err, "Run deadline reached, not retrying");
                return Err(err);
            }

            warn!(
                stage,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying after backoff"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Up to 10% of the delay.
fn jitter(delay: Duration) -> Duration {
    let max_ms = (delay.as_millis() / 10) as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
