//! Attempt counting with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Retry budget for one logical operation.
///
/// Each retrying operation owns its own instance:
///
/// ```ignore
/// let mut policy = BackoffPolicy::new(3, Duration::from_secs(1), Duration::from_secs(1));
/// while policy.should_try() {
///     match op(policy.current_attempt()).await {
///         Ok(v) => return Ok(v),
///         Err(_) => policy.backoff().await,
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    max_attempts: u32,
    base_sleep: Duration,
    base_jitter: Duration,
    current_attempt: u32,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_sleep: Duration, base_jitter: Duration) -> Self {
        Self {
            max_attempts,
            base_sleep,
            base_jitter,
            current_attempt: 0,
        }
    }

    pub fn from_secs(max_attempts: u32, base_sleep_secs: f64, base_jitter_secs: f64) -> Self {
        Self::new(
            max_attempts,
            Duration::from_secs_f64(base_sleep_secs.max(0.0)),
            Duration::from_secs_f64(base_jitter_secs.max(0.0)),
        )
    }

    pub fn should_try(&self) -> bool {
        self.current_attempt < self.max_attempts
    }

    /// Zero-based index of the attempt about to run.
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `base_sleep * 2^attempt + uniform(0, base_jitter)`.
    pub fn delay(&self) -> Duration {
        let exp = 2u32.saturating_pow(self.current_attempt);
        let jitter = rand::thread_rng().gen::<f64>() * self.base_jitter.as_secs_f64();
        self.base_sleep.saturating_mul(exp) + Duration::from_secs_f64(jitter)
    }

    /// Sleep for [`delay`](Self::delay), then move to the next attempt.
    ///
    /// No sleep is taken once the budget is spent: the caller is about to
    /// give up or fall back, and waiting would only add latency.
    pub async fn backoff(&mut self) {
        if self.current_attempt + 1 < self.max_attempts {
            let delay = self.delay();
            debug!(
                attempt = self.current_attempt,
                delay_ms = delay.as_millis() as u64,
                "Backing off"
            );
            tokio::time::sleep(delay).await;
        }
        self.current_attempt += 1;
    }
}
