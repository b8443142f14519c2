use std::time::Duration;

use crate::MediaError;

/// Decides whether a failed APPEND is sent again, and after how long
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// `attempt` counts failures of this chunk so far (1 after the first failure).
    /// Return `None` to give up.
    fn retry_delay(&self, attempt: u32, error: &MediaError) -> Option<Duration>;
}

/// Never retry; the first failure aborts the upload
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn retry_delay(&self, _attempt: u32, _error: &MediaError) -> Option<Duration> {
        None
    }
}

/// Retry retryable failures with exponential backoff
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn retry_delay(&self, attempt: u32, error: &MediaError) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries || !error.is_retryable() {
            return None;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);

        // The platform's own hint wins when it asks for longer
        Some(match error.retry_after() {
            Some(hint) => backoff.max(hint),
            None => backoff,
        })
    }
}
