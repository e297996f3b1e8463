use super::TransportError;
use crate::config::ReconnectConfig;
use std::time::Duration;
use tokio::time::sleep;

/// Exponential reconnect backoff with an optional retry budget
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: Option<u32>) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_retries,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_retries,
        )
    }

    /// `attempt` counts consecutive failures, starting at 1.
    pub fn should_retry(&self, attempt: u32, error: &TransportError) -> bool {
        if let Some(max) = self.max_retries {
            if attempt > max {
                return false;
            }
        }

        error.is_retryable()
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let multiplier = 2u32.saturating_pow(exp);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    pub async fn wait_before_retry(&self, attempt: u32) {
        let delay = self.delay_for(attempt);
        tracing::info!(
            "Reconnecting in {}ms (attempt {})",
            delay.as_millis(),
            attempt
        );
        sleep(delay).await;
    }
}
