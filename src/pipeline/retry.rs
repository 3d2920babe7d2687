use crate::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Explicit retry policy for external stage calls: attempt limit plus an
/// exponential backoff with a cap. Passed into the stage executor so retry
/// behavior is testable in isolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            cap,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
        )
    }

    /// Delay before the given attempt (1-based). The first attempt runs
    /// immediately; attempt n waits `base * 2^(n-2)`, capped.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(31);
        let backoff = self.base.saturating_mul(1u32 << exp);
        backoff.min(self.cap)
    }

    pub fn attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
