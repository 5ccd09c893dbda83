//! Request retry policy.

use std::time::Duration;

use arcade_shared::config::RetryConfig;

/// Exponential backoff: `base`, `2·base`, `4·base`, ... capped at `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base,
            cap: cap.max(base),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// How long to wait for a reply to attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// One wait per attempt.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts).map(|a| self.delay(a))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(RetryConfig::default())
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self::new(
            cfg.attempts,
            Duration::from_millis(cfg.base_ms),
            Duration::from_millis(cfg.cap_ms),
        )
    }
}
