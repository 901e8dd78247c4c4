use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Growth of the wait between failed publishes of one outbox entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    /// Doubles per failure, starting at the base delay.
    #[default]
    Exponential,
    Linear,
}

/// How often, and how far apart, the relay retries an outbox entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before the entry is dead-lettered.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of any single delay, jitter included.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Fraction of the delay spread either side of it, clamped to `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(300),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay after the `attempt`-th failure (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let cap_ms = self.max_delay.as_millis() as f64;
        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => base_ms * 2_f64.powi((attempt - 1).min(62) as i32),
            BackoffStrategy::Linear => base_ms * f64::from(attempt),
        }
        .min(cap_ms);

        let total_ms = raw_ms + self.jitter_offset(attempt, raw_ms);
        Duration::from_millis(total_ms.clamp(0.0, cap_ms) as u64)
    }

    /// Offset in `[-jitter * delay, +jitter * delay)`, fixed per attempt number.
    fn jitter_offset(&self, attempt: u32, delay_ms: f64) -> f64 {
        let range = delay_ms * self.jitter.clamp(0.0, 1.0);
        if range <= 0.0 {
            return 0.0;
        }
        let spread = f64::from(attempt.wrapping_mul(17) % 100) / 100.0;
        range * (spread * 2.0 - 1.0)
    }

    /// Whether an entry that has failed `attempts` times gets another try.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// When to try again after the `attempts`-th failure at `failed_at`.
    /// `None` means the entry is out of attempts.
    pub fn next_attempt_at(&self, attempts: u32, failed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.should_retry(attempts) {
            return None;
        }
        let delay = chrono::Duration::from_std(self.delay_for_attempt(attempts))
            .unwrap_or_else(|_| chrono::Duration::MAX);
        Some(failed_at.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}
