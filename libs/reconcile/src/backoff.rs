//! Capped exponential backoff for requeued keys.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Policy without jitter, used where delays must be exact.
    pub fn fixed(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: 0.0,
        }
    }

    /// Calculate delay for the given attempt number (0 = first retry).
    ///
    /// The jittered delay never exceeds `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(63) as i32;
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(exponent);
        let max = self.max.as_millis() as f64;
        let delay = delay.min(max);

        let jitter_range = delay * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter).clamp(0.0, max) as u64)
    }
}
