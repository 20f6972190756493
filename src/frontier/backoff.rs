//! Retry delay calculation

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with ±50% jitter
///
/// The nominal delay for attempt `n` is `base * 2^n`, capped at `max`.
/// The jittered delay is drawn uniformly from half to one and a half times
/// the nominal value and never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay for `attempt` before jitter; non-decreasing in `attempt`
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Jittered delay for `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal(attempt);
        let factor: f64 = rng.gen_range(0.5..=1.5);
        nominal.mul_f64(factor).min(self.max)
    }
}
