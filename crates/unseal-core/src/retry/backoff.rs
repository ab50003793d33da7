use crate::types::{RetryPolicy, RetryStrategy};
use rand::Rng;
use std::time::Duration;

/// Delay schedule between attempts
///
/// With jitter enabled each delay is drawn from the upper half of its
/// nominal value, so concurrent resolutions hitting the same backend do
/// not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    strategy: RetryStrategy,
    initial: Duration,
    multiplier: f64,
    cap: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self {
            strategy: policy.strategy,
            initial: Duration::from_millis(policy.initial_delay_ms),
            multiplier: policy.backoff_multiplier.max(1.0),
            cap: Duration::from_millis(policy.max_delay_ms),
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Nominal delay after the `failed`-th attempt (1-indexed), before jitter
    pub fn nominal(&self, failed: u32) -> Duration {
        let step = failed.max(1);
        let delay = match self.strategy {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::FixedDelay => self.initial,
            RetryStrategy::LinearBackoff => self.initial.saturating_mul(step),
            RetryStrategy::ExponentialBackoff => {
                let factor = self.multiplier.powi(step as i32 - 1);
                Duration::try_from_secs_f64(self.initial.as_secs_f64() * factor)
                    .unwrap_or(self.cap)
            }
        };
        delay.min(self.cap)
    }

    /// Delay to sleep after the `failed`-th attempt
    pub fn delay(&self, failed: u32) -> Duration {
        let nominal = self.nominal(failed);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let half = nominal / 2;
        half + half.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
    }
}
