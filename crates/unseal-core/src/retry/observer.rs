use std::fmt::Display;
use std::time::Duration;

/// Hooks fired by [`Retrier`](super::Retrier) between attempts
///
/// Errors arrive as `Display` only. Implementations log or count them and
/// must not try to recover anything else.
pub trait RetryObserver: Send + Sync {
    /// A retryable failure; the next attempt follows after `delay`
    fn retrying(&self, attempt: u32, error: &dyn Display, delay: Duration);

    /// Success on a later attempt. Not fired when the first attempt succeeds.
    fn recovered(&self, attempts: u32, elapsed: Duration) {
        let _ = (attempts, elapsed);
    }

    fn exhausted(&self, attempts: u32, error: &dyn Display);

    /// A non-retryable failure ended the loop
    fn stopped(&self, attempt: u32, error: &dyn Display) {
        let _ = (attempt, error);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl RetryObserver for SilentObserver {
    fn retrying(&self, _: u32, _: &dyn Display, _: Duration) {}
    fn exhausted(&self, _: u32, _: &dyn Display) {}
}

/// Logs retries at WARN and exhaustion at ERROR
///
/// The label identifies what is being retried (a reference, never a value).
#[derive(Debug, Clone)]
pub struct TracingObserver {
    label: String,
}

impl TracingObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl RetryObserver for TracingObserver {
    fn retrying(&self, attempt: u32, error: &dyn Display, delay: Duration) {
        tracing::warn!(
            target: "unseal::retry",
            op = %self.label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "{}, retrying",
            error
        );
    }

    fn recovered(&self, attempts: u32, elapsed: Duration) {
        tracing::debug!(
            target: "unseal::retry",
            op = %self.label,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "recovered"
        );
    }

    fn exhausted(&self, attempts: u32, error: &dyn Display) {
        tracing::error!(
            target: "unseal::retry",
            op = %self.label,
            attempts,
            "giving up: {}",
            error
        );
    }

    fn stopped(&self, attempt: u32, error: &dyn Display) {
        tracing::debug!(
            target: "unseal::retry",
            op = %self.label,
            attempt,
            "not retrying: {}",
            error
        );
    }
}
