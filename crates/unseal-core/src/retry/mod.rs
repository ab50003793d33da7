//! Bounded retries for transient backend failures
//!
//! A [`Retrier`] runs an async operation until it succeeds, fails with an
//! error that [`Retryable::is_retryable`] rejects, or runs out of attempts.
//! Delays between attempts come from a [`Backoff`] derived from the
//! configured [`RetryPolicy`](crate::types::RetryPolicy).

mod backoff;
mod observer;

pub use backoff::Backoff;
pub use observer::{RetryObserver, SilentObserver, TracingObserver};

use crate::types::RetryPolicy;
use std::fmt::{self, Display};
use std::future::Future;
use tokio::time::Instant;

/// Errors that know whether a later attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Why a retried operation stopped without a value
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every permitted attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error that is not worth repeating
    Permanent { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts made before stopping
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Permanent { attempt, .. } => *attempt,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// The error from the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent { error, .. } => error,
        }
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "{} (after {} attempts)", last, attempts)
            }
            RetryError::Permanent { error, .. } => error.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Exhausted { last: e, .. } | RetryError::Permanent { error: e, .. } => {
                Some(e)
            }
        }
    }
}

/// Runs an operation under a retry policy
///
/// ```rust
/// use unseal_core::retry::{Retrier, Retryable};
/// use unseal_core::types::RetryPolicy;
///
/// #[derive(Debug)]
/// struct Flaky;
/// impl Retryable for Flaky {
///     fn is_retryable(&self) -> bool { true }
/// }
/// impl std::fmt::Display for Flaky {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("flaky")
///     }
/// }
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let retrier = Retrier::new(&RetryPolicy::default());
/// let value = retrier.run(|| async { Ok::<_, Flaky>(7) }).await.unwrap();
/// assert_eq!(value, 7);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Retrier<O = SilentObserver> {
    max_attempts: u32,
    backoff: Backoff,
    observer: O,
}

impl Retrier {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts.max(1),
            backoff: Backoff::from_policy(policy),
            observer: SilentObserver,
        }
    }
}

impl<O: RetryObserver> Retrier<O> {
    /// Report attempts to `observer` instead of the current one
    pub fn observed_by<N: RetryObserver>(self, observer: N) -> Retrier<N> {
        Retrier {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            observer,
        }
    }

    /// Use exact delays, mainly so tests can assert on them
    pub fn without_jitter(mut self) -> Self {
        self.backoff = self.backoff.without_jitter();
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Call `op` until it succeeds or the policy says stop
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        self.observer.recovered(attempt, started.elapsed());
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                self.observer.stopped(attempt, &error);
                return Err(RetryError::Permanent { attempt, error });
            }
            if attempt >= self.max_attempts {
                self.observer.exhausted(attempt, &error);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.backoff.delay(attempt);
            self.observer.retrying(attempt, &error, delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
