//! Bounded retry with exponential backoff.
//!
//! Applied explicitly at call sites: wrap the operation in a closure and hand
//! it to [`retry_with_backoff`] together with a [`RetryPolicy`]. Only errors
//! the policy's predicate accepts are retried; everything else returns at once.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use super::ProviderError;

/// Retry parameters plus the retryable-error predicate.
#[derive(Debug)]
pub struct RetryPolicy<E> {
    /// Attempts after the first call. `0` disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable: fn(&E) -> bool,
}

// Manual impls: derive would demand `E: Clone`, but only a fn pointer is stored.
impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl<E> RetryPolicy<E> {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Total calls the policy allows, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl RetryPolicy<ProviderError> {
    /// Retry connection-refused / timeout failures only.
    pub fn transient(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            retryable: ProviderError::is_transient,
        }
    }
}

impl Default for RetryPolicy<ProviderError> {
    fn default() -> Self {
        Self::transient(2, Duration::from_secs(1), Duration::from_secs(10))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. The last error is returned unchanged.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy<E>,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts();
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if !(policy.retryable)(&e) => return Err(e),
            Err(e) => {
                if attempt + 1 >= attempts {
                    error!(%label, attempts, error = %e, "giving up after retries");
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    %label,
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
