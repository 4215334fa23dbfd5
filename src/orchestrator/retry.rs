use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::ReviewError;

/// Exponential backoff settings shared by every agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay slept after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
/// or the policy's retries are exhausted. The last error is returned.
///
/// Cancellation is checked before each attempt and interrupts the backoff
/// sleep immediately.
pub async fn with_backoff<T, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
    is_retryable: P,
) -> Result<T, ReviewError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ReviewError>>,
    P: Fn(&ReviewError) -> bool,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(ReviewError::Cancelled);
        }

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_retryable(&err) {
            tracing::warn!(op = label, attempt, "Non-retryable failure: {}", err);
            return Err(err);
        }
        if attempt >= policy.max_retries {
            tracing::warn!(
                op = label,
                attempts = attempt + 1,
                "Retries exhausted: {}",
                err
            );
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        tracing::info!(
            op = label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Retryable failure, backing off: {}",
            err
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(ReviewError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
