//! Retry with exponential backoff
//!
//! Used by producers that read from a transport without its own redelivery
//! (the CDC change stream) to ride out transient handler failures.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait after the first failure; doubles after each further failure
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Wait before attempt `failed + 1`, given `failed` failures so far (>= 1)
    pub fn backoff_after(&self, failed: u32) -> Duration {
        let doublings = failed.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff)
    }
}

/// Retry `operation` on every error until it succeeds or attempts run out.
///
/// ```rust
/// use event_bus::{retry_with_backoff, RetryConfig};
///
/// # async fn example() -> Result<(), String> {
/// let value = retry_with_backoff(
///     || async { Ok::<_, String>(42) },
///     &RetryConfig::default(),
///     "example_operation",
/// )
/// .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(operation, config, context, |_| true).await
}

/// Like [`retry_with_backoff`], but an error for which `is_retriable`
/// returns false is returned at once.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    operation: F,
    config: &RetryConfig,
    context: &str,
    is_retriable: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut failed = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if failed > 0 {
                    debug!(context, attempt = failed + 1, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };
        failed += 1;

        if !is_retriable(&err) {
            warn!(context, attempt = failed, error = %err, "Non-retriable failure");
            return Err(err);
        }
        if failed >= max_attempts {
            warn!(context, attempts = failed, error = %err, "Retries exhausted");
            return Err(err);
        }

        let backoff = config.backoff_after(failed);
        warn!(
            context,
            attempt = failed,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Attempt failed, backing off"
        );
        tokio::time::sleep(backoff).await;
    }
}
