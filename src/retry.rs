//! Reusable bounded-retry wrapper with capped exponential backoff and jitter.
//!
//! Both the non-streaming round trip and the stream-open step go through
//! [`retry_transient`]; once a stream is established no retry applies.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{CompletionError, Result};

/// Backoff for the given zero-based retry index: `initial * 2^index`, with
/// +/- 10% jitter, capped at `max_delay`.
pub(crate) fn backoff_delay(config: &RetryConfig, retry_index: u32) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2_f64.powi(retry_index as i32);
    let jitter = rand::random::<f64>() * 0.2 + 0.9;
    Duration::from_secs_f64(base * jitter).min(config.max_delay)
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// exhausts `config.max_attempts` total attempts. The predicate decides which
/// errors are worth another attempt; the final error is surfaced unchanged.
///
/// Sleeps use the async timer, so a backing-off invocation never blocks
/// concurrent ones.
pub async fn retry_with_backoff<F, Fut, T, P>(
    config: &RetryConfig,
    is_retryable: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&CompletionError) -> bool,
{
    let mut retries = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && retries + 1 < config.max_attempts.max(1) => {
                let delay = backoff_delay(config, retries);
                warn!(
                    attempt = retries + 1,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient gateway failure, backing off before retry"
                );
                tokio::time::sleep(delay).await;
                retries += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`retry_with_backoff`] with the standard transient-error classification.
pub async fn retry_transient<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(config, CompletionError::is_transient, operation).await
}
