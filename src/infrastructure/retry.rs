//! Generic retry helper with exponential backoff.

use std::fmt::Display;
use std::future::Future;

use super::backoff::{BackoffConfig, ExponentialBackoff};

/// Caller-configurable retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Backoff between attempts
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (single attempt)
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Run an async operation, retrying transient failures with backoff.
///
/// The operation is invoked up to `policy.max_attempts` times; the final
/// error is returned to the caller once retries are exhausted.
pub async fn retry_with_backoff<T, E, Fut, F>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut backoff = ExponentialBackoff::with_config(policy.backoff.clone());
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let attempt = backoff.attempt() + 1;
                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        operation = operation,
                        attempts = attempt,
                        error = %e,
                        "Operation failed, retries exhausted"
                    );
                    return Err(e);
                }
                let delay = backoff.next_delay();
                tracing::debug!(
                    operation = operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: BackoffConfig {
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(2),
                multiplier: 1.0,
                jitter_factor: 0.0,
            },
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&fast_policy(3), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&fast_policy(5), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&fast_policy(3), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still failing".to_string()) }
        })
        .await;
        assert_eq!(result.unwrap_err(), "still failing");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
