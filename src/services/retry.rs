// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bounded retry with exponential backoff for outbound Spotify calls.
//!
//! Only transient failures ([`AppError::is_transient`]) are retried. A rate
//! limit response carrying `Retry-After` waits that long instead, but never
//! longer than the configured cap.

use crate::error::AppError;
use std::future::Future;
use std::time::Duration;

/// Retry policy for one logical call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given that `attempt` just failed.
    fn delay_after(&self, attempt: u32, err: &AppError) -> Duration {
        if let AppError::RateLimited {
            retry_after_secs: Some(secs),
        } = err
        {
            return Duration::from_secs(*secs).min(self.max_delay);
        }
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. The last error is returned on exhaustion.
pub async fn with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Spotify call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt, &err);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient Spotify failure, will retry after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Spotify call failed: retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = with_backoff("test_op", policy(), || async { Ok::<i32, AppError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test_op", policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AppError::SpotifyUnavailable("HTTP 503".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), AppError> = with_backoff("test_op", policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AppError::RateLimited {
                    retry_after_secs: None,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), AppError> = with_backoff("test_op", policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::SpotifyUnauthorized) }
        })
        .await;

        assert!(matches!(result, Err(AppError::SpotifyUnauthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        };
        let err = AppError::SpotifyUnavailable("timeout".to_string());
        assert_eq!(policy.delay_after(1, &err), Duration::from_secs(4));
        assert_eq!(policy.delay_after(2, &err), Duration::from_secs(8));
        assert_eq!(policy.delay_after(3, &err), Duration::from_secs(10));

        let limited = AppError::RateLimited {
            retry_after_secs: Some(2),
        };
        assert_eq!(policy.delay_after(1, &limited), Duration::from_secs(2));
    }
}
