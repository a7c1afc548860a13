//! Bounded retry executor for remote calls.
//!
//! Wraps an operation with `retries + 1` total attempts, exponential backoff,
//! and a random jitter of up to 10% of the computed delay so many clients
//! hammering the same recovering server do not retry in lockstep. Failure
//! classification lives on [`LinkError::is_retryable`]: 4xx responses (except
//! 429) short-circuit immediately, everything transient is retried until the
//! attempt budget is exhausted, and the last observed error always propagates
//! to the caller.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};

/// Retry budget and pacing, fixed per client at construction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// One failed attempt inside a single executor call. Only lives long enough
/// to feed the retry log line.
#[derive(Debug)]
struct RetryAttempt {
    attempt: u32,
    error: String,
    delay: Duration,
}

/// Run `operation` until it succeeds, fails non-retryably, or exhausts
/// `policy.attempts + 1` total attempts.
pub async fn execute_with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let total_attempts = policy.attempts.saturating_add(1);
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "remote call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                debug!(attempt, error = %err, "non-retryable failure, giving up immediately");
                return Err(err);
            }
            Err(err) if attempt >= total_attempts => {
                warn!(
                    attempts = total_attempts,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let record = RetryAttempt {
                    attempt,
                    error: err.to_string(),
                    delay: backoff_delay(policy.base_delay, attempt),
                };
                debug!(
                    attempt = record.attempt,
                    delay_ms = record.delay.as_millis() as u64,
                    error = %record.error,
                    "transient failure, backing off before retry"
                );
                tokio::time::sleep(record.delay).await;
                attempt += 1;
            }
        }
    }
}

/// `base * 2^(attempt-1)` plus a uniform jitter in `[0, 10%]` of that value.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential_ms =
        (base.as_millis() as u64).saturating_mul(1u64 << (attempt - 1).min(20));
    let jitter_ms = rand::thread_rng().gen_range(0..=exponential_ms / 10);
    Duration::from_millis(exponential_ms.saturating_add(jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retryable_failure_uses_full_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = execute_with_retry(&fast_policy(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LinkError::Http {
                    status: 503,
                    message: "still down".into(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(LinkError::Http { status: 503, .. }) => {}
            other => panic!("expected the last 503 to propagate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_error_short_circuits_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = execute_with_retry(&fast_policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LinkError::Http {
                    status: 400,
                    message: "bad formula".into(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rate_limit_is_retried_like_a_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&fast_policy(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(LinkError::Http {
                        status: 429,
                        message: "rate limited".into(),
                    })
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn first_success_stops_the_loop() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&fast_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        let base = Duration::from_millis(100);
        for (attempt, floor_ms) in [(1u32, 100u64), (2, 200), (3, 400)] {
            let delay = backoff_delay(base, attempt).as_millis() as u64;
            assert!(
                (floor_ms..=floor_ms + floor_ms / 10).contains(&delay),
                "attempt {attempt}: delay {delay}ms outside [{floor_ms}, {}]",
                floor_ms + floor_ms / 10
            );
        }
    }
}
