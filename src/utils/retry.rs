// =============================================================================
// utils/retry.rs
// =============================================================================
// Helper: call_store_with_retry - timeout + exponential backoff + full jitter
// Usage: wrap store adapter calls that may fail transiently.
// =============================================================================

use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::archive::error::{ArchiveError, ArchiveResult};

/// Base backoff (ms)
const BACKOFF_BASE_MS: u64 = 50;
/// Maximum backoff cap (ms)
const BACKOFF_MAX_MS: u64 = 5000;

/// Retry policy for store adapter calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Max attempts including the first.
    pub max_attempts: usize,
    /// Timeout applied to each attempt.
    pub attempt_timeout: Duration,
    /// Base backoff between attempts (ms).
    pub base_delay_ms: u64,
    /// Backoff cap (ms).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_millis(1500),
            base_delay_ms: BACKOFF_BASE_MS,
            max_delay_ms: BACKOFF_MAX_MS,
        }
    }
}

/// Call async closure `op` with standardized retry/backoff logic.
/// Only transient failures are retried; taxonomy errors like
/// `NotFound` or `VerificationFailed` return immediately.
///
/// # Arguments
/// * `policy` - Attempt count, per-attempt timeout, backoff bounds
/// * `op` - Async operation to retry
///
/// # Returns
/// * `Ok(T)` - Success result from the operation
/// * `Err` - First non-transient error, or the last transient error
///   after all attempts are exhausted
pub async fn call_store_with_retry<F, Fut, T>(policy: &RetryPolicy, op: F) -> ArchiveResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ArchiveResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match timeout(policy.attempt_timeout, op()).await {
            Ok(res) => res,
            Err(_) => Err(ArchiveError::TransientIo(format!(
                "store call timed out after {:?}",
                policy.attempt_timeout
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let backoff_ms =
                    backoff_with_jitter(attempt, policy.base_delay_ms, policy.max_delay_ms);
                tracing::debug!(
                    "Store call failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt,
                    policy.max_attempts,
                    e,
                    backoff_ms
                );
                sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Calculate exponential backoff with full jitter
///
/// Formula: random(0, min(max_ms, base_ms * 2^(attempt-1)))
pub fn backoff_with_jitter(attempt: usize, base_ms: u64, max_ms: u64) -> u64 {
    use rand::Rng;
    let mut rng = rand::thread_rng();

    let exp_backoff =
        base_ms.saturating_mul(2_u64.saturating_pow((attempt.saturating_sub(1)) as u32));
    let capped_backoff = exp_backoff.min(max_ms);

    rng.gen_range(0..=capped_backoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_calculation() {
        let backoff1 = backoff_with_jitter(1, BACKOFF_BASE_MS, BACKOFF_MAX_MS);
        let backoff2 = backoff_with_jitter(2, BACKOFF_BASE_MS, BACKOFF_MAX_MS);
        let backoff3 = backoff_with_jitter(3, BACKOFF_BASE_MS, BACKOFF_MAX_MS);

        assert!(backoff1 <= BACKOFF_BASE_MS);
        assert!(backoff2 <= BACKOFF_BASE_MS * 2);
        assert!(backoff3 <= BACKOFF_BASE_MS * 4);

        let backoff_large = backoff_with_jitter(20, BACKOFF_BASE_MS, BACKOFF_MAX_MS);
        assert!(backoff_large <= BACKOFF_MAX_MS);
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let result = call_store_with_retry(&RetryPolicy::default(), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..Default::default()
        };

        let result = call_store_with_retry(&policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ArchiveError::TransientIo("flaky".into()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_errors_fail_fast() {
        let calls = AtomicUsize::new(0);

        let result: ArchiveResult<()> = call_store_with_retry(&RetryPolicy::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ArchiveError::NotFound("inv-1".into()))
        })
        .await;

        assert!(matches!(result, Err(ArchiveError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_transient() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..Default::default()
        };

        let result: ArchiveResult<()> = call_store_with_retry(&policy, || async {
            Err(ArchiveError::TransientIo("still down".into()))
        })
        .await;

        assert!(matches!(result, Err(ArchiveError::TransientIo(_))));
    }
}
