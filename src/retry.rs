//! Shared retry/backoff utility for outbound calls.
//!
//! Every call to a source API or the embedding boundary goes through
//! [`retry`]: exponential backoff from a fixed initial delay, doubling up to
//! a capped maximum, bounded by a retry count. Only errors classified as
//! retryable by [`SyncError::is_retryable`] trigger another attempt.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::SyncError;

/// Backoff schedule for retried calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max_delay: Duration,
    /// Number of retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max_delay: Duration::from_secs(64),
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): initial * 2^retry,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let doubled = self
            .initial
            .checked_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay);
        doubled.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, the retry
/// budget is exhausted, or `cancel` fires. Backoff sleeps abort promptly on
/// cancellation rather than running out the schedule.
pub async fn retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}), retrying in {:?}: {}",
                    what,
                    attempt + 1,
                    delay,
                    err
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            max_retries: 5,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(500),
            max_delay: Duration::from_secs(64),
            max_retries: 10,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        // 500ms * 2^7 = 64s, the cap; everything past it stays there.
        assert_eq!(policy.delay_for(7), Duration::from_secs(64));
        assert_eq!(policy.delay_for(9), Duration::from_secs(64));
        assert_eq!(policy.delay_for(31), Duration::from_secs(64));
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = retry(fast_policy(), &CancellationToken::new(), "test op", move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(SyncError::http(Some(503), "unavailable"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        // Two backoff delays observed (after attempts 1 and 2), both within
        // the configured cap, then success on the third attempt.
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let policy = fast_policy();
        assert!(policy.delay_for(0) <= policy.max_delay);
        assert!(policy.delay_for(1) <= policy.max_delay);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<(), SyncError> = retry(fast_policy(), &CancellationToken::new(), "test op", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::http(Some(403), "forbidden"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<(), SyncError> = retry(fast_policy(), &CancellationToken::new(), "test op", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::http(Some(500), "boom"))
            }
        })
        .await;

        assert!(result.is_err());
        // First attempt plus max_retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        // A schedule that would otherwise sleep for a minute.
        let policy = RetryPolicy {
            initial: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            max_retries: 5,
        };
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            });
        }

        let started = std::time::Instant::now();
        let result: Result<(), SyncError> = retry(policy, &cancel, "test op", || async {
            Err(SyncError::http(Some(500), "boom"))
        })
        .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
