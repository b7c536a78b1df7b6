//! Retry loop for the persistence connection.
//!
//! Transient failures are retried forever with capped exponential
//! backoff; anything else is returned to the caller immediately.

use super::StorageError;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound for any single delay
    pub max: Duration,
}

impl BackoffPolicy {
    /// Creates a backoff policy.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Runs `op` until it succeeds or fails with a non-transient error.
///
/// # Errors
///
/// Returns the first error for which `StorageError::is_transient` is false.
pub async fn retry_with_backoff<T, F, Fut>(
    what: &str,
    policy: BackoffPolicy,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation = what, attempts = attempt + 1, "Storage recovered");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    operation = what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Storage unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(350));
        assert_eq!(policy.delay(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(2));
        let result = retry_with_backoff("find_all", policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(StorageError::unavailable("connection refused"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_backoff("find_all", BackoffPolicy::default(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::operation_failed("find_all", "bad query"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
