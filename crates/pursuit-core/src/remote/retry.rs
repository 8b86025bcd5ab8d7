//! Timeout racing and bounded retry for remote calls.

use std::future::Future;
use std::time::Duration;

use super::backend::RemoteResult;
use crate::error::RemoteError;

/// Timeout and retry settings shared by every remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt deadline
    pub timeout: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `base_delay * n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts. Each attempt races `timeout`; a late result is
    /// dropped with its future.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::transient(format!(
                    "{label} timed out after {}ms",
                    self.timeout.as_millis()
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        "Transient failure in {label}, retrying in {}ms: {error}",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    tracing::debug!(attempt, "{label} failed: {error}");
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(100),
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let result = policy()
            .run("select", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::transient("reset"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: RemoteResult<()> = policy()
            .run("upsert", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::transient("reset"))
            })
            .await;
        assert_eq!(result.unwrap_err().kind, RemoteErrorKind::TransientNetwork);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: RemoteResult<()> = policy()
            .run("update", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::permission("rls"))
            })
            .await;
        assert_eq!(result.unwrap_err().kind, RemoteErrorKind::Permission);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let calls = &AtomicU32::new(0);
        let result: RemoteResult<()> = policy()
            .run("select", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        let error = result.unwrap_err();
        assert_eq!(error.kind, RemoteErrorKind::TransientNetwork);
        assert!(error.message.contains("timed out"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_linear_backoff() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(3), Duration::from_millis(30));
    }
}
