//! Bounded exponential backoff around a single remote call.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::{Error, Result};

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. Backoff sleeps end early on cancellation.
pub(super) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: &'static str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.delay_before(attempt);
            tracing::debug!(
                operation,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying remote call"
            );
            tokio::select! {
                () = token.cancelled() => return Err(Error::Aborted),
                () = tokio::time::sleep(delay) => {}
            }
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => {
                attempt += 1;
                if attempt >= max_attempts {
                    tracing::warn!(operation, attempts = attempt, %error, "Remote call failed");
                    return Err(error);
                }
                tracing::warn!(operation, attempt, %error, "Remote call failed, will retry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use tokio::time::Instant;

    fn transient() -> Error {
        Error::Transient("connection reset".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures_with_doubling_delays() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let started = Instant::now();

        let counter = &calls;
        let result = with_retry(&RetryPolicy::default(), &token, "find", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok("found")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "found");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s before the second attempt, 4s before the third
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let counter = &calls;
        let result: Result<()> = with_retry(&RetryPolicy::default(), &token, "upload", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Transient(format!("attempt {n}")))
        })
        .await;

        match result {
            Err(Error::Transient(message)) => assert_eq!(message, "attempt 2"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_errors_fail_immediately() {
        let token = CancellationToken::new();

        for error in [
            Error::Auth("401".to_string()),
            Error::PermissionDenied("declined".to_string()),
            Error::DataChanged("412".to_string()),
            Error::Aborted,
        ] {
            let calls = AtomicU32::new(0);
            let mut pending = Some(error);
            let started = Instant::now();

            let result: Result<()> = with_retry(&RetryPolicy::default(), &token, "find", || {
                calls.fetch_add(1, Ordering::SeqCst);
                let error = pending.take().unwrap_or_else(transient);
                async move { Err(error) }
            })
            .await;

            assert!(!result.unwrap_err().is_retryable());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(started.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let counter = &calls;
        let result: Result<()> = with_retry(&RetryPolicy::default(), &token, "download", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert!(matches!(result, Err(Error::Aborted)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
