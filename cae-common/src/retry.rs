//! Retry helpers
//!
//! Two policies exist:
//! - `retry_on_lock`: exponential backoff on SQLite lock contention, bounded by
//!   a maximum total wait. Used by the result store for writes.
//! - `retry_forever`: fixed delay, unbounded. Used only for establishing the
//!   broker connection.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::is_lock_error;
use crate::{Error, Result};

/// Retry a database operation with exponential backoff until `max_wait_ms` elapses.
///
/// Only "database is locked" errors are retried; any other error is returned
/// immediately. Backoff starts at 10ms, doubles, and is capped at 1000ms.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let locked = match &err {
                    Error::Database(db_err) => is_lock_error(db_err),
                    _ => false,
                };
                if !locked {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::StorageUnavailable(format!(
                        "database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}

/// Retry `operation` with a fixed delay until it succeeds.
///
/// Every failure is logged at WARN with the attempt number.
pub async fn retry_forever<F, Fut, T>(operation_name: &str, delay: Duration, mut operation: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u64;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return value;
            }
            Err(err) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    retry_in_secs = delay.as_secs_f64(),
                    error = %err,
                    "Attempt failed, retrying"
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

    #[tokio::test]
    async fn test_retry_on_lock_returns_non_lock_error_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_lock("test", 1000, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::NotFound("x".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_forever_stops_on_success() {
        let calls = AtomicU32::new(0);
        let value = retry_forever("test", Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::BrokerUnavailable("not yet".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
