//! Bounded retry with exponential backoff and jitter for transient failures.
//!
//! Only errors reporting [`Error::is_transient`] are retried; anything else
//! (validation, not found, certificate failures) returns immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Backoff policy for a retried operation
#[derive(Clone, Debug)]
pub struct Backoff {
    /// Total attempts including the first one (minimum 1)
    pub attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Policy with the given number of attempts and default delays
    pub fn attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
pub async fn retry_transient<F, Fut, T>(
    backoff: &Backoff,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempts = backoff.attempts.max(1);
    let mut delay = backoff.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= attempts => {
                error!(operation = %operation_name, attempt, error = %e, "giving up after retries");
                return Err(e);
            }
            Err(e) => {
                // 0.5x to 1.5x jitter
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let sleep_for = delay.mul_f64(jitter).min(backoff.max_delay);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = sleep_for.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(sleep_for).await;
                delay = (delay * 2).min(backoff.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> Backoff {
        Backoff {
            attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = retry_transient(&fast(5), "download", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::transport("download", "connection reset"))
                } else {
                    Ok("bundle")
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), "bundle");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_return_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), Error> = retry_transient(&fast(5), "download", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::crd_bundle("404 from release server"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::CrdBundle(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), Error> = retry_transient(&fast(3), "download", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::transport("download", "refused"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
