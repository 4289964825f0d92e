//! Fixed-delay retry policy shared by metadata and stream fetches.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_retry2::strategy::FixedInterval;
use tokio_retry2::{Retry, RetryError};
use tracing::warn;

use super::errors::DownloadError;

/// Attempt budget and inter-attempt delay.
///
/// Errors for which [`DownloadError::is_retryable`] is false stop the loop
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: usize,
    delay: Duration,
}

impl RetryPolicy {
    /// Metadata lookup while building the preview.
    pub const PREVIEW_METADATA: Self = Self::new(10, Duration::from_secs(5));
    /// Metadata re-resolution when a deferred job runs.
    pub const FETCH_METADATA: Self = Self::new(5, Duration::from_secs(3));
    /// Stream byte download.
    pub const STREAM: Self = Self::new(5, Duration::from_secs(3));

    /// `attempts` is clamped to at least one.
    pub const fn new(attempts: usize, delay: Duration) -> Self {
        Self {
            attempts: if attempts == 0 { 1 } else { attempts },
            delay,
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self::new(self.attempts, delay)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    /// Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, DownloadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let strategy = FixedInterval::new(self.delay).take(self.attempts - 1);
        let attempt = AtomicUsize::new(0);
        let attempts = self.attempts;

        Retry::spawn(strategy, || {
            let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() && n < attempts => {
                        warn!(operation, attempt = n, max_attempts = attempts, error = %e, "attempt failed, retrying");
                        Err(RetryError::Transient {
                            err: e,
                            retry_after: None,
                        })
                    }
                    Err(e) => Err(RetryError::Permanent(e)),
                }
            }
        })
        .await
    }
}
