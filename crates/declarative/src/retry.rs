//! Retry logic with exponential backoff for transient provider errors.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Callback for retry progress notifications.
pub trait RetryCallback: Send + Sync {
    /// Called before sleeping ahead of the next attempt.
    ///
    /// `attempt` is the 1-indexed attempt that just failed.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &ProviderError, _delay: Duration) {}
}

/// Outcome of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,
    /// Attempts actually made
    pub attempts: u32,
    /// Backoff was interrupted by cancellation
    pub cancelled: bool,
}

/// Execute an operation with retry logic.
///
/// Transient errors are retried with exponential backoff until
/// `max_attempts` is reached; permanent errors return immediately. The wait
/// between attempts ends early when `cancel` fires, returning the last error.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    callback: &dyn RetryCallback,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    cancelled: false,
                };
            }
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            return RetryOutcome {
                result: Err(error),
                attempts: attempt,
                cancelled: false,
            };
        }

        let delay = config.delay_for_attempt(attempt - 1);
        callback.on_retry(attempt, max_attempts, &error, delay);

        tokio::select! {
            () = cancel.cancelled() => {
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                    cancelled: true,
                };
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::new(5, Duration::from_secs(1), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        // capped at max_delay
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_with_retry_success_first_try() {
        let outcome = with_retry(
            &RetryConfig::no_retry(),
            &CancellationToken::new(),
            &NoCallback,
            || async { Ok::<_, ProviderError>(42) },
        )
        .await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> =
            with_retry(&fast(), &CancellationToken::new(), &NoCallback, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::permanent("invalid cidr")) }
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_eventual_success() {
        let calls = AtomicU32::new(0);
        let outcome = with_retry(&fast(), &CancellationToken::new(), &NoCallback, || {
            let current = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if current < 2 {
                    Err(ProviderError::transient("throttled"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_with_retry_all_attempts_fail() {
        let outcome: RetryOutcome<()> =
            with_retry(&fast(), &CancellationToken::new(), &NoCallback, || async {
                Err(ProviderError::transient("throttled"))
            })
            .await;

        assert!(matches!(outcome.result, Err(ProviderError::Transient { .. })));
        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_callback_invoked() {
        struct CountingCallback(Arc<AtomicU32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: u32, _: u32, _: &ProviderError, _: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let callback = CountingCallback(Arc::clone(&count));
        let _: RetryOutcome<()> =
            with_retry(&fast(), &CancellationToken::new(), &callback, || async {
                Err(ProviderError::transient("throttled"))
            })
            .await;

        // not after the last attempt
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(60),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome: RetryOutcome<()> = with_retry(&config, &cancel, &NoCallback, || async {
            Err(ProviderError::transient("throttled"))
        })
        .await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.attempts, 1);
    }
}
