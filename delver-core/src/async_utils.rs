//! Async utilities and patterns
//!
//! Provides common async patterns, retry logic, and concurrency control

use crate::error::{DelverError, DelverResult, ErrorContext};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: usize,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier (exponential backoff)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry an async operation with exponential backoff. The operation may
/// borrow from its environment; retries reinvoke the closure.
pub async fn retry_async<'a, F, T, E>(
    operation: F,
    config: RetryConfig,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> BoxFuture<'a, Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay_ms;

    loop {
        attempt += 1;

        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retry attempts"
                    );
                    return Err(error);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay,
                    "Operation failed, retrying"
                );

                // Calculate next delay with exponential backoff
                let actual_delay = if config.jitter {
                    let jitter_factor = 0.1;
                    let jitter = (fastrand::f64() - 0.5) * 2.0 * jitter_factor;
                    ((delay as f64) * (1.0 + jitter)) as u64
                } else {
                    delay
                };

                sleep(Duration::from_millis(actual_delay)).await;

                delay = ((delay as f64) * config.backoff_multiplier) as u64;
                delay = delay.min(config.max_delay_ms);
            }
        }
    }
}

/// Timeout wrapper for async operations
pub async fn with_timeout<F, T>(future: F, timeout_ms: u64, operation_name: &str) -> DelverResult<T>
where
    F: std::future::Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(DelverError::Timeout {
            operation: operation_name.to_string(),
            duration_ms: timeout_ms,
            context: ErrorContext::new("async_utils")
                .with_operation("timeout")
                .with_metadata("timeout_ms", &timeout_ms.to_string())
                .with_suggestion("Increase timeout duration")
                .with_suggestion("Check network connectivity"),
        }),
    }
}

/// Concurrent processing with controlled parallelism
pub async fn process_concurrently<T, R, F, Fut>(
    items: Vec<T>,
    max_concurrent: usize,
    processor: F,
) -> Vec<DelverResult<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = DelverResult<R>> + Send + 'static,
{
    use futures::stream::{self, StreamExt};

    stream::iter(items)
        .map(|item| {
            let processor = processor.clone();
            tokio::spawn(async move { processor(item).await })
        })
        .buffer_unordered(max_concurrent)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|join_result| match join_result {
            Ok(result) => result,
            Err(join_error) => Err(DelverError::Internal {
                message: format!("Task join error: {}", join_error),
                source: Some(Box::new(join_error)),
                context: ErrorContext::new("async_utils")
                    .with_operation("process_concurrently")
                    .with_suggestion("Check for panics in concurrent tasks"),
            }),
        })
        .collect()
}

/// Rate limiter for API calls
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<tokio::sync::Semaphore>,
    min_interval: Duration,
    last_request: Arc<tokio::sync::Mutex<Option<tokio::time::Instant>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(max_concurrent: usize, min_interval_ms: u64) -> Self {
        Self {
            permits: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
            min_interval: Duration::from_millis(min_interval_ms),
            last_request: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Acquire a permit and enforce rate limiting
    pub async fn acquire(&self) -> DelverResult<RateLimitGuard> {
        let permit =
            self.permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DelverError::Internal {
                    message: format!("Failed to acquire rate limit permit: {}", e),
                    source: Some(Box::new(e)),
                    context: ErrorContext::new("rate_limiter").with_operation("acquire"),
                })?;

        // Enforce minimum interval
        let mut last_request = self.last_request.lock().await;
        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let sleep_duration = self.min_interval - elapsed;
                debug!(
                    sleep_ms = sleep_duration.as_millis(),
                    "Rate limiting: sleeping to enforce minimum interval"
                );
                sleep(sleep_duration).await;
            }
        }
        *last_request = Some(tokio::time::Instant::now());

        Ok(RateLimitGuard { _permit: permit })
    }
}

/// RAII guard for rate limiter permits
pub struct RateLimitGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_async_recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<u32, DelverError> = retry_async(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DelverError::search("transient provider hiccup", "test"))
                    } else {
                        Ok(7)
                    }
                }
                .boxed()
            },
            RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            "transient_op",
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_async_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<u32, DelverError> = retry_async(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(DelverError::search("always down", "test"))
                }
                .boxed()
            },
            RetryConfig {
                max_attempts: 2,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            "doomed_op",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn with_timeout_passes_fast_futures_through() {
        let result = with_timeout(async { 42 }, 1000, "fast").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn with_timeout_expires_on_slow_futures() {
        let result = with_timeout(
            async {
                sleep(Duration::from_millis(200)).await;
                42
            },
            10,
            "slow",
        )
        .await;
        assert!(matches!(result, Err(DelverError::Timeout { .. })));
    }

    #[tokio::test]
    async fn process_concurrently_preserves_all_results() {
        let results =
            process_concurrently(vec![1u32, 2, 3, 4], 2, |n| async move { Ok(n * 10) }).await;
        let mut values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        values.sort();
        assert_eq!(values, vec![10, 20, 30, 40]);
    }
}
