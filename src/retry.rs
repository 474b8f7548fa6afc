//! Retry with exponential backoff
//!
//! Used by [`crate::service::RetryLayer`] around oracle calls and tool
//! invocations. Only errors for which [`crate::AgentsError::is_retryable`] holds are
//! re-attempted.

use crate::config::RetryConfig;
use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempt counter and delay schedule for one retried operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt: usize,
    next_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            next_delay: config.initial_delay.min(config.max_delay),
            config,
            attempt: 0,
        }
    }

    pub fn should_retry(&self) -> bool {
        self.attempt < self.config.max_retries
    }

    /// Retries taken so far
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn max_retries(&self) -> usize {
        self.config.max_retries
    }

    /// Delay before the next attempt. Grows by `backoff_multiplier` per call,
    /// capped at `max_delay`. A multiplier below one, or one that is not a
    /// number, keeps the delay constant.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next_delay;
        self.attempt += 1;

        let factor = match self.config.backoff_multiplier {
            m if m.is_finite() && m >= 1.0 => f64::from(m),
            _ => 1.0,
        };
        let grown = base.as_secs_f64() * factor;
        self.next_delay = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);

        if self.config.jitter {
            use rand::Rng;
            let spread = rand::thread_rng().gen_range(0.0..0.3);
            base + base.mul_f64(spread)
        } else {
            base
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config)
    }
}

/// Retries `operation` while its error is retryable, `replayable()` still
/// holds and the policy has attempts left.
///
/// `operation_name` labels the retried operation in log lines.
pub async fn retry_async<F, Fut, T, P>(
    operation_name: &str,
    mut operation: F,
    policy: &mut RetryPolicy,
    replayable: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn() -> bool,
{
    loop {
        match operation().await {
            Ok(result) => {
                if policy.attempt() > 0 {
                    debug!(
                        operation = operation_name,
                        "Succeeded after {} attempts",
                        policy.attempt() + 1
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !error.is_retryable() {
                    return Err(error);
                }

                if !replayable() {
                    debug!(
                        operation = operation_name,
                        error = %error,
                        "Not retrying: output of the failed attempt was already delivered"
                    );
                    return Err(error);
                }

                if !policy.should_retry() {
                    warn!(
                        operation = operation_name,
                        "Max retries ({}) exceeded. Last error: {}",
                        policy.max_retries(),
                        error
                    );
                    return Err(error);
                }

                let delay = policy.next_delay();
                warn!(
                    operation = operation_name,
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    policy.attempt(),
                    error,
                    delay
                );

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentsError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn transient(service: &str) -> AgentsError {
        AgentsError::ExternalService {
            service: service.to_string(),
            message: "transient failure".to_string(),
        }
    }

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        })
    }

    #[test]
    fn test_backoff_schedule() {
        let mut policy = RetryPolicy::new(RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        });

        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
        assert_eq!(policy.next_delay(), Duration::from_millis(200));
        assert_eq!(policy.next_delay(), Duration::from_millis(400));
        assert_eq!(policy.attempt(), 3);
        assert!(!policy.should_retry());
    }

    #[test]
    fn test_delay_is_capped() {
        let mut policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
            backoff_multiplier: 4.0,
            jitter: false,
        });
        policy.next_delay();
        assert_eq!(policy.next_delay(), Duration::from_millis(150));
    }

    #[test]
    fn test_degenerate_multipliers_keep_the_delay_constant() {
        for multiplier in [-2.0, f32::NAN, f32::INFINITY, 0.5] {
            let mut policy = RetryPolicy::new(RetryConfig {
                max_retries: 3,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(1),
                backoff_multiplier: multiplier,
                jitter: false,
            });
            for _ in 0..3 {
                assert_eq!(policy.next_delay(), Duration::from_millis(50));
            }
        }
    }

    #[tokio::test]
    async fn test_retry_async_recovers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();

        let result = retry_async(
            "flaky",
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            },
            &mut fast(3),
            || true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_max_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();

        let result = retry_async(
            "always_down",
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(transient("always_down"))
                }
            },
            &mut fast(2),
            || true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();

        let result = retry_async(
            "tool",
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(AgentsError::tool_execution("tool", "bad input"))
                }
            },
            &mut fast(5),
            || true,
        )
        .await;

        assert!(matches!(result, Err(AgentsError::ToolExecution { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delivered_output_stops_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(AtomicBool::new(false));
        let (c, d) = (counter.clone(), delivered.clone());

        let result = retry_async(
            "oracle call",
            || {
                let (c, d) = (c.clone(), d.clone());
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    d.store(true, Ordering::SeqCst);
                    Err::<i32, _>(transient("oracle"))
                }
            },
            &mut fast(5),
            || !delivered.load(Ordering::SeqCst),
        )
        .await;

        assert!(matches!(result, Err(AgentsError::ExternalService { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
