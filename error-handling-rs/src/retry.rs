//! # Retry Mechanism
//!
//! Exponential backoff with jitter for pipeline stages. Only errors whose
//! `retryable` flag is set are retried; everything else short-circuits.
//! Cancellation is checked before every attempt and while backing off.

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::supervisor::ShutdownSignal;
use crate::types::{Error, ErrorKind, Result};

/// Configuration for a retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Jitter factor (0.0 - 1.0) applied symmetrically around the backoff
    pub jitter_factor: f64,
    /// Per-attempt timeout
    pub operation_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            jitter_factor: 0.2,
            operation_timeout: None,
        }
    }
}

/// Outcome of [`RetryPolicy::retry`] with what it cost.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    /// Attempts after the first
    pub retries: u32,
    /// Total time spent sleeping between attempts
    pub backoff_total: Duration,
    pub elapsed: Duration,
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T> {
        self.result
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A policy that runs the operation exactly once.
    pub fn never() -> Self {
        Self::new(RetryConfig {
            max_retries: 0,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `min(base * 2^attempt, max)` with ± jitter, for the `attempt`-th retry
    /// (zero based).
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_backoff.as_millis() as f64;
        let max_ms = self.config.max_backoff.as_millis() as f64;

        let exp_backoff = base_ms * 2.0_f64.powi(attempt.min(30) as i32);
        let capped = exp_backoff.min(max_ms);

        let jitter_range = capped * self.config.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Runs `f` until it succeeds, fails permanently, exhausts retries or
    /// `cancel` fires.
    pub async fn retry<F, Fut, T>(
        &self,
        operation_name: &str,
        cancel: &ShutdownSignal,
        f: F,
    ) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut retries = 0u32;
        let mut backoff_total = Duration::ZERO;

        loop {
            if cancel.is_triggered() {
                return self.finish(
                    operation_name,
                    Err(cancelled(operation_name)),
                    retries,
                    backoff_total,
                    start,
                );
            }

            let result = match self.config.operation_timeout {
                Some(limit) => match tokio::time::timeout(limit, f()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout(format!(
                        "Operation '{}' timed out after {:?}",
                        operation_name, limit
                    ))
                    .context("timeout_ms", limit.as_millis() as u64)),
                },
                None => f().await,
            };

            let error = match result {
                Ok(value) => {
                    if retries > 0 {
                        info!(
                            operation = %operation_name,
                            retries = retries,
                            duration_ms = %start.elapsed().as_millis(),
                            "Operation succeeded after retries"
                        );
                    }
                    return self.finish(operation_name, Ok(value), retries, backoff_total, start);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(
                    operation = %operation_name,
                    error_kind = error.kind.label(),
                    "Permanent error, not retrying"
                );
                return self.finish(operation_name, Err(error), retries, backoff_total, start);
            }

            if retries >= self.config.max_retries {
                let error = error
                    .context("retries_exhausted", retries)
                    .permanent();
                return self.finish(operation_name, Err(error), retries, backoff_total, start);
            }

            let backoff = self.calculate_backoff(retries);
            warn!(
                operation = %operation_name,
                attempt = retries + 1,
                backoff_ms = %backoff.as_millis(),
                error_kind = error.kind.label(),
                error = %error.message,
                "Retryable error, backing off"
            );

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.triggered() => {
                    return self.finish(
                        operation_name,
                        Err(cancelled(operation_name)),
                        retries,
                        backoff_total,
                        start,
                    );
                }
            }

            retries += 1;
            backoff_total += backoff;
        }
    }

    fn finish<T>(
        &self,
        operation_name: &str,
        result: Result<T>,
        retries: u32,
        backoff_total: Duration,
        start: Instant,
    ) -> RetryOutcome<T> {
        let outcome = if result.is_ok() { "success" } else { "failure" };
        counter!("terrafix_retry_operations_total", 1, "operation" => operation_name.to_string(), "outcome" => outcome);
        if retries > 0 {
            counter!("terrafix_retries_total", retries as u64, "operation" => operation_name.to_string());
            histogram!("terrafix_retry_backoff_seconds", backoff_total.as_secs_f64(), "operation" => operation_name.to_string());
        }

        RetryOutcome {
            result,
            retries,
            backoff_total,
            elapsed: start.elapsed(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

fn cancelled(operation_name: &str) -> Error {
    Error::new(
        ErrorKind::Cancelled,
        format!("Operation '{}' cancelled", operation_name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ShutdownController;
    use crate::types::{GenerationFault, PublishFault};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            jitter_factor: 0.0,
            operation_timeout: None,
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = fast_policy(5);
        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(10));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(20));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(40));
        assert_eq!(policy.calculate_backoff(10), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(RetryConfig {
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(10),
            jitter_factor: 0.2,
            ..Default::default()
        });
        for _ in 0..50 {
            let b = policy.calculate_backoff(0).as_millis();
            assert!((800..=1200).contains(&b), "backoff {} out of range", b);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_retryable_errors_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast_policy(3);
        let never = ShutdownSignal::never();

        let outcome = policy
            .retry("generate", &never, || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        Err(Error::generation(GenerationFault::Throttled, "429"))
                    } else {
                        Ok("fix")
                    }
                }
            })
            .await;

        assert_eq!(outcome.retries, 3);
        assert_eq!(outcome.backoff_total, Duration::from_millis(10 + 20 + 40));
        assert_eq!(outcome.into_result().unwrap(), "fix");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome: RetryOutcome<()> = fast_policy(3)
            .retry("publish", &ShutdownSignal::never(), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::publish(PublishFault::Authentication, "401"))
                }
            })
            .await;

        assert_eq!(outcome.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_become_permanent() {
        let outcome: RetryOutcome<()> = fast_policy(2)
            .retry("publish", &ShutdownSignal::never(), || async {
                Err(Error::publish(PublishFault::RateLimited, "403 quota"))
            })
            .await;

        assert_eq!(outcome.retries, 2);
        let err = outcome.into_result().unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.context.get("retries_exhausted"), Some(&serde_json::json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let controller = ShutdownController::new("cancel");
        let signal = controller.signal();
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60),
            jitter_factor: 0.0,
            operation_timeout: None,
        });

        let task = tokio::spawn(async move {
            policy
                .retry("resolve", &signal, || async {
                    Err::<(), _>(Error::state_store("connection refused"))
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.trigger();

        let outcome = task.await.unwrap();
        assert!(outcome.into_result().unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout_is_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 1,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            jitter_factor: 0.0,
            operation_timeout: Some(Duration::from_millis(50)),
        });

        let outcome = policy
            .retry("validate", &ShutdownSignal::never(), || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(7)
                }
            })
            .await;

        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.into_result().unwrap(), 7);
    }
}
