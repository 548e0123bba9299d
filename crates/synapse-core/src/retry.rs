//! Retry with exponential backoff and cooperative cancellation.
//!
//! [`RetryPolicy::execute`] wraps one asynchronous worker operation. Transient
//! failures (including invalid output) are retried after
//! `base_delay * 2^(attempt-1)`; fatal failures abort at once and are returned
//! unchanged. Cancellation is observed both while the operation runs and
//! during the backoff sleep.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::worker::WorkerError;

/// Terminal outcomes of a retried operation other than success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// Every attempt failed with a retryable error; wraps the last one.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: WorkerError },

    /// The operation reported a non-retryable failure.
    #[error("{0}")]
    Fatal(WorkerError),

    /// Cancellation was requested before the operation could finish.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

/// Result type for retried operations.
pub type RetryResult<T> = std::result::Result<Succeeded<T>, RetryError>;

/// A successful value plus the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Succeeded<T> {
    pub value: T,
    /// 1-indexed attempt number that succeeded.
    pub attempts: u32,
}

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Never below 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    pub base_delay: Duration,
    /// Optional upper bound on a single backoff delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Backoff applied after failed attempt number `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Run `operation` until it succeeds, fails fatally, runs out of attempts
    /// or `cancel` fires.
    ///
    /// `operation` receives the 1-indexed attempt number.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> RetryResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, WorkerError>>,
    {
        let max_attempts = self.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    attempts: attempt - 1,
                });
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                result = operation(attempt) => result,
            };

            let err = match result {
                Ok(value) => {
                    return Ok(Succeeded {
                        value,
                        attempts: attempt,
                    })
                }
                Err(err) if !err.is_retryable() => return Err(RetryError::Fatal(err)),
                Err(err) => err,
            };

            if attempt == max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                attempt = attempt,
                max_attempts = max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after retryable failure"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // max_attempts >= 1, so the loop always returns.
        Err(RetryError::Cancelled { attempts: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_respects_cap() {
        let policy =
            RetryPolicy::new(10, Duration::from_millis(100)).with_max_delay(Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
        assert_eq!(policy.delay_for(30), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert!(policy.max_delay.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_twice_then_success_observes_backoff() {
        let base = Duration::from_millis(100);
        let policy = RetryPolicy::new(3, base);
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let started = Arc::new(Mutex::new(Vec::new()));

        let result = policy
            .execute(&cancel, |_attempt| {
                let counter = Arc::clone(&counter);
                let started = Arc::clone(&started);
                async move {
                    started.lock().unwrap().push(tokio::time::Instant::now());
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(WorkerError::Transient("not yet".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        let started = started.lock().unwrap();
        assert_eq!(started[1] - started[0], base);
        assert_eq!(started[2] - started[1], base * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_returns_after_single_attempt() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let counter = AtomicU32::new(0);

        let err = policy
            .execute(&cancel, |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(WorkerError::Fatal("malformed input".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            err,
            RetryError::Fatal(WorkerError::Fatal("malformed input".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_failure() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let cancel = CancellationToken::new();

        let err = policy
            .execute(&cancel, |attempt| async move {
                Err::<(), _>(WorkerError::InvalidOutput(format!("attempt {attempt}")))
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RetryError::Exhausted {
                attempts: 2,
                last: WorkerError::InvalidOutput("attempt 2".into()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_is_not_exhaustion() {
        let policy = RetryPolicy::new(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = policy
            .execute(&cancel, |_| async {
                Err::<(), _>(WorkerError::Transient("quota".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(err, RetryError::Cancelled { attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_operation_aborts_it() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = policy
            .execute(&cancel, |_| std::future::pending::<Result<(), WorkerError>>())
            .await
            .unwrap_err();

        assert_eq!(err, RetryError::Cancelled { attempts: 1 });
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = AtomicU32::new(0);

        let err = policy
            .execute(&cancel, |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, WorkerError>(()) }
            })
            .await
            .unwrap_err();

        assert_eq!(err, RetryError::Cancelled { attempts: 0 });
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
