use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::RetryPolicy;
use crate::error::EngineError;
use crate::types::AttemptRecord;

/// Result of a retried operation together with its attempt history.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, EngineError>,
    pub attempts: Vec<AttemptRecord>,
}

/// Runs an operation until it succeeds, fails fatally, or the attempt cap is hit.
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl RetryExecutor {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: None,
        }
    }

    /// Abort in-flight attempts and retry waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn guarded<T>(
        &self,
        fut: impl Future<Output = Result<T, EngineError>>,
        what: &str,
    ) -> Result<T, EngineError> {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(EngineError::Cancelled(format!("cancelled {what}"))),
                r = fut => r,
            },
            None => fut.await,
        }
    }

    /// Execute `operation`, passing the 1-based attempt number.
    ///
    /// The returned history has one record per attempt; the last error is
    /// preserved when every attempt fails.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempts = Vec::new();
        let mut attempt_index: u32 = 0;

        loop {
            let attempt = attempt_index + 1;
            let started = Instant::now();
            let result = self.guarded(operation(attempt), "during request").await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let error = match result {
                Ok(value) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        status: None,
                        error: None,
                        retryable: false,
                        delay_ms: None,
                        elapsed_ms,
                    });
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => e,
            };

            let retryable =
                !matches!(error, EngineError::Cancelled(_)) && self.policy.should_retry(&error);
            let decision = if retryable {
                self.policy.decide(&error, attempt_index)
            } else {
                super::RetryDecision {
                    should_retry: false,
                    delay_ms: 0,
                }
            };
            attempts.push(AttemptRecord {
                attempt,
                status: error.status_code(),
                error: Some(error.to_string()),
                retryable,
                delay_ms: decision.should_retry.then_some(decision.delay_ms),
                elapsed_ms,
            });

            if !decision.should_retry {
                if retryable {
                    tracing::warn!(attempts = attempt, error = %error, "retry attempts exhausted");
                }
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }

            tracing::warn!(
                state = "RETRY_WAIT",
                attempt,
                status = ?error.status_code(),
                delay_ms = decision.delay_ms,
                error = %error,
                "attempt failed, retrying"
            );
            let delay = Duration::from_millis(decision.delay_ms);
            let wait = async {
                sleep(delay).await;
                Ok(())
            };
            if let Err(cancelled) = self.guarded(wait, "while waiting to retry").await {
                return RetryOutcome {
                    result: Err(cancelled),
                    attempts,
                };
            }
            attempt_index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fast()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let outcome = RetryExecutor::new(quick(15))
            .execute(move |_| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(EngineError::api_error(500, "boom"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts.len(), 4);
        assert_eq!(outcome.attempts[0].status, Some(500));
        assert!(outcome.attempts[0].delay_ms.is_some());
        assert_eq!(outcome.attempts[3].error, None);
    }

    #[tokio::test]
    async fn fatal_errors_stop_immediately() {
        let outcome: RetryOutcome<()> = RetryExecutor::new(quick(5))
            .execute(|_| async { Err(EngineError::api_error(404, "nope")) })
            .await;
        assert!(matches!(outcome.result, Err(EngineError::ApiError { code: 404, .. })));
        assert_eq!(outcome.attempts.len(), 1);
        assert!(!outcome.attempts[0].retryable);
    }

    #[tokio::test]
    async fn keeps_last_error_when_exhausted() {
        let outcome: RetryOutcome<()> = RetryExecutor::new(quick(3))
            .execute(|n| async move { Err(EngineError::api_error(503, format!("attempt {n}"))) })
            .await;
        assert_eq!(outcome.attempts.len(), 3);
        assert!(outcome.result.unwrap_err().to_string().contains("attempt 3"));
        assert_eq!(outcome.attempts[2].delay_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_retry_wait() {
        let token = CancellationToken::new();
        let policy = RetryPolicy::normal().with_max_attempts(5);
        let executor = RetryExecutor::new(policy).with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let outcome: RetryOutcome<()> = executor
            .execute(|_| async { Err(EngineError::api_error(500, "down")) })
            .await;
        canceller.await.unwrap();
        assert!(matches!(outcome.result, Err(EngineError::Cancelled(_))));
        assert_eq!(outcome.attempts.len(), 1);
    }
}
