use super::retry_policy::{GiveUpReason, RetryDecision, RetryPolicy};
use crate::error::Result;
use std::future::Future;
use tracing::{debug, warn};

/// Result of running an operation under a retry policy
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    /// Attempts actually made, including the first
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `operation` until it succeeds or the policy gives up
///
/// The closure receives the 1-based attempt number. Backoff sleeps use
/// `tokio::time`, so paused-clock tests run instantly.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "✅ Operation succeeded after retry"
                    );
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(error) => match policy.decide(&error, attempt) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "🔁 Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp { reason } => {
                    match reason {
                        GiveUpReason::NotRetryable => debug!(
                            operation = operation_name,
                            attempt = attempt,
                            error_kind = %error.kind(),
                            "Error is not retryable"
                        ),
                        GiveUpReason::Exhausted => warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %error,
                            "❌ Retry attempts exhausted"
                        ),
                    }
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                    };
                }
            },
        }
    }
}
