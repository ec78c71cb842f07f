//! Transaction retry runner.
//!
//! Each attempt runs one whole unit of work under a timeout. Conflicts
//! (serialization failures, refund races) restart the unit of work after an
//! exponential backoff with jitter from `backon`; every other error, and a
//! timeout, is returned immediately.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::error::EngineError;

/// 트랜잭션 재시도 정책
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최초 시도 포함 최대 시도 횟수
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// 시도 1회당 제한 시간 (락 대기 포함)
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_backoff)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}

/// `op`을 재시도 정책에 따라 실행
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delays = policy.backoff().build();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, attempt, "transaction timed out");
                return Err(EngineError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: policy.timeout.as_millis() as u64,
                });
            }
        };

        match result {
            Err(err) if err.is_retryable() => {
                if attempt >= max_attempts {
                    tracing::warn!(operation, attempt, error = %err, "giving up after conflicts");
                    return Err(EngineError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                    });
                }
                let delay = delays.next().unwrap_or(policy.max_backoff);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transaction conflict, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_conflicts() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&fast_policy(3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(EngineError::Conflict("40001".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&fast_policy(2), "draw", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Conflict("40001".into())) }
        })
        .await;

        assert!(matches!(
            result,
            Err(EngineError::RetriesExhausted { attempts: 2, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&fast_policy(5), "draw", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(EngineError::InsufficientStock {
                    requested: 10,
                    remaining: 1,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(EngineError::InsufficientStock { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_fatal() {
        let calls = AtomicU32::new(0);
        let mut policy = fast_policy(5);
        policy.timeout = Duration::from_millis(20);

        let result: Result<(), _> = run_with_retry(&policy, "draw", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(EngineError::Timeout { timeout_ms: 20, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
