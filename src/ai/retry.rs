use std::future::Future;
use std::time::Duration;

use super::client::AiError;
use crate::config::AiRetryConfig;

/// Bounded retry with a fixed delay and a per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl From<&AiRetryConfig> for RetryPolicy {
    fn from(cfg: &AiRetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: Duration::from_millis(cfg.delay_ms),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// One attempt, same timeout.
    pub fn single(self) -> Self {
        Self {
            max_attempts: 1,
            ..self
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned.
    pub async fn run<F, Fut, T>(&self, op_name: &str, mut op: F) -> Result<T, AiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(res) => res,
                Err(_) => Err(AiError::Timeout),
            };

            match outcome {
                Ok(v) => {
                    if attempt > 1 {
                        tracing::info!(operation = op_name, attempt, "model call succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(
                        operation = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "model call failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    tracing::error!(operation = op_name, attempt, error = %e, "model call gave up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let out = policy(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AiError::Network("reset".into()))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(out.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = policy(2)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AiError::Timeout)
            })
            .await;
        assert!(matches!(out, Err(AiError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = policy(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AiError::Status { status: 400, body: "bad".into() })
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempt_times_out() {
        let out: Result<(), _> = policy(1)
            .run("test", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(out, Err(AiError::Timeout)));
    }

    #[test]
    fn zero_attempts_is_clamped() {
        let cfg = AiRetryConfig { max_attempts: 0, delay_ms: 10, timeout_secs: 1 };
        assert_eq!(RetryPolicy::from(&cfg).max_attempts, 1);
    }
}
