use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::WharfError;

/// Per-task retry configuration. `max_attempts` counts total attempts, so a
/// value of 1 means no retry at all. Backoff grows geometrically from
/// `interval` by `multiplier`, capped at `max_interval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: Option<RetryPolicy>) -> Self {
        let mut policy = policy.unwrap_or_default();

        if policy.max_attempts == 0 {
            policy.max_attempts = 1;
        }
        if policy.interval.is_zero() {
            policy.interval = Duration::from_secs(1);
        }
        if policy.max_interval.is_zero() {
            policy.max_interval = Duration::from_secs(30);
        }
        if policy.multiplier <= 0.0 {
            policy.multiplier = 2.0;
        }
        if policy.max_interval > Duration::from_secs(150) {
            policy.max_interval = Duration::from_secs(150);
        }

        Self { policy }
    }

    /// Runs `operation` until it succeeds or `max_attempts` is reached,
    /// sleeping the backoff delay between attempts. Cancellation interrupts
    /// both the backoff wait and the start of any further attempt.
    ///
    /// A single-attempt policy surfaces the operation's own error; once a
    /// retry actually happened, exhaustion is reported as `RetryExhausted`
    /// wrapping the last cause.
    pub async fn run<F, Fut, T>(
        &self,
        cancel: CancellationToken,
        task_name: &str,
        mut operation: F,
    ) -> Result<T, WharfError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, WharfError>>,
    {
        let attempts = self.policy.max_attempts;
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= attempts {
                        return Err(if attempts == 1 {
                            err
                        } else {
                            WharfError::RetryExhausted {
                                task: task_name.to_string(),
                                attempts,
                                source: Box::new(err),
                            }
                        });
                    }
                    let wait = self.backoff(attempt);
                    warn!(
                        task = %task_name,
                        attempt,
                        backoff_ms = wait.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off before retry"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(WharfError::Cancelled),
                        _ = sleep(wait) => {}
                    }
                }
            }

            attempt += 1;
            if cancel.is_cancelled() {
                return Err(WharfError::Cancelled);
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let secs =
            self.policy.interval.as_secs_f64() * self.policy.multiplier.powi(attempt as i32 - 1);
        let wait = Duration::from_secs_f64(secs);

        if wait > self.policy.max_interval {
            self.policy.max_interval
        } else {
            wait
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
            interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let exec = RetryExecutor::new(Some(RetryPolicy {
            max_attempts: 5,
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(4),
            multiplier: 2.0,
        }));
        assert_eq!(exec.backoff(1), Duration::from_secs(1));
        assert_eq!(exec.backoff(2), Duration::from_secs(2));
        assert_eq!(exec.backoff(3), Duration::from_secs(4));
        assert_eq!(exec.backoff(4), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn fails_once_then_succeeds() {
        let calls = AtomicU32::new(0);
        let exec = RetryExecutor::new(Some(fast_policy(3)));

        let out = exec
            .run(CancellationToken::new(), "flaky", |_attempt| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(WharfError::Warehouse("connection reset".into()))
                    } else {
                        Ok(42u64)
                    }
                }
            })
            .await;

        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_error() {
        let exec = RetryExecutor::new(Some(fast_policy(3)));

        let out: Result<(), _> = exec
            .run(CancellationToken::new(), "broken", |_attempt| async {
                Err(WharfError::Warehouse("disk full".into()))
            })
            .await;

        match out {
            Err(WharfError::RetryExhausted { task, attempts, source }) => {
                assert_eq!(task, "broken");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, WharfError::Warehouse(_)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_attempt_returns_bare_error() {
        let exec = RetryExecutor::new(None);

        let out: Result<(), _> = exec
            .run(CancellationToken::new(), "once", |_attempt| async {
                Err(WharfError::Warehouse("boom".into()))
            })
            .await;

        assert!(matches!(out, Err(WharfError::Warehouse(_))));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let exec = RetryExecutor::new(Some(RetryPolicy {
            max_attempts: 3,
            interval: Duration::from_secs(60),
            ..RetryPolicy::default()
        }));

        let out: Result<(), _> = exec
            .run(cancel, "slow", |_attempt| async {
                Err(WharfError::Warehouse("transient".into()))
            })
            .await;

        assert!(matches!(out, Err(WharfError::Cancelled)));
    }
}
