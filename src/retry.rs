//! Bounded, fixed-interval polling.
//!
//! Used wherever the job has to wait for cluster state to converge: pool
//! deployments scaling to zero, CSPIs coming ONLINE, workload rollouts.
//! There is no backoff and no jitter; the attempt count is the contract.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::error::SmuError;

/// Attempts and spacing for one polling operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// 60 attempts at 5 second spacing, a five minute ceiling.
    pub const DEFAULT: Self = Self {
        attempts: 60,
        interval: Duration::from_secs(5),
    };

    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Call `probe` until it returns `Ok` or the policy's attempts run out.
///
/// Sleeps `interval` between attempts, never after the last one. On
/// exhaustion returns [`SmuError::Timeout`] carrying the last probe error.
/// A policy with zero attempts still probes once.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut probe: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match probe(attempt).await {
            Ok(value) => {
                debug!(operation, attempt, "Converged");
                return Ok(value);
            }
            Err(e) if attempt >= attempts => {
                warn!(operation, attempt, error = %e, "Giving up");
                return Err(SmuError::Timeout {
                    operation: operation.to_string(),
                    attempts,
                    last_error: format!("{e:#}"),
                }
                .into());
            }
            Err(e) => {
                debug!(operation, attempt, error = %e, "Not converged yet");
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let value = retry(&policy, "op", |_| async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let policy = RetryPolicy::new(5, Duration::from_secs(5));
        let value = retry(&policy, "op", |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("not yet")
                }
                Ok("done")
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_with_last_error() {
        let policy = RetryPolicy::DEFAULT;
        let start = tokio::time::Instant::now();

        let err = retry(&policy, "scale down", |attempt| async move {
            Err::<(), _>(anyhow::anyhow!("ready replicas still 1 at attempt {attempt}"))
        })
        .await
        .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(295));
        assert!(elapsed <= Duration::from_secs(300));

        match err.downcast_ref::<SmuError>() {
            Some(SmuError::Timeout {
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(*attempts, 60);
                assert!(last_error.contains("attempt 60"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_probes_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let policy = RetryPolicy::new(0, Duration::from_secs(1));

        let result: Result<()> = retry(&policy, "op", |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("nope")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(RetryPolicy::default().attempts, 60);
        assert_eq!(RetryPolicy::default().interval, Duration::from_secs(5));
    }
}
