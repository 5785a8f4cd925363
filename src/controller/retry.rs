//! Conflict retry combinator
//!
//! Node updates race the kubelet and the other controller tasks, so every
//! writer re-fetches and retries under a bounded, jittered backoff instead
//! of blind-overwriting. The combinator takes the whole
//! fetch-mutate-write sequence as a closure; no state is carried between
//! attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::Result;

/// Bounded exponential backoff with full jitter
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first.
    pub steps: u32,
    /// Base delay; attempt `n` sleeps for a random duration up to
    /// `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            steps: 20,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl BackoffPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let cap = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(10)));
        if cap.is_zero() {
            return cap;
        }
        rand::thread_rng().gen_range(Duration::ZERO..=cap)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
///
/// Conflicts and transient API failures are not distinguished; both
/// consume an attempt. The last error is returned on exhaustion.
pub async fn retry_on_conflict<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt + 1 < policy.steps => {
                debug!("retrying node update after attempt {}: {}", attempt + 1, err);
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> Error {
        Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }))
    }

    fn fast_policy(steps: u32) -> BackoffPolicy {
        BackoffPolicy {
            steps,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_conflicts() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(&fast_policy(5), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_step_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(&fast_policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(&fast_policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::MissingProviderId("node-a".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::MissingProviderId(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
