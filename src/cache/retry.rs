use log::{error, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::cache::entry::CacheValue;
use crate::config::CacheConfig;
use crate::error::Error;
use crate::metrics;

/// Fixed-delay retry schedule shared by every cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Upper bound on one attempt; a slower attempt counts as a network failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

/// How one cache treats its entries over time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachePolicy {
    pub stale_time: Duration,
    /// `None` disables periodic polling.
    pub refetch_interval: Option<Duration>,
    /// How long an unobserved entry is kept after its last use.
    pub gc_time: Duration,
    pub retry: RetryPolicy,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            refetch_interval: Some(Duration::from_secs(60)),
            gc_time: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            stale_time: Duration::from_secs(config.stale_time_secs),
            refetch_interval: Some(Duration::from_secs(config.refetch_interval_secs)),
            gc_time: Duration::from_secs(config.gc_time_secs),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Price histories: longer stale time and no polling.
    pub fn history_from_config(config: &CacheConfig) -> Self {
        Self {
            stale_time: Duration::from_secs(config.history_stale_time_secs),
            refetch_interval: None,
            gc_time: Duration::from_secs(config.gc_time_secs),
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// Result of a whole retry sequence.
#[derive(Debug, Clone)]
pub enum FetchOutcome<V> {
    Success { value: V, attempts: u32 },
    /// `fallback` holds the last soft-failed value (synthetic data), if any.
    Failed { error: Error, fallback: Option<V>, attempts: u32 },
}

impl RetryPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
            attempt_timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }

    /// Runs `op` until it yields a value without a failure marker or the
    /// attempts run out. Every attempt terminates within `attempt_timeout`.
    pub async fn run<V, F, Fut>(&self, label: &str, op: F) -> FetchOutcome<V>
    where
        V: CacheValue,
        F: Fn() -> Fut,
        Fut: Future<Output = crate::error::Result<V>> + Send + 'static,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = Error::Internal("no fetch attempted".into());
        let mut fallback = None;

        for attempt in 1..=max_attempts {
            metrics::CACHE_FETCH_ATTEMPTS.inc();
            match self.attempt(op()).await {
                Ok(value) => match value.failure() {
                    None => return FetchOutcome::Success { value, attempts: attempt },
                    Some(e) => {
                        last_error = e;
                        fallback = Some(value);
                    }
                },
                Err(e) => last_error = e,
            }

            warn!(
                "Fetch attempt {}/{} for {} failed: {}",
                attempt, max_attempts, label, last_error
            );
            if attempt < max_attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        metrics::CACHE_FETCH_FAILURES.inc();
        error!("Giving up on {} after {} attempts: {}", label, max_attempts, last_error);
        FetchOutcome::Failed { error: last_error, fallback, attempts: max_attempts }
    }

    async fn attempt<V, Fut>(&self, fut: Fut) -> crate::error::Result<V>
    where
        V: Send + 'static,
        Fut: Future<Output = crate::error::Result<V>> + Send + 'static,
    {
        // A panicking fetcher must still end the attempt.
        let mut handle = tokio::spawn(fut);
        match timeout(self.attempt_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Error::Internal(format!("fetch task failed: {}", join_error))),
            Err(_) => {
                handle.abort();
                Err(Error::NetworkFailure(format!(
                    "fetch timed out after {}ms",
                    self.attempt_timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sourced;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let outcome = policy()
            .run("test", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::NetworkFailure("flaky".into()))
                    } else {
                        Ok(Sourced::live(7u32, "stub"))
                    }
                }
            })
            .await;

        match outcome {
            FetchOutcome::Success { value, attempts } => {
                assert_eq!(value.value, 7);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected success, got {:?}", other),
        }
        // Two fixed delays between three attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_values_count_as_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let cause = Error::MalformedResponse("bad".into());
        let outcome = policy()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                let cause = cause.clone();
                async move { Ok(Sourced::synthetic(1u32, &cause)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match outcome {
            FetchOutcome::Failed { error, fallback, attempts } => {
                assert_eq!(error, cause);
                assert_eq!(attempts, 3);
                assert!(fallback.unwrap().is_synthetic());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out() {
        let outcome = RetryPolicy { max_attempts: 1, ..policy() }
            .run("test", || async {
                std::future::pending::<()>().await;
                Ok(Sourced::live(0u32, "never"))
            })
            .await;

        match outcome {
            FetchOutcome::Failed { error, fallback, .. } => {
                assert!(matches!(error, Error::NetworkFailure(_)));
                assert!(fallback.is_none());
            }
            other => panic!("expected timeout failure, got {:?}", other),
        }
    }

    #[test]
    fn test_policies_from_config() {
        let config = CacheConfig::default();
        let list = CachePolicy::from_config(&config);
        assert_eq!(list.stale_time, Duration::from_secs(30));
        assert_eq!(list.refetch_interval, Some(Duration::from_secs(60)));
        assert_eq!(list.retry.max_attempts, 3);
        assert_eq!(list.retry.delay, Duration::from_secs(1));

        let history = CachePolicy::history_from_config(&config);
        assert_eq!(history.stale_time, Duration::from_secs(300));
        assert_eq!(history.refetch_interval, None);
    }
}
