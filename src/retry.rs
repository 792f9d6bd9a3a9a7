use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::common::Cancelled;
use crate::ui::prelude::*;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given zero-based failed attempt.
    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Run `op` until it succeeds or attempts run out, sleeping with
    /// exponential backoff in between. Returns the last error, or
    /// [`Cancelled`] as soon as the token fires.
    pub async fn run<T, F, Fut>(&self, token: &CancellationToken, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            if token.is_cancelled() {
                return Err(Cancelled.into());
            }

            let result = tokio::select! {
                _ = token.cancelled() => return Err(Cancelled.into()),
                result = op() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if crate::common::is_cancelled(&err) {
                        return Err(err);
                    }
                    emit(
                        Level::Debug,
                        "retry.attempt_failed",
                        &format!("{label}: attempt {}/{attempts} failed: {err:#}", attempt + 1),
                        None,
                    );
                    last_err = Some(err);
                }
            }

            if attempt + 1 < attempts {
                tokio::select! {
                    _ = token.cancelled() => return Err(Cancelled.into()),
                    _ = tokio::time::sleep(self.delay_after(attempt)) => {}
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{label}: no attempts made")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(0), Duration::from_millis(300));
        assert_eq!(policy.delay_after(1), Duration::from_millis(600));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = fast()
            .run(&token, "flaky", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("temporary");
                    }
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let err = fast()
            .run(&token, "broken", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(anyhow::anyhow!("failure {n}")) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);
        let err = fast()
            .run(&token, "cancelled", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert!(crate::common::is_cancelled(&err));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
