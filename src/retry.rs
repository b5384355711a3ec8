//! Retry Policy (C4): exponential backoff with jitter for the intra-session
//! reconnect loop inside a single `execute()` call — distinct from the
//! batch-level host retry in [`crate::orchestrator`].
//!
//! Built on `backon`'s `ExponentialBuilder`, the same crate the ancestor
//! server used for its connection-retry loop, but driven by hand so a
//! tripped [`crate::cancel::CancelToken`] can interrupt a pending sleep
//! instead of waiting it out.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::cancel::CancelToken;
use crate::error::ErrorKind;

/// The intra-session connect retry loop. Only consulted for errors
/// classified `NetworkTransient` or `Timeout`; anything else propagates
/// unretried. The delay before the i-th retry (i starting at 1) is
/// `base * 2^(i-1)` seconds, ±20% jitter.
pub struct RetryPolicy {
    attempts: u32,
    base: Duration,
}

pub enum RetryOutcome<T> {
    Succeeded(T),
    /// The final attempt's error, after `attempts` retries were exhausted.
    Exhausted(String),
    Cancelled,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base: Duration) -> Self {
        Self { attempts, base }
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.base)
            .with_factor(2.0)
            .with_max_times(self.attempts as usize)
            .with_jitter()
            .build()
    }

    /// Run `attempt` up to `1 + attempts` times total. `attempt` returns
    /// `Err((message, retryable_by_classifier))`; only errors where the
    /// classifier would mark the message `NetworkTransient` or `Timeout`
    /// are retried here — other failures (auth denial, key material) return
    /// immediately on the first attempt.
    pub async fn run<T, F, Fut>(&self, cancel: &CancelToken, mut attempt: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, String>>,
    {
        let mut delays = self.backoff();
        let mut last_error;

        loop {
            if cancel.is_tripped() {
                return RetryOutcome::Cancelled;
            }

            match attempt().await {
                Ok(value) => return RetryOutcome::Succeeded(value),
                Err(message) => {
                    let kind = crate::error::classify(&message).kind;
                    let connection_level_retryable =
                        matches!(kind, ErrorKind::NetworkTransient | ErrorKind::Timeout);
                    last_error = message;

                    if !connection_level_retryable {
                        return RetryOutcome::Exhausted(last_error);
                    }

                    match delays.next() {
                        Some(delay) => {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = cancel.cancelled() => return RetryOutcome::Cancelled,
                            }
                        }
                        None => return RetryOutcome::Exhausted(last_error),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retrying_on_first_try() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);

        let outcome = policy
            .run(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(42) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Succeeded(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_the_cap() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);

        let outcome = policy
            .run(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>("Connection refused".to_string()) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted(_)));
        // 1 initial + 2 retries = 3 total attempts.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);

        let outcome = policy
            .run(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>("Permission denied".to_string()) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_retry_loop() {
        let policy = RetryPolicy::new(10, Duration::from_secs(5));
        let cancel = CancelToken::new();
        cancel.trip();

        let outcome = policy
            .run(&cancel, || async { Err::<u32, _>("timeout".to_string()) })
            .await;

        assert!(matches!(outcome, RetryOutcome::Cancelled));
    }
}
