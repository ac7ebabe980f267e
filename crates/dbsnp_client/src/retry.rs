//! Bounded retry with exponential backoff.
//!
//! Each attempt reports a typed [`AttemptOutcome`]; only `Transient`
//! outcomes are retried. Cancellation is observed before every attempt,
//! during the attempt, and during the backoff sleep.

use common::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a single upstream attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Worth retrying: timeout, connection failure, 5xx, 429.
    Transient(FetchError),
    /// Retrying cannot help: 404, malformed payload, other 4xx.
    Fatal(FetchError),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for every subsequent one.
    pub base_delay: Duration,
    /// Add uniform jitter in `[0, delay/2]` to each backoff.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: true,
        }
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max_jitter_ms = (delay.as_millis() / 2) as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Drive `attempt` until it succeeds, fails fatally, the attempt budget is
/// spent, or `cancel` fires. `attempt` receives the 1-based attempt number.
pub async fn run<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut n = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled());
        }
        n += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::cancelled()),
            outcome = attempt(n) => outcome,
        };

        let err = match outcome {
            AttemptOutcome::Success(value) => {
                if n > 1 {
                    debug!("Upstream call succeeded on attempt {}", n);
                }
                return Ok(value);
            }
            AttemptOutcome::Fatal(err) => return Err(err),
            AttemptOutcome::Transient(err) => err,
        };

        if n >= max_attempts {
            warn!("Giving up after {} attempts: {}", n, err);
            return Err(FetchError::transient(format!(
                "{} (after {} attempts)",
                err.message, n
            )));
        }

        let delay = policy.delay_for(n);
        warn!(
            "Attempt {}/{} failed: {}; retrying in {}ms",
            n,
            max_attempts,
            err,
            delay.as_millis()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::cancelled()),
            _ = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FetchErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(500),
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = no_jitter(3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_jitter_stays_within_half_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        for _ in 0..100 {
            let d = policy.delay_for(2);
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(1500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_stops_after_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result: Result<(), FetchError> = run(&no_jitter(3), &cancel, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                AttemptOutcome::Transient(FetchError::transient("HTTP 503"))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result: Result<(), FetchError> = run(&no_jitter(3), &cancel, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                AttemptOutcome::Fatal(FetchError::not_found("rs1"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, FetchErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let cancel = CancellationToken::new();

        let result = run(&no_jitter(3), &cancel, |n| async move {
            if n < 3 {
                AttemptOutcome::Transient(FetchError::transient("reset"))
            } else {
                AttemptOutcome::Success(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_returns_promptly() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            jitter: false,
        };

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let result: Result<(), FetchError> = run(&policy, &cancel, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                AttemptOutcome::Transient(FetchError::transient("timeout"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, FetchErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), FetchError> = run(&no_jitter(3), &cancel, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                AttemptOutcome::Success(())
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, FetchErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
