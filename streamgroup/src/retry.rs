//! Retry policy applied to application callback invocations.
//!
//! The policy retries a failing callback with exponential backoff before the
//! failure is handed to the ack/partial-behavior classification. Retries are
//! internal: they never count as separate consume attempts.

use crate::errors::HandlerError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry configuration for callback invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between attempts (exponential backoff cap).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to spread retries of many consumers.
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }

    /// `max_attempts` attempts with doubling delays starting at `base_delay`.
    pub const fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }

    /// Adds jitter to every delay.
    #[must_use]
    pub const fn with_jitter(mut self) -> Self {
        self.use_jitter = true;
        self
    }

    /// Caps every delay at `max_delay`.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after the `failed_attempt`-th failure (1-based).
    pub fn calculate_delay(&self, failed_attempt: u32) -> Duration {
        if failed_attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failed_attempt - 1).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.use_jitter {
            add_jitter(delay)
        } else {
            delay
        }
    }

    /// Runs `operation` until it succeeds, attempts run out, or `cancellation` fires.
    ///
    /// The closure receives the 1-based attempt number. The last failure is
    /// returned when the policy gives up.
    pub async fn run<F, Fut, T>(
        &self,
        cancellation: &CancellationToken,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, HandlerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation_name, attempt, "succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) if attempt >= attempts => return Err(error),
                Err(error) => {
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        operation_name,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "attempt failed, retrying"
                    );

                    tokio::select! {
                        () = cancellation.cancelled() => return Err(error),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

fn add_jitter(delay: Duration) -> Duration {
    let jitter_factor = rand::rng().random_range(0.8..1.2);
    Duration::try_from_secs_f64(delay.as_secs_f64() * jitter_factor).unwrap_or(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delays_grow_exponentially_and_are_capped() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));

        assert_eq!(policy.calculate_delay(0), Duration::ZERO);
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(350));
        assert_eq!(policy.calculate_delay(60), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(100)).with_jitter();

        for _ in 0..100 {
            let delay = policy.calculate_delay(1);
            assert!(delay >= Duration::from_millis(79) && delay <= Duration::from_millis(121));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        // Given: an operation failing twice
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::exponential(3, Duration::from_millis(10));
        let token = CancellationToken::new();

        // When
        let result = policy
            .run(&token, "flaky", |_| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(HandlerError::new("not yet"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        // Then
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_last_error() {
        let policy = RetryPolicy::exponential(2, Duration::from_millis(10));
        let token = CancellationToken::new();

        let result: Result<(), HandlerError> = policy
            .run(&token, "always-failing", |attempt| async move {
                Err(HandlerError::new(format!("attempt {attempt}")))
            })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "attempt 2");
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<(), HandlerError> = RetryPolicy::none()
            .run(&token, "once", |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::new("boom"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::exponential(10, Duration::from_secs(60));

        let result: Result<(), HandlerError> = policy
            .run(&token, "cancelled", |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::new("boom"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
