//! Capped exponential backoff for transient provider failures.
//!
//! Shared by the executor (retrying connection-class errors) and the registry
//! (spacing out reconnection attempts).

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (0 = single attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub exponential_base: f64,
}

impl RetryPolicy {
    /// Policy with the given limits and a base of 2.
    #[must_use]
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            exponential_base: 2.0,
        }
    }

    /// A single attempt, never retried.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 2.0,
        }
    }

    /// Delay before attempt `attempt` (0-indexed). Attempt 0 runs immediately;
    /// later attempts grow exponentially up to `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.initial_delay.as_millis() as f64 * self.exponential_base.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempt` retries.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(5))
    }
}

/// Result of [`retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// Succeeded.
    Success(T),
    /// Failed with a non-retryable error or after the last allowed retry.
    Exhausted {
        /// Final error.
        error: E,
        /// Attempts made.
        attempts: u32,
    },
    /// Gave up because the next backoff would cross the deadline.
    DeadlineReached {
        /// Last error seen.
        error: E,
        /// Attempts made.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Whether the operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Attempts made before giving up. Successes report 1.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success(_) => 1,
            Self::Exhausted { attempts, .. } | Self::DeadlineReached { attempts, .. } => *attempts,
        }
    }
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, the
/// policy is exhausted, or the next backoff would pass `deadline`.
pub async fn retry<T, E, Fut, F, P>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(error) => {
                let attempts = attempt.saturating_add(1);
                if !policy.should_retry(attempt) || !should_retry(&error) {
                    return RetryOutcome::Exhausted { error, attempts };
                }
                attempt = attempts;
                let delay = policy.delay_for_attempt(attempt);
                if let Some(deadline) = deadline
                    && Instant::now().checked_add(delay).is_none_or(|at| at >= deadline)
                {
                    return RetryOutcome::DeadlineReached { error, attempts };
                }
                tokio::time::sleep(delay).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(350));
    }

    #[test]
    fn no_retry_allows_one_attempt() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(0));
    }

    #[tokio::test]
    async fn retries_only_when_predicate_allows() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let outcome = retry(
            &policy,
            None,
            |_| async { Err::<(), _>("permanent") },
            |_| false,
        )
        .await;
        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                error: "permanent",
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let outcome = retry(
            &policy,
            None,
            |attempt| async move { if attempt < 2 { Err("reset") } else { Ok(attempt) } },
            |_| true,
        )
        .await;
        assert_eq!(outcome, RetryOutcome::Success(2));
    }

    #[tokio::test]
    async fn exhausts_after_max_retries() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let outcome = retry(&policy, None, |_| async { Err::<(), _>("reset") }, |_| true).await;
        assert_eq!(outcome.attempts(), 4);
        assert!(!outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_before_crossing_deadline() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(10));
        let deadline = Instant::now().checked_add(Duration::from_millis(1500));
        let outcome = retry(&policy, deadline, |_| async { Err::<(), _>("reset") }, |_| true).await;
        assert!(matches!(
            outcome,
            RetryOutcome::DeadlineReached { attempts: 2, .. }
        ));
    }
}
