//! Retry-on-404 policy for calls that race eventual consistency.
//!
//! A host registers with the resource manager some time after its agent is
//! installed, and a cluster becomes readable some time after it is created.
//! Calls against such resources retry while the answer is 404 and fail
//! immediately on any other error.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::ControlPlaneError;
use crate::config::RuntimeSettings;

/// Exponential backoff bounded by a total attempt count.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Five attempts with a one second base delay capped at sixteen seconds.
    pub const STANDARD: Self = Self {
        attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(16),
    };

    /// Policy described by runtime settings.
    #[must_use]
    pub const fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            attempts: settings.retry_attempts,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_before(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1_u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Runs `call` until it succeeds, fails with a non-404 error, or the
/// policy's attempts are used up.
///
/// # Errors
///
/// Returns the last error from `call`; after the final attempt a 404 is
/// surfaced unchanged.
pub async fn retry_on_not_found<T, F, Fut>(
    policy: &RetryPolicy,
    op: &'static str,
    mut call: F,
) -> Result<T, ControlPlaneError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControlPlaneError>>,
{
    let mut attempt = 1_u32;
    loop {
        match call().await {
            Err(err) if err.is_not_found() && attempt < policy.attempts => {
                let delay = policy.delay_before(attempt);
                warn!(
                    op,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "resource not found yet; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use rstest::rstest;

    use super::{RetryPolicy, retry_on_not_found};
    use crate::control_plane::ControlPlaneError;

    const FAST: RetryPolicy = RetryPolicy {
        attempts: 5,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    fn not_found() -> ControlPlaneError {
        ControlPlaneError::Status {
            op: "AuthorizeHost",
            status: 404,
            body: String::new(),
        }
    }

    #[rstest]
    #[case(1, Duration::from_secs(1))]
    #[case(2, Duration::from_secs(2))]
    #[case(3, Duration::from_secs(4))]
    #[case(4, Duration::from_secs(8))]
    #[case(5, Duration::from_secs(16))]
    #[case(9, Duration::from_secs(16))]
    fn standard_policy_doubles_up_to_cap(#[case] retry: u32, #[case] expected: Duration) {
        assert_eq!(RetryPolicy::STANDARD.delay_before(retry), expected);
    }

    #[tokio::test]
    async fn succeeds_after_four_not_found_answers() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_on_not_found(&FAST, "AuthorizeHost", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 4 {
                Err(not_found())
            } else {
                Ok("authorized")
            }
        })
        .await;

        assert_eq!(result.ok(), Some("authorized"));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn surfaces_not_found_after_final_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_on_not_found(&FAST, "AuthorizeHost", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(not_found())
        })
        .await;

        let err = result.err().unwrap_or_else(|| panic!("expected failure"));
        assert_eq!(err.status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn other_statuses_fail_without_retry() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_on_not_found(&FAST, "AuthorizeHost", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ControlPlaneError::Status {
                op: "AuthorizeHost",
                status: 500,
                body: String::from("boom"),
            })
        })
        .await;

        assert_eq!(result.err().and_then(|err| err.status()), Some(500));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
