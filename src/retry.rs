//! Explicit retry policy shared by every external call site.
//!
//! Each outbound HTTP call (fetch, embed, upsert) runs through
//! [`RetryPolicy::run`] with its own policy value rather than an ad-hoc
//! wrapper, so backoff behavior is visible at the call site and testable in
//! isolation. Retries block at the call site; one provider call is treated
//! as atomic and is never interrupted mid-flight.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

use crate::types::RagError;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Worth another attempt after a backoff delay.
    Retryable,
    /// Permanent; surface immediately.
    Fatal,
}

/// HTTP statuses that indicate a transient condition.
pub fn retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Classify a reqwest transport error.
pub fn classify_reqwest(err: &reqwest::Error) -> RetryClass {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryClass::Retryable
    } else {
        RetryClass::Fatal
    }
}

/// Exponential backoff schedule with jitter and an attempt ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Minimum 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the computed delay added as uniform random jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Policy that never retries. Useful in tests and for calls that must
    /// not be repeated.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter > 0.0 && capped > 0.0 {
            rand::rng().random_range(0.0..self.jitter * capped)
        } else {
            0.0
        };
        Duration::from_secs_f64(capped + jitter)
    }

    /// Run `op` until it succeeds, a fatal error is returned, or the attempt
    /// ceiling is reached. `classify` decides which errors are worth
    /// retrying; the final retryable error is returned as-is so callers can
    /// downgrade it to a per-item failure.
    pub async fn run<T, E, F, Fut, C>(&self, mut op: F, classify: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryClass,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || classify(&err) == RetryClass::Fatal {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt - 1);
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Classifier for [`RagError`]: only `Transient` values are retried.
pub fn classify_rag_error(err: &RagError) -> RetryClass {
    if err.is_transient() {
        RetryClass::Retryable
    } else {
        RetryClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RagError> = fast_policy(4)
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(RagError::Transient {
                                endpoint: "test".into(),
                                reason: "flaky".into(),
                            })
                        } else {
                            Ok(n)
                        }
                    }
                },
                classify_rag_error,
            )
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RagError> = fast_policy(5)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(RagError::Validation {
                            id: "c".into(),
                            reason: "bad".into(),
                        })
                    }
                },
                classify_rag_error,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn honors_attempt_ceiling() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RagError> = fast_policy(3)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(RagError::Transient {
                            endpoint: "test".into(),
                            reason: "down".into(),
                        })
                    }
                },
                classify_rag_error,
            )
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(400));
    }

    #[test]
    fn status_classification_matches_transient_set() {
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable_status(StatusCode::BAD_GATEWAY));
        assert!(retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(retryable_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!retryable_status(StatusCode::NOT_FOUND));
        assert!(!retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
