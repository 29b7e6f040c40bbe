use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use poster_core::ExternalError;
use tracing::warn;

/// Backoff schedule for [`retry_with_backoff`].
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay that follows `delay`, capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.backoff_factor.max(1.0)).min(self.max_delay)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-provided wait, honoured in place of the computed delay.
    fn suggested_delay(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ExternalError {
    fn is_retryable(&self) -> bool {
        ExternalError::is_retryable(self)
    }

    fn suggested_delay(&self) -> Option<Duration> {
        ExternalError::suggested_delay(self)
    }
}

/// Outcome of a failed [`retry_with_backoff`] run.
///
/// `Exhausted`: every attempt failed with a retryable error.
/// `Rejected`: the first non-retryable error, returned as-is.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("{0}")]
    Rejected(E),
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    pub fn last(&self) -> &E {
        match self {
            Self::Exhausted { last, .. } | Self::Rejected(last) => last,
        }
    }

    pub fn into_last(self) -> E {
        match self {
            Self::Exhausted { last, .. } | Self::Rejected(last) => last,
        }
    }
}

/// Run `op` until it succeeds, a non-retryable error occurs, or
/// `policy.max_attempts` calls have been made.
///
/// Sleeps `delay` after each retryable failure, then grows it to
/// `min(delay * backoff_factor, max_delay)`. `op` receives the 1-based
/// attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff_if(policy, operation, E::is_retryable, op).await
}

/// Like [`retry_with_backoff`], with the retryable set decided by `retryable`.
pub async fn retry_with_backoff_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !retryable(&e) => return Err(RetryError::Rejected(e)),
            Err(e) if attempt >= max_attempts => {
                warn!(operation, attempts = attempt, error = %e, "retries exhausted");
                return Err(RetryError::Exhausted { attempts: attempt, last: e });
            }
            Err(e) => {
                let wait = e.suggested_delay().map_or(delay, |d| d.min(policy.max_delay));
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = wait.as_millis() as u64,
                    error = %e,
                    "retrying after error"
                );
                tokio::time::sleep(wait).await;
                delay = policy.next_delay(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            backoff_factor: 2.0,
        }
    }

    fn server_error() -> ExternalError {
        ExternalError::ServerError {
            status: 500,
            body: "boom".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_try() {
        let calls = AtomicU32::new(0);
        let out: Result<u32, RetryError<ExternalError>> = retry_with_backoff(&policy(3), "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(5) }
        })
        .await;
        assert_eq!(out.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_errors() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let out = retry_with_backoff(&policy(3), "op", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(server_error())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // slept 1s then 2s
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_distinct_error() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = retry_with_backoff(&policy(3), "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;
        let err = out.unwrap_err();
        assert!(err.is_exhausted());
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert!(matches!(err.last(), ExternalError::ServerError { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let out: Result<(), _> = retry_with_backoff(&policy(5), "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExternalError::BadRequest("nope".into())) }
        })
        .await;
        let err = out.unwrap_err();
        assert!(!err.is_exhausted());
        assert!(matches!(err.into_last(), ExternalError::BadRequest(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_grows_and_caps() {
        let start = Instant::now();
        let _: Result<(), _> = retry_with_backoff(&policy(5), "op", |_| async { Err(server_error()) }).await;
        // 1 + 2 + 3 + 3
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn suggested_delay_is_honoured() {
        let start = Instant::now();
        let _: Result<(), _> = retry_with_backoff(&policy(2), "op", |_| async {
            Err(ExternalError::RateLimited {
                retry_after: Some(Duration::from_millis(2500)),
            })
        })
        .await;
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_retryable_set() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = retry_with_backoff_if(
            &policy(3),
            "op",
            |e: &ExternalError| matches!(e, ExternalError::NotFound(_)),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ExternalError::NotFound("eventually".into())) }
            },
        )
        .await;
        assert!(out.unwrap_err().is_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn next_delay_caps() {
        let p = policy(3);
        assert_eq!(p.next_delay(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(p.next_delay(Duration::from_secs(2)), Duration::from_secs(3));
    }
}
