use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Attempt budget and backoff base for one class of outbound call.
///
/// Backoff is attempt-indexed linear: the sleep after attempt `n` (1-based)
/// is `n * base_delay`. Policy data comes from configuration, never inline
/// constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error> {
    /// The operation failed with a condition the call site never retries
    /// (authorization or validation failures, by policy).
    #[error("{op} failed: {source}")]
    Fatal { op: &'static str, source: E },

    /// Every permitted attempt failed; `source` is the last error observed.
    #[error("{op} failed after {attempts} attempts: {source}")]
    Exhausted {
        op: &'static str,
        attempts: u32,
        source: E,
    },
}

impl<E: std::error::Error> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal { source, .. } | RetryError::Exhausted { source, .. } => source,
        }
    }
}

/// Run `operation` under bounded retry with backoff.
///
/// Retryability is decided per call site by `is_retryable`; attempts sleep
/// `policy.backoff(attempt)` between failures. Retried failures are logged
/// and never surfaced individually — only the terminal outcome escapes.
pub async fn with_retry<T, E, Fut, F, P>(
    op: &'static str,
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::error::Error,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(source) if !is_retryable(&source) => {
                return Err(RetryError::Fatal { op, source });
            }
            Err(source) if attempt >= policy.max_attempts => {
                return Err(RetryError::Exhausted {
                    op,
                    attempts: attempt,
                    source,
                });
            }
            Err(source) => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{op} attempt {attempt}/{} failed ({source}), retrying in {delay:?}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
