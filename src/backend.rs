//! Shared error classification and retry policy for collaborator backends.
//!
//! Every external call the pipeline makes (embedding, QA generation, vector
//! and keyword store writes) reports failures as either transient or fatal.
//! Transient failures are retried with exponential backoff up to a bounded
//! attempt count; exhausting the budget promotes the failure to fatal so the
//! pipeline can abort without leaving a half-written entry.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure raised by an external collaborator (embedding service, QA
/// generator, vector store, keyword store).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The call failed in a way that may succeed on retry (timeouts,
    /// connection resets, 5xx responses).
    #[error("transient backend failure: {0}")]
    Transient(String),
    /// The call failed in a way that retrying cannot fix (malformed
    /// response, rejected request, dimension mismatch).
    #[error("fatal backend failure: {0}")]
    Fatal(String),
}

impl BackendError {
    /// Whether the retry loop should attempt the call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Bounded exponential backoff applied to transient backend failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Run `operation`, retrying transient failures until the attempt budget
    /// is exhausted. The final transient error is promoted to
    /// [`BackendError::Fatal`]; fatal errors are returned immediately.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.base_delay;

        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        label,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient backend failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(BackendError::Transient(message)) => {
                    tracing::error!(label, attempts, "Retry budget exhausted");
                    return Err(BackendError::Fatal(format!(
                        "{label}: retry budget exhausted after {attempts} attempts: {message}"
                    )));
                }
                Err(fatal) => return Err(fatal),
            }
        }

        unreachable!("retry loop returns on every attempt")
    }
}
