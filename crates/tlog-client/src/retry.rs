use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LogError, TimestampError};

/// Errors that can drive a retry decision.
pub trait Retryable: std::fmt::Display {
    fn is_transient(&self) -> bool;

    /// The error reported when a call exceeds its timeout.
    fn timed_out(op: &str, after: Duration) -> Self;
}

impl Retryable for LogError {
    fn is_transient(&self) -> bool {
        LogError::is_transient(self)
    }

    fn timed_out(op: &str, after: Duration) -> Self {
        LogError::Timeout {
            op: op.to_string(),
            after_ms: after.as_millis() as u64,
        }
    }
}

impl Retryable for TimestampError {
    fn is_transient(&self) -> bool {
        TimestampError::is_transient(self)
    }

    fn timed_out(op: &str, after: Duration) -> Self {
        TimestampError::Timeout {
            op: op.to_string(),
            after_ms: after.as_millis() as u64,
        }
    }
}

/// Bounds for calls to remote collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubles each time.
    pub base_delay_ms: u64,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
            timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Run `operation` once, bounded by the timeout. No retry.
    ///
    /// Used for non-idempotent calls such as appends.
    pub async fn once<T, E, Fut>(&self, op: &str, operation: Fut) -> Result<T, E>
    where
        E: Retryable,
        Fut: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout(), operation).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(op, self.timeout())),
        }
    }

    /// Run an idempotent `operation`, retrying transient failures and
    /// timeouts with exponential backoff until attempts run out.
    pub async fn run<T, E, F, Fut>(&self, op: &str, operation: F) -> Result<T, E>
    where
        E: Retryable,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        let mut delay_ms = self.base_delay_ms;

        loop {
            match self.once(op, operation()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    if !e.is_transient() || attempt >= self.attempts.max(1) {
                        return Err(e);
                    }

                    warn!(
                        op,
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms,
                        error = %e,
                        "remote call failed, retrying"
                    );

                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = delay_ms.saturating_mul(2);
                }
            }
        }
    }
}
