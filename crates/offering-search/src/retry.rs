//! Bounded retry with doubling delays.
//!
//! The delay after failed attempt `n` (1-based) is `base * 2^n`. There is
//! no delay after the final attempt.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use tracing::{error, warn};

use offering_types::RetrySettings;

use crate::error::{SearchError, TransportError};

/// Retry budget for one store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts, settings.base_delay())
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Fresh backoff sequence for one operation.
    pub fn backoff(&self) -> DoublingBackoff {
        DoublingBackoff {
            policy: *self,
            failed_attempts: 0,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, SearchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    error!(operation, attempt, error = %e, "Non-retryable store error");
                    return Err(SearchError::Transport(e));
                }
                Err(e) => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Store call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(operation, attempts = attempt, error = %e, "Store call failed, giving up");
                        return Err(SearchError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                },
            }
        }
    }
}

/// [`Backoff`] yielding `base * 2^n` after the n-th failure and stopping
/// once the attempt budget is used up.
#[derive(Debug, Clone)]
pub struct DoublingBackoff {
    policy: RetryPolicy,
    failed_attempts: u32,
}

impl DoublingBackoff {
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }
}

impl Backoff for DoublingBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.failed_attempts += 1;
        if self.failed_attempts >= self.policy.max_attempts {
            None
        } else {
            Some(self.policy.delay_after(self.failed_attempts))
        }
    }

    fn reset(&mut self) {
        self.failed_attempts = 0;
    }
}
