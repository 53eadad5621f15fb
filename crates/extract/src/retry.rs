use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::llm::ServiceError;

/// Errors the retry policy knows how to classify.
pub trait Retryable: Display {
    fn is_transient(&self) -> bool;

    /// Wait requested by the remote side, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Error for a call that exceeded the per-call timeout.
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for ServiceError {
    fn is_transient(&self) -> bool {
        ServiceError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

/// Result of running an operation under a `RetryPolicy`.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    /// Every attempt failed with a transient error.
    Exhausted { last_error: E, attempts: u32 },
    /// A permanent error stopped the retries early.
    Aborted { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Aborted { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Succeeded { value, .. } => Ok(value),
            Self::Exhausted { last_error, .. } => Err(last_error),
            Self::Aborted { error, .. } => Err(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.initial_backoff_ms, config.max_backoff_ms)
    }

    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before retry number `retry` (1-based): doubling from the initial
    /// backoff, capped at the maximum.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `f` until it succeeds, fails permanently, or attempts run out.
    /// Each attempt is bounded by the call timeout.
    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut f: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match timeout(self.call_timeout, f(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(self.call_timeout)),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = operation,
                            attempts = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return RetryOutcome::Succeeded { value, attempts: attempt };
                }
                Err(e) if !e.is_transient() => {
                    warn!(
                        operation = operation,
                        attempts = attempt,
                        error = %e,
                        "Operation failed permanently"
                    );
                    return RetryOutcome::Aborted { error: e, attempts: attempt };
                }
                Err(e) => {
                    if attempt >= self.max_attempts {
                        warn!(
                            operation = operation,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return RetryOutcome::Exhausted { last_error: e, attempts: attempt };
                    }

                    let backoff = match e.retry_after() {
                        Some(requested) => requested.min(self.max_backoff).max(self.backoff(attempt)),
                        None => self.backoff(attempt),
                    };
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
