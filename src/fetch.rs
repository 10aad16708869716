//! Timeout + bounded retry around adapter calls.
//!
//! Every attempt gets its own deadline. Retryable failures are retried at most
//! `max_retries` times, sleeping `attempt × base_delay` in between. Cancelling
//! the caller's token aborts the in-flight attempt and skips the remaining ones.

use crate::config::SyncSettings;
use crate::error::{SyncError, UpstreamError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.retry_base_delay(),
        }
    }

    /// Delay before retry number `attempt` (1-based): 3 s, 6 s, … with the defaults.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// A successful call together with how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Last error, unmodified, after retries were exhausted or it was not retryable.
    Failed { error: UpstreamError, attempts: u32 },
    Cancelled { attempts: u32 },
}

impl FetchError {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::Failed { attempts, .. } | FetchError::Cancelled { attempts } => *attempts,
        }
    }
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Failed { error, attempts } => SyncError::Upstream {
                source: error,
                attempts,
            },
            FetchError::Cancelled { .. } => SyncError::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchClient {
    policy: RetryPolicy,
}

impl FetchClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `call` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// `call` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<Fetched<T>, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(attempt, "in-flight call aborted by cancellation");
                    return Err(FetchError::Cancelled { attempts: attempt });
                }
                res = tokio::time::timeout(timeout, call(attempt)) => res,
            };

            let error = match outcome {
                Ok(Ok(value)) => {
                    return Ok(Fetched {
                        value,
                        attempts: attempt,
                    })
                }
                Ok(Err(err)) => err,
                Err(_) => UpstreamError::timeout(format!(
                    "no response within {} ms",
                    timeout.as_millis()
                )),
            };

            if !error.retryable || attempt >= max_attempts {
                return Err(FetchError::Failed {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(attempt, kind = %error.kind, delay_ms = delay.as_millis() as u64, error = %error.message, "retryable upstream failure; backing off");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(FetchError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
