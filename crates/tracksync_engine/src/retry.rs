//! Retry policy for network calls.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// Classifies failures and computes backoff delays.
///
/// Retryable: timeouts, connection failures, HTTP 5xx. Everything
/// else is terminal for the current pass, including 401 (which the
/// authenticated request executor handles on its own).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from a retry configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns true if `error` is transient and attempts remain.
    pub fn should_retry(&self, error: &SyncError, attempt: u32) -> bool {
        error.is_retryable() && attempt + 1 < self.config.max_attempts
    }

    /// The backoff delay before the given attempt (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.config.delay_for_attempt(attempt)
    }

    /// Runs `op` with retry on transient failures.
    ///
    /// Cancellation is checked before every attempt; a pass cancelled
    /// during the backoff wait stops before issuing another call.
    pub fn run<T>(
        &self,
        cancelled: &AtomicBool,
        mut op: impl FnMut() -> SyncResult<T>,
    ) -> SyncResult<T> {
        let mut attempt = 0u32;

        loop {
            if cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled);
            }

            match op() {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(&error, attempt) => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(attempt, ?delay, %error, "transient sync failure, backing off");
                    std::thread::sleep(delay);
                }
                Err(error) => return Err(error),
            }
        }
    }
}
