//! Exponential backoff for transient provider failures.
//!
//! Schedule: 1 s → 2 s → 4 s → 8 s, up to 5 attempts. A `Retry-After`
//! carried by the error overrides the computed delay. Permanent errors
//! surface to the caller immediately.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use omnihub_core::config::{RETRY_BASE_MS, RETRY_MAX_ATTEMPTS};

use crate::error::{ChannelError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(RETRY_BASE_MS),
            max_attempts: RETRY_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 1-based retry attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() || attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                let delay = match &e {
                    ChannelError::Transient {
                        retry_after: Some(after),
                        ..
                    } => *after,
                    _ => policy.delay_for(attempt),
                };
                warn!(
                    %what,
                    attempt,
                    max = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient provider error, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ChannelError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Parse a `Retry-After` header value (delta-seconds form).
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
