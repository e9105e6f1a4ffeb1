//! Bounded exponential backoff for calls to external services

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Classifies an error as worth retrying
pub trait Transient {
    /// Network failure, timeout, throttling or a server-side error
    fn is_transient(&self) -> bool;

    /// Server-provided wait before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Retry count and delay bounds for one external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms.max(initial_delay_ms)),
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Backoff before retry number `retry` (1-based): doubles each time, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// A server `retry_after` hint replaces the computed backoff but is still
    /// capped by `max_delay`.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if retry >= self.max_retries => {
                    if self.max_retries > 0 {
                        tracing::error!("{}: giving up after {} retries: {}", label, retry, e);
                    }
                    return Err(e);
                }
                Err(e) => {
                    retry += 1;
                    let wait = e
                        .retry_after()
                        .map(|hint| hint.min(self.max_delay))
                        .unwrap_or_else(|| self.delay_for(retry));
                    tracing::warn!(
                        "{}: transient error, retry {}/{} in {}ms: {}",
                        label,
                        retry,
                        self.max_retries,
                        wait.as_millis(),
                        e
                    );
                    sleep(wait).await;
                }
            }
        }
    }
}

/// HTTP statuses that signal throttling or a server-side failure
pub fn status_is_transient(status: u16) -> bool {
    status == 429 || status == 408 || (500..600).contains(&status)
}

/// `retry-after` header in milliseconds, defaulting to one minute
pub fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(60)
        * 1000
}
