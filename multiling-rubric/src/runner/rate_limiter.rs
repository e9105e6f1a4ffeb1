//! Per-provider request limiter over a sliding one-minute window

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window request limiter shared by all tasks calling one service
pub struct RateLimiter {
    requests_per_minute: u32,
    last_requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `requests_per_minute == 0` disables limiting
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            last_requests: Mutex::new(VecDeque::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// Wait until a request may be sent, then record it
    pub async fn acquire(&self) {
        if self.requests_per_minute == 0 {
            return;
        }
        loop {
            let wait = {
                let mut last = self.last_requests.lock().await;
                let now = Instant::now();
                prune(&mut last, now);

                if last.len() < self.requests_per_minute as usize {
                    last.push_back(now);
                    return;
                }

                last.front()
                    .map(|&oldest| WINDOW.saturating_sub(now.duration_since(oldest)))
                    .unwrap_or_default()
                    + Duration::from_millis(10)
            };
            tracing::debug!("Rate limit reached, waiting {}ms", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests recorded within the current window
    pub async fn requests_in_window(&self) -> usize {
        let mut last = self.last_requests.lock().await;
        prune(&mut last, Instant::now());
        last.len()
    }
}

fn prune(last: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&front) = last.front() {
        if now.duration_since(front) > WINDOW {
            last.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(5);

        // Should be able to make 5 requests immediately
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.requests_in_window().await, 5);
    }

    #[tokio::test]
    async fn test_unlimited_records_nothing() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.requests_in_window().await, 0);
    }

    #[tokio::test]
    async fn test_waits_for_window_to_slide() {
        let limiter = RateLimiter::new(1);
        limiter.acquire().await;

        let acquired = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(acquired.is_err());
    }
}
