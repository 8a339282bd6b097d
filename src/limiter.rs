// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Sliding-window rate limiter for external lookup services

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Extra sleep added on top of the computed wait so a request issued
/// right at the window edge cannot still trip the remote limit.
const SAFETY_MARGIN: Duration = Duration::from_millis(100);

/// Throttles callers to at most `max_requests` within a trailing window.
/// Calls are delayed, never rejected.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

/// Snapshot of the limiter state
#[derive(Debug, Clone)]
pub struct LimiterStats {
    pub current_requests: usize,
    pub max_requests: usize,
    pub window_secs: u64,
    pub can_make_request: bool,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window`
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Suspend until a request may be issued, then record it.
    ///
    /// The lock is held across the sleep so the window update and the
    /// admission decision form a single atomic unit under concurrency.
    pub async fn acquire(&self) {
        let mut requests = self.requests.lock().await;

        let now = Instant::now();
        Self::evict(&mut requests, now, self.window);

        if requests.len() >= self.max_requests {
            // Oldest entry defines exactly when a slot opens up
            if let Some(&oldest) = requests.front() {
                let wait = (oldest + self.window).saturating_duration_since(now);
                if !wait.is_zero() {
                    debug!("Rate limit reached, waiting {:?}", wait + SAFETY_MARGIN);
                    tokio::time::sleep(wait + SAFETY_MARGIN).await;
                }
            }
            let now = Instant::now();
            Self::evict(&mut requests, now, self.window);
        }

        requests.push_back(Instant::now());
    }

    /// Current state without admitting anything
    pub async fn stats(&self) -> LimiterStats {
        let mut requests = self.requests.lock().await;
        Self::evict(&mut requests, Instant::now(), self.window);

        LimiterStats {
            current_requests: requests.len(),
            max_requests: self.max_requests,
            window_secs: self.window.as_secs(),
            can_make_request: requests.len() < self.max_requests,
        }
    }

    /// Forget all tracked requests
    pub async fn reset(&self) {
        self.requests.lock().await.clear();
    }

    fn evict(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = requests.front() {
            if now.duration_since(front) > window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }
}
