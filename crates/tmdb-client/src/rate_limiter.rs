//! Request pacing for the TMDB API.
//!
//! Enforces both a per-second interval and a sliding per-minute window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Rate limiter with dual constraints (per-second and per-minute)
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    max_per_minute: usize,
    last_request: Option<Instant>,
    /// Request timestamps inside the current window, oldest first
    recent_requests: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_per_second: f64, max_per_minute: u32) -> Self {
        let min_interval = if max_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / max_per_second)
        } else {
            Duration::ZERO
        };

        Self {
            min_interval,
            max_per_minute: max_per_minute.max(1) as usize,
            last_request: None,
            recent_requests: VecDeque::with_capacity(max_per_minute as usize),
        }
    }

    /// Wait until a request may be sent, then record it
    pub async fn acquire(&mut self) {
        self.prune(Instant::now());

        if self.recent_requests.len() >= self.max_per_minute {
            if let Some(&oldest) = self.recent_requests.front() {
                let wait_time = WINDOW.saturating_sub(oldest.elapsed());
                if !wait_time.is_zero() {
                    debug!(
                        wait_ms = wait_time.as_millis(),
                        "Rate limit: waiting for per-minute window"
                    );
                    sleep(wait_time).await;
                }
            }
            self.prune(Instant::now());
        }

        if let Some(last) = self.last_request {
            let wait_time = self.min_interval.saturating_sub(last.elapsed());
            if !wait_time.is_zero() {
                debug!(
                    wait_ms = wait_time.as_millis(),
                    "Rate limit: waiting for per-second interval"
                );
                sleep(wait_time).await;
            }
        }

        let request_time = Instant::now();
        self.last_request = Some(request_time);
        self.recent_requests.push_back(request_time);
    }

    /// Number of requests sent in the last minute
    pub fn current_minute_count(&mut self) -> usize {
        self.prune(Instant::now());
        self.recent_requests.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.recent_requests.front() {
            if now.duration_since(oldest) < WINDOW {
                break;
            }
            self.recent_requests.pop_front();
        }
    }
}
