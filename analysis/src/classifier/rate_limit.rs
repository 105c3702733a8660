//! Dual sliding-window limiter for completion requests.
//!
//! Two budgets share one trailing window of `period`: the number of requests
//! and the sum of their token costs. `admit` suspends the caller until both
//! budgets have room, then records the request. Callers over budget wait;
//! they are never rejected.
//!
//! The window lock is held across the wait, so checking the budget and
//! recording the entry happen as one step and concurrent callers are admitted
//! one at a time in arrival order.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct Window {
    request_times: VecDeque<Instant>,
    token_counts: VecDeque<u64>,
    token_sum: u64,
}

impl Window {
    /// Drops entries that left the window. Both queues move in lockstep.
    fn evict(&mut self, now: Instant, period: Duration) {
        while let Some(&oldest) = self.request_times.front() {
            if now.saturating_duration_since(oldest) < period {
                break;
            }
            self.request_times.pop_front();
            if let Some(tokens) = self.token_counts.pop_front() {
                self.token_sum -= tokens;
            }
        }
    }

    fn requests_exhausted(&self, max_requests: usize) -> bool {
        self.request_times.len() >= max_requests
    }

    // an empty window always admits, even a request larger than the whole budget
    fn tokens_exhausted(&self, token_cost: u64, max_tokens: u64) -> bool {
        !self.token_counts.is_empty() && self.token_sum + token_cost > max_tokens
    }

    fn expiry_wait(&self, index: usize, now: Instant, period: Duration) -> Duration {
        self.request_times
            .get(index)
            .map(|&t| period.saturating_sub(now.saturating_duration_since(t)))
            .unwrap_or_default()
    }

    /// Wait until enough of the oldest entries expire to fit `token_cost`.
    fn token_wait(&self, token_cost: u64, max_tokens: u64, now: Instant, period: Duration) -> Duration {
        let excess = (self.token_sum + token_cost).saturating_sub(max_tokens);
        let mut freed = 0;
        for (index, tokens) in self.token_counts.iter().enumerate() {
            freed += tokens;
            if freed >= excess {
                return self.expiry_wait(index, now, period);
            }
        }
        self.expiry_wait(self.token_counts.len().saturating_sub(1), now, period)
    }
}

pub struct RateLimiter {
    max_requests: usize,
    max_tokens: u64,
    period: Duration,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, max_tokens: u64, period: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            max_tokens,
            period,
            window: Mutex::new(Window::default()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.max_tokens, config.period())
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Reserves budget for one request costing `token_cost` tokens.
    pub async fn admit(&self, token_cost: u64) {
        let mut window = self.window.lock().await;
        let mut now = Instant::now();
        window.evict(now, self.period);

        loop {
            let requests_full = window.requests_exhausted(self.max_requests);
            let tokens_full = window.tokens_exhausted(token_cost, self.max_tokens);
            if !requests_full && !tokens_full {
                break;
            }

            let mut request_wait = Duration::ZERO;
            let mut token_wait = Duration::ZERO;
            if requests_full {
                let surplus = window.request_times.len() + 1 - self.max_requests;
                request_wait = window.expiry_wait(surplus - 1, now, self.period);
                debug!(
                    "Request count limit reached. Waiting for {:.3} seconds.",
                    request_wait.as_secs_f64()
                );
            }
            if tokens_full {
                token_wait = window.token_wait(token_cost, self.max_tokens, now, self.period);
                debug!(
                    "Token count limit reached. Waiting for {:.3} seconds.",
                    token_wait.as_secs_f64()
                );
            }

            let wait = request_wait.max(token_wait);
            if !wait.is_zero() {
                sleep(wait).await;
            }
            now = Instant::now();
            window.evict(now, self.period);
        }

        window.request_times.push_back(now);
        window.token_counts.push_back(token_cost);
        window.token_sum += token_cost;
    }

    /// Requests and tokens currently inside the window.
    #[cfg(test)]
    pub async fn usage(&self) -> (usize, u64) {
        let mut window = self.window.lock().await;
        window.evict(Instant::now(), self.period);
        (window.request_times.len(), window.token_sum)
    }
}
