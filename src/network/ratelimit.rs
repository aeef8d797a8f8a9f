//! Sliding-window rate limiter (§4.7): 20 messages/second per connection
//! and, independently, per source IP.

use std::time::Instant;

use dashmap::DashMap;

use crate::config::{RATE_LIMIT_MAX_MESSAGES, RATE_LIMIT_WINDOW};

/// One key's recent message timestamps, oldest first.
struct Window {
    hits: std::collections::VecDeque<Instant>,
}

impl Window {
    fn new() -> Self {
        Self { hits: std::collections::VecDeque::new() }
    }

    fn record_and_check(&mut self) -> bool {
        let now = Instant::now();
        while let Some(&front) = self.hits.front() {
            if now.duration_since(front) > RATE_LIMIT_WINDOW {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() as u32 >= RATE_LIMIT_MAX_MESSAGES {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}

/// Keyed sliding-window limiter. One instance covers a single axis
/// (per-connection or per-IP); [`crate::network::dispatcher`] holds one
/// of each.
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    /// Construct an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message against `key` and report whether it is within
    /// budget. Exceeding the budget does not consume it twice.
    pub fn check(&self, key: &str) -> bool {
        self.windows.entry(key.to_string()).or_insert_with(Window::new).record_and_check()
    }

    /// Drop the window for `key`, e.g. on disconnect.
    pub fn forget(&self, key: &str) {
        self.windows.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_up_to_the_configured_max() {
        let limiter = RateLimiter::new();
        for _ in 0..RATE_LIMIT_MAX_MESSAGES {
            assert!(limiter.check("conn-1"));
        }
        assert!(!limiter.check("conn-1"));
    }

    #[test]
    fn distinct_keys_have_independent_budgets() {
        let limiter = RateLimiter::new();
        for _ in 0..RATE_LIMIT_MAX_MESSAGES {
            assert!(limiter.check("conn-1"));
        }
        assert!(limiter.check("conn-2"));
    }

    #[test]
    fn forget_resets_the_window() {
        let limiter = RateLimiter::new();
        for _ in 0..RATE_LIMIT_MAX_MESSAGES {
            limiter.check("conn-1");
        }
        limiter.forget("conn-1");
        assert!(limiter.check("conn-1"));
    }
}
