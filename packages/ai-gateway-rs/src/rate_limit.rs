use std::collections::{HashMap, VecDeque};

use crate::config::RateLimitConfig;

/// Sliding-window request counter keyed by document id.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: HashMap<String, VecDeque<u64>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request for `key` at `now_ms` if the window has room.
    /// Returns the wait in milliseconds until a slot frees up otherwise.
    pub fn allow(&mut self, key: &str, config: &RateLimitConfig, now_ms: u64) -> Result<(), u64> {
        self.windows.retain(|_, window| {
            while window
                .front()
                .is_some_and(|&oldest| now_ms.saturating_sub(oldest) >= config.window_ms)
            {
                window.pop_front();
            }
            !window.is_empty()
        });

        let window = self.windows.entry(key.to_string()).or_default();
        if window.len() >= config.max_requests {
            let oldest = window.front().copied().unwrap_or(now_ms);
            let retry_after_ms = (oldest + config.window_ms).saturating_sub(now_ms).max(1);
            return Err(retry_after_ms);
        }
        window.push_back(now_ms);
        Ok(())
    }

    /// Keys with at least one request inside their window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    pub fn reset(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_requests: usize) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            window_ms: 1_000,
        }
    }

    #[test]
    fn limits_per_key_and_reports_retry_after() {
        let mut limiter = RateLimiter::new();
        let config = config(2);
        assert_eq!(limiter.allow("doc", &config, 0), Ok(()));
        assert_eq!(limiter.allow("doc", &config, 100), Ok(()));
        assert_eq!(limiter.allow("doc", &config, 400), Err(600));
        assert_eq!(limiter.allow("other", &config, 400), Ok(()));
    }

    #[test]
    fn window_slides() {
        let mut limiter = RateLimiter::new();
        let config = config(1);
        assert_eq!(limiter.allow("doc", &config, 0), Ok(()));
        assert!(limiter.allow("doc", &config, 999).is_err());
        assert_eq!(limiter.allow("doc", &config, 1_000), Ok(()));
    }

    #[test]
    fn idle_keys_are_forgotten() {
        let mut limiter = RateLimiter::new();
        let config = config(1);
        assert_eq!(limiter.allow("doc-a", &config, 0), Ok(()));
        assert_eq!(limiter.allow("doc-b", &config, 500), Ok(()));
        assert_eq!(limiter.tracked_keys(), 2);

        assert_eq!(limiter.allow("doc-c", &config, 1_200), Ok(()));
        assert_eq!(limiter.tracked_keys(), 2);
        assert_eq!(limiter.allow("doc-c", &config, 2_300), Ok(()));
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
