//! Sliding-window rate limiter for webhook tokens: 30 requests per
//! rolling 60 seconds, tracked per token in memory.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use qr_domain::{Error, Result};

pub const WEBHOOK_LIMIT: usize = 30;
pub const WEBHOOK_WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn webhook() -> Self {
        Self::new(WEBHOOK_LIMIT, WEBHOOK_WINDOW)
    }

    /// Record a hit for the token. `rate_limited` carries the seconds
    /// until the oldest in-window hit expires.
    pub fn check(&self, token: &str) -> Result<()> {
        self.check_at(token, Instant::now())
    }

    fn check_at(&self, token: &str, now: Instant) -> Result<()> {
        let mut hits = self.hits.lock();
        let window = hits.entry(token.to_string()).or_default();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.limit {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1);
            return Err(Error::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        window.push_back(now);
        Ok(())
    }

    /// Drop state for tokens with no recent hits.
    pub fn prune(&self) {
        let now = Instant::now();
        self.hits
            .lock()
            .retain(|_, window| window.back().is_some_and(|t| now.duration_since(*t) < self.window));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirty_first_hit_in_window_is_limited() {
        let limiter = RateLimiter::webhook();
        let start = Instant::now();
        for i in 0..WEBHOOK_LIMIT {
            limiter
                .check_at("tok", start + Duration::from_millis(i as u64))
                .unwrap();
        }
        let err = limiter
            .check_at("tok", start + Duration::from_secs(1))
            .unwrap_err();
        match err {
            Error::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::webhook();
        let start = Instant::now();
        for _ in 0..WEBHOOK_LIMIT {
            limiter.check_at("tok", start).unwrap();
        }
        assert!(limiter.check_at("tok", start + Duration::from_secs(30)).is_err());
        // 61 s after the burst every hit has left the window.
        limiter
            .check_at("tok", start + Duration::from_secs(61))
            .unwrap();
    }

    #[test]
    fn tokens_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        limiter.check_at("a", now).unwrap();
        limiter.check_at("b", now).unwrap();
        assert!(limiter.check_at("a", now).is_err());
    }

    #[test]
    fn prune_drops_idle_tokens() {
        let limiter = RateLimiter::new(5, Duration::from_millis(1));
        limiter.check("stale").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        limiter.prune();
        assert!(limiter.hits.lock().is_empty());
    }
}
