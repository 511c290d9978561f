//! Per-user sliding-window admission control.
//!
//! Each user owns an ordered window of request timestamps. A check prunes
//! timestamps older than the window, rejects if the pruned count already
//! meets the cap, and otherwise records the new timestamp and admits.
//! The per-user map is an LRU bounded at `max_tracked_users`, so users who
//! stop requesting are eventually evicted instead of accumulating for the
//! process lifetime.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::ServiceError;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: Mutex<LruCache<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_tracked_users).unwrap_or(NonZeroUsize::MIN);
        Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            windows: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Admit or reject a request for `user_id`.
    pub fn check(&self, user_id: &str) -> Result<(), ServiceError> {
        self.check_at(user_id, Instant::now())
    }

    /// Clock-injected variant so the window math is testable without
    /// real sleeps.
    fn check_at(&self, user_id: &str, now: Instant) -> Result<(), ServiceError> {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.get_or_insert_mut(user_id.to_string(), VecDeque::new);

        // Prune expired timestamps first.
        while let Some(&front) = window.front() {
            if now.duration_since(front) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.max_requests {
            let oldest = *window.front().expect("cap > 0 implies non-empty");
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            warn!(user_id, "rate limit exceeded");
            return Err(ServiceError::RateLimited { retry_after });
        }

        window.push_back(now);
        debug!(
            user_id,
            used = window.len(),
            limit = self.max_requests,
            "rate limit check passed"
        );
        Ok(())
    }
}
