//! Per-caller request rate limiting.
//!
//! Handlers only see the [`RateLimiter`] capability, so the in-process
//! limiter can be replaced by a shared store without touching call sites.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

pub trait RateLimiter: Send + Sync {
    /// Record a request for `key`, returns whether it is allowed.
    fn check(&self, key: &str) -> bool;

    /// Forget every key.
    fn reset(&self);

    /// Drop state that no longer affects decisions.
    fn sweep(&self) {}
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counter per key.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            // a poisoned limiter must not take the service down with it
            log::error!("rate limiter state poisoned, allowing request");
            return true;
        };

        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            return false;
        }
        window.count += 1;
        true
    }

    fn sweep_at(&self, now: Instant) {
        if let Ok(mut windows) = self.windows.lock() {
            let before = windows.len();
            windows.retain(|_, w| now.duration_since(w.started) < self.window);
            let removed = before - windows.len();
            if removed > 0 {
                log::debug!("rate limiter: dropped {removed} expired windows");
            }
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn reset(&self) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.clear();
        }
    }

    fn sweep(&self) {
        self.sweep_at(Instant::now())
    }
}
