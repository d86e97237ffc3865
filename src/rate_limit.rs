//! Sliding-window request rate limiter.
//!
//! Tracks request timestamps per caller identity and rejects requests once
//! the window is full. Instances are created by whoever owns the serving
//! surface and passed in explicitly — there is no process-wide limiter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-memory sliding-window rate limiter.
///
/// Interior mutability keeps `check` usable behind an `Arc` shared across
/// request handlers.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    log: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            log: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `identity` and report whether it is allowed.
    ///
    /// Requests older than the window are pruned on every call, so memory
    /// per identity is bounded by `max_requests`.
    pub fn check(&self, identity: &str) -> bool {
        self.check_at(identity, Instant::now())
    }

    fn check_at(&self, identity: &str, now: Instant) -> bool {
        let mut log = self.log.lock().unwrap();
        let entries = log.entry(identity.to_string()).or_default();

        entries.retain(|t| now.duration_since(*t) < self.window);

        if entries.len() >= self.max_requests {
            return false;
        }

        entries.push(now);
        true
    }
}
