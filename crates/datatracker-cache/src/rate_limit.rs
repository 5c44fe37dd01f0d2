//! Request counting for connection rotation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of GETs served by one connection before it is replaced.
pub const DEFAULT_ROTATE_EVERY: u64 = 100;

/// Counts outgoing GETs and says when the connection should be rotated.
///
/// The server throttles long-lived connections, so every `rotate_every`
/// requests the transport is asked to drop its connection pool.
#[derive(Debug)]
pub struct RateLimiter {
    requests: AtomicU64,
    rotate_every: u64,
}

impl RateLimiter {
    pub fn new(rotate_every: u64) -> Self {
        Self {
            requests: AtomicU64::new(0),
            rotate_every: rotate_every.max(1),
        }
    }

    /// Count one request. Returns true when the connection should be rotated
    /// before it is sent.
    pub fn tick(&self) -> bool {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        n % self.rotate_every == 0
    }

    /// Requests counted so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_ROTATE_EVERY)
    }
}
