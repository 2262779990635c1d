//! Sliding-window per-caller rate limiting for trade-class and read-class operations.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::worker::is_apex;

const TRADE_WINDOW: Duration = Duration::from_secs(60);
const TRADE_LIMIT: usize = 5;
const READ_WINDOW: Duration = Duration::from_secs(60);
const READ_LIMIT: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Trade,
    Read,
}

impl Bucket {
    fn window(&self) -> Duration {
        match self {
            Bucket::Trade => TRADE_WINDOW,
            Bucket::Read => READ_WINDOW,
        }
    }

    fn limit(&self) -> usize {
        match self {
            Bucket::Trade => TRADE_LIMIT,
            Bucket::Read => READ_LIMIT,
        }
    }
}

#[derive(Default)]
struct Buckets {
    trade: Vec<Instant>,
    read: Vec<Instant>,
}

/// Sliding-window rate limiter. Apex is exempt from every bucket
pub struct RateLimiter {
    state: parking_lot::Mutex<HashMap<String, Buckets>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Admits or rejects a request for `worker` against `bucket`, pruning timestamps older
    /// than the window first. Returns `true` if admitted.
    pub fn check(&self, worker: &str, bucket: Bucket) -> bool {
        if is_apex(worker) {
            return true;
        }
        let now = Instant::now();
        let window = bucket.window();
        let limit = bucket.limit();

        let mut state = self.state.lock();
        let entry = state.entry(worker.to_string()).or_default();
        let timestamps = match bucket {
            Bucket::Trade => &mut entry.trade,
            Bucket::Read => &mut entry.read,
        };
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() >= limit {
            return false;
        }
        timestamps.push(now);
        true
    }

    pub fn check_trade(&self, worker: &str) -> bool {
        self.check(worker, Bucket::Trade)
    }

    pub fn check_read(&self, worker: &str) -> bool {
        self.check(worker, Bucket::Read)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_trade_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..TRADE_LIMIT {
            assert!(limiter.check_trade("Atlas"));
        }
        assert!(!limiter.check_trade("Atlas"));
    }

    #[test]
    fn buckets_are_independent_per_worker() {
        let limiter = RateLimiter::new();
        for _ in 0..TRADE_LIMIT {
            assert!(limiter.check_trade("Atlas"));
        }
        assert!(limiter.check_trade("Bishop"));
    }

    #[test]
    fn trade_and_read_buckets_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..TRADE_LIMIT {
            assert!(limiter.check_trade("Atlas"));
        }
        assert!(limiter.check_read("Atlas"));
    }

    #[test]
    fn apex_is_never_limited() {
        let limiter = RateLimiter::new();
        for _ in 0..(TRADE_LIMIT + 10) {
            assert!(limiter.check_trade(crate::worker::APEX));
        }
    }
}
