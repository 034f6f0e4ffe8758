//! Per-node rate limiting
//!
//! A token bucket per sender nodeID. The dispatch path checks the bucket
//! before verifying a message; limited senders get an RPC error reply and
//! the message is dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Messages allowed per window
    pub capacity: u32,
    /// Window after which a bucket refills completely
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            window: Duration::from_secs(60),
        }
    }
}

struct Bucket {
    tokens: u32,
    window_start: Instant,
}

/// Token-bucket rate limiter keyed by nodeID
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `node_id`. Returns false when the sender is
    /// over budget for the current window.
    pub fn check(&self, node_id: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(node_id.to_string()).or_insert(Bucket {
            tokens: self.config.capacity,
            window_start: Instant::now(),
        });

        if bucket.window_start.elapsed() >= self.config.window {
            bucket.tokens = self.config.capacity;
            bucket.window_start = Instant::now();
        }

        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }

    /// Drop state for senders whose window has long passed.
    pub fn prune(&self) {
        let horizon = self.config.window * 2;
        self.buckets
            .lock()
            .retain(|_, bucket| bucket.window_start.elapsed() < horizon);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
