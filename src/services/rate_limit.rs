//! Per-key token-bucket rate limiting.
//!
//! Used for rare administrative operations such as webhook secret
//! rotation (one per user per hour). Buckets refill when their window
//! elapses; acquisition never blocks, it just answers yes or no.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: u32,
    window_start: Instant,
}

pub struct TokenBucketLimiter {
    capacity: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// One operation per key per hour.
    pub fn hourly(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(3_600))
    }

    /// Take a token for `key`, refilling first if the window elapsed.
    /// Returns false when the bucket is empty.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.tokens = self.capacity;
            bucket.window_start = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }
}
