//! Token-bucket rate limiting for the HTTP API.
//!
//! One bucket per caller key. Every `/api` response carries
//! `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`;
//! a drained bucket answers 429 with `Retry-After`.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Bucket capacity (requests per window at burst).
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Refill rate in tokens per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
}

fn default_capacity() -> u32 {
    120
}

fn default_refill_per_sec() -> f64 {
    2.0
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill_per_sec(),
        }
    }
}

/// Outcome of one admission check, carrying the header values.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the bucket is full again.
    pub reset_secs: u64,
    /// Seconds until one token is available (only meaningful when
    /// `allowed` is false).
    pub retry_after_secs: u64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token buckets.
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

    /// Try to admit one request for `key`.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: f64::from(self.config.capacity),
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.refill_per_sec)
            .min(f64::from(self.config.capacity));
        bucket.last_refill = now;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }

        let missing = f64::from(self.config.capacity) - bucket.tokens;
        let reset_secs = (missing / self.config.refill_per_sec).ceil() as u64;
        let retry_after_secs = if allowed {
            0
        } else {
            ((1.0 - bucket.tokens) / self.config.refill_per_sec).ceil() as u64
        };

        RateDecision {
            allowed,
            limit: self.config.capacity,
            remaining: bucket.tokens.floor() as u32,
            reset_secs,
            retry_after_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_up_to_capacity() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 3,
            refill_per_sec: 0.001,
        });
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("a").allowed);

        let denied = limiter.check("a");
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs >= 1);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn test_keys_isolated() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 1,
            refill_per_sec: 0.001,
        });
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn test_headers_populated() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        let decision = limiter.check("a");
        assert_eq!(decision.limit, 120);
        assert_eq!(decision.remaining, 119);
    }
}
