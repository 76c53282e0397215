//! Per-host token-bucket rate limiter.
//!
//! Each target host gets its own bucket with a fixed refill rate and burst
//! capacity, behind its own lock; there is no cross-host coordination.
//! `admit` never blocks: it either grants a permit or returns how long the
//! caller should suspend before asking again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use url::Url;

/// Bucket parameters, shared by every host.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Steady-state requests per second per host.
    pub refill_per_sec: f64,
    /// Bucket capacity: how many requests may burst at once.
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            refill_per_sec: 2.0,
            burst: 4.0,
        }
    }
}

/// Result of a non-blocking admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// Request admitted; one token consumed.
    Permit,
    /// Bucket empty; suspend at least this long before retrying.
    RetryAfter(Duration),
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_sec).min(config.burst);
        self.last_refill = now;
    }
}

/// Token-bucket limiter keyed by target host.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Extract the host key from a URL.
    pub fn host_of(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    async fn bucket_for(&self, host: &str) -> Arc<Mutex<Bucket>> {
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(host) {
                return bucket.clone();
            }
        }
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(self.config.burst))))
            .clone()
    }

    /// Non-blocking admission check for one request to `host`.
    pub async fn admit(&self, host: &str) -> Admission {
        let bucket = self.bucket_for(host).await;
        let mut bucket = bucket.lock().await;

        let now = Instant::now();
        bucket.refill(&self.config, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Admission::Permit
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(deficit / self.config.refill_per_sec);
            Admission::RetryAfter(wait)
        }
    }

    /// Suspend until a permit for `host` is granted.
    pub async fn acquire(&self, host: &str) {
        loop {
            match self.admit(host).await {
                Admission::Permit => return,
                Admission::RetryAfter(wait) => {
                    debug!(host, wait_ms = wait.as_millis() as u64, "rate limited");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
