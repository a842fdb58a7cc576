//! Rate-limit counter store
//!
//! Token-bucket accounting keyed by caller identity. The store is consulted
//! by the access gate after authorization succeeds, so a request that fails
//! authentication never consumes quota. Keys are either an API key id (tier
//! quotas) or a client IP (payment and anonymous quotas).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// How long an untouched bucket is kept before the cleanup task drops it
const DEFAULT_BUCKET_TTL: Duration = Duration::from_secs(600);
/// How often the cleanup task scans for stale buckets
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Identity a quota is accounted against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    Ip(IpAddr),
    ApiKey(String),
}

/// Sustained rate plus the burst a fresh bucket starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Quota {
    /// Quota with burst equal to the sustained per-minute rate
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            burst: requests_per_minute,
        }
    }

    fn refill_rate(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }
}

/// Outcome of a check-and-consume call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: None,
        }
    }

    pub fn denied(retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds: Some(retry_after_seconds),
        }
    }
}

/// Atomic check-and-consume against a caller's quota
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn check(&self, key: RateKey, quota: Quota) -> RateLimitDecision;
}

// =============================================================================
// Token bucket
// =============================================================================

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
    last_access: Instant,
}

impl TokenBucket {
    fn new(quota: Quota, now: Instant) -> Self {
        let capacity = f64::from(quota.burst.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_rate: quota.refill_rate(),
            last_update: now,
            last_access: now,
        }
    }

    /// Credits tokens for elapsed time, capped at capacity
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;
    }

    /// Consumes one token if available
    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_access = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole seconds until one token is available, at least 1
    fn seconds_until_token(&self) -> u64 {
        if self.refill_rate <= 0.0 {
            return 60;
        }
        let deficit = (1.0 - self.tokens).max(0.0);
        (deficit / self.refill_rate).ceil().max(1.0) as u64
    }

    /// Quotas are config-driven and can change between calls for a key
    fn apply_quota(&mut self, quota: Quota) {
        let capacity = f64::from(quota.burst.max(1));
        if (capacity - self.capacity).abs() > f64::EPSILON {
            self.capacity = capacity;
            self.tokens = self.tokens.min(capacity);
        }
        self.refill_rate = quota.refill_rate();
    }

    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.last_access) > ttl
    }
}

// =============================================================================
// In-process store
// =============================================================================

/// In-process token-bucket store. One bucket per key; buckets idle past the
/// TTL are reclaimed by [`MemoryRateLimiter::spawn_cleanup_task`].
pub struct MemoryRateLimiter {
    buckets: RwLock<HashMap<RateKey, TokenBucket>>,
    bucket_ttl: Duration,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_BUCKET_TTL)
    }

    pub fn with_ttl(bucket_ttl: Duration) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            bucket_ttl,
        }
    }

    /// Spawns the periodic stale-bucket sweep. The task runs for the life
    /// of the process; dropping the returned handle does not stop it.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                limiter.remove_stale_buckets().await;
            }
        })
    }

    async fn remove_stale_buckets(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_stale(now, self.bucket_ttl));
        let removed = before - buckets.len();
        if removed > 0 {
            debug!(removed, remaining = buckets.len(), "removed stale rate-limit buckets");
        }
    }

    #[cfg(test)]
    async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimiter {
    async fn check(&self, key: RateKey, quota: Quota) -> RateLimitDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(quota, now));
        bucket.apply_quota(quota);
        if bucket.try_consume(now) {
            RateLimitDecision::allowed()
        } else {
            RateLimitDecision::denied(bucket.seconds_until_token())
        }
    }
}
