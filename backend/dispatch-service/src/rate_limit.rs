use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::AppResult;

/// Permission to perform one rate-limited operation in a named bucket.
#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Non-blocking: `Ok(false)` means the current slot's ceiling is spent.
    async fn acquire(&self, bucket: &str) -> AppResult<bool>;
}

/// Outbound rate limiter over a shared Redis counter.
///
/// Counts live under `rate:{bucket}:{slot}` so every process sending through
/// the same Redis competes for the same ceiling. The counter is a single
/// INCR; there is no read-modify-write window. Keys expire after two slot
/// widths, so a stale window can never affect the current slot.
#[derive(Clone)]
pub struct RateLimiter {
    redis: ConnectionManager,
    max_requests: u32,
    window_seconds: u64,
}

impl RateLimiter {
    pub fn new(redis: ConnectionManager, max_requests: u32, window_seconds: u64) -> Self {
        Self {
            redis,
            max_requests,
            window_seconds,
        }
    }

    fn slot_for(&self, unix_seconds: u64) -> u64 {
        unix_seconds / self.window_seconds.max(1)
    }

    fn window_key(&self, bucket: &str, slot: u64) -> String {
        format!("rate:{bucket}:{slot}")
    }
}

#[async_trait]
impl RateLimit for RateLimiter {
    /// Ask for one send permit in `bucket`'s current slot.
    ///
    /// Returns `Ok(false)` on denial without blocking; the caller decides
    /// whether to wait, retry later or fail the operation.
    async fn acquire(&self, bucket: &str) -> AppResult<bool> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let key = self.window_key(bucket, self.slot_for(now));

        // ConnectionManager clones share the underlying connection
        let mut conn = self.redis.clone();
        let count: u32 = conn.incr(&key, 1).await?;

        // First increment of a slot creates the window; cap its lifetime
        if count == 1 {
            let _: () = conn.expire(&key, (self.window_seconds * 2) as i64).await?;
        }

        if count > self.max_requests {
            tracing::debug!(bucket, count, ceiling = self.max_requests, "rate limit denied");
            return Ok(false);
        }
        Ok(true)
    }
}
