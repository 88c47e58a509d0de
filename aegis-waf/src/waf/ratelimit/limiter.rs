use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use pingora::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;

use super::token_bucket::TokenBucket;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Per-key token buckets behind a sharded map (§4.C). `dashmap` gives us
/// per-shard locking so a hot key never blocks an unrelated one.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// `limit` is the requests-per-minute capacity for this key (already
    /// resolved from `rate_limits.default_rpm`/`per_path` by the caller). A
    /// bucket is created with full tokens on first reference.
    pub fn allow(&self, key: &str, limit: u32) -> bool {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(limit));
        bucket.allow()
    }

    pub(crate) fn sweep(&self, ttl: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill()) < ttl);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically drops buckets that have gone idle past the TTL so the map
/// doesn't grow without bound for one-shot client IPs. Reads the limiter out
/// of whatever snapshot is current, since a config reload replaces it with a
/// fresh `RateLimiter`.
pub struct BucketSweeper {
    manager: std::sync::Arc<crate::config::ConfigManager>,
    interval: Duration,
    ttl: Duration,
}

impl BucketSweeper {
    pub fn new(manager: std::sync::Arc<crate::config::ConfigManager>) -> Self {
        Self {
            manager,
            interval: DEFAULT_SWEEP_INTERVAL,
            ttl: DEFAULT_TTL,
        }
    }
}

#[async_trait]
impl BackgroundService for BucketSweeper {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("rate limit sweeper shutdown");
                    return;
                }
                _ = ticker.tick() => {
                    self.manager.current().limiter.sweep(self.ttl);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_keys_do_not_share_buckets() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("a", 1));
        assert!(!limiter.allow("a", 1));
        assert!(limiter.allow("b", 1));
    }

    #[test]
    fn sweep_removes_stale_buckets_only() {
        let limiter = RateLimiter::new();
        limiter.allow("stale", 10);
        assert_eq!(limiter.buckets.len(), 1);
        limiter.sweep(Duration::from_secs(0));
        assert_eq!(limiter.buckets.len(), 0);
    }
}
