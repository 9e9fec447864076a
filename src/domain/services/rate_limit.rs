#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

pub const DEFAULT_CAPACITY: u32 = 30;
pub const REFILL_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Too many requests, retry in {retry_after_secs}s")]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

/// Per client admission state, keyed by client address. Swappable so a
/// shared store can replace the in-process map.
pub trait RateLimitStore {
    /// Takes one token for `key`, failing when the bucket is empty.
    fn check(&self, key: &str) -> Result<(), RateLimited>;
}

pub type RateLimitStoreBox = Arc<dyn RateLimitStore + Send + Sync>;

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Token bucket per key. A full bucket holds `capacity` tokens and refills
/// linearly over `window`.
pub struct InMemoryRateLimitStore {
    capacity: u32,
    window: Duration,
    buckets: DashMap<String, Bucket>,
    last_prune: Mutex<Instant>,
}

impl Default for InMemoryRateLimitStore {
    fn default() -> InMemoryRateLimitStore {
        return InMemoryRateLimitStore::new(DEFAULT_CAPACITY, REFILL_WINDOW);
    }
}

impl InMemoryRateLimitStore {
    pub fn new(capacity: u32, window: Duration) -> InMemoryRateLimitStore {
        return InMemoryRateLimitStore {
            capacity: capacity.max(1),
            window,
            buckets: DashMap::new(),
            last_prune: Mutex::new(Instant::now()),
        };
    }

    fn tokens_per_second(&self) -> f64 {
        return self.capacity as f64 / self.window.as_secs_f64().max(f64::EPSILON);
    }

    /// Drops buckets that have been idle long enough to be full again.
    pub fn prune(&self) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| return now.duration_since(bucket.last_update) < self.window);
    }

    /// Prunes at most once per window, from inside `check`.
    fn prune_if_due(&self, now: Instant) {
        let mut last_prune = match self.last_prune.lock() {
            Ok(last_prune) => last_prune,
            Err(poisoned) => poisoned.into_inner(),
        };
        if now.duration_since(*last_prune) < self.window {
            return;
        }
        *last_prune = now;
        drop(last_prune);

        if self.is_empty() {
            return;
        }

        let before = self.len();
        self.prune();
        tracing::debug!(before, after = self.len(), "Pruned rate limit buckets");
    }

    pub fn len(&self) -> usize {
        return self.buckets.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.buckets.is_empty();
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn check(&self, key: &str) -> Result<(), RateLimited> {
        let now = Instant::now();
        let capacity = self.capacity as f64;
        let rate = self.tokens_per_second();
        self.prune_if_due(now);

        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - bucket.tokens;
        let retry_after_secs = (missing / rate).ceil().max(1.0) as u64;
        tracing::debug!(key, retry_after_secs, "Rate limited");

        return Err(RateLimited { retry_after_secs });
    }
}
