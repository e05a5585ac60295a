//! Time-bounded result cache for idempotent queries.
//!
//! Entries are keyed by normalized resource key and replaced wholesale on
//! refresh. An entry older than the TTL is treated as a miss; expired
//! entries are physically removed by `cleanup_expired()` on the reaper tick.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::OperationError;

use super::key::ResourceKey;

/// A completed outcome worth replaying to later identical requests.
///
/// Failures are only cached for operations explicitly flagged as safe to
/// cache negative results; everything else re-attempts on the next request.
#[derive(Debug, Clone)]
pub enum CachedOutcome {
    Success(Value),
    Failure(OperationError),
}

impl CachedOutcome {
    pub fn as_result(&self) -> Result<Value, OperationError> {
        match self {
            CachedOutcome::Success(value) => Ok(value.clone()),
            CachedOutcome::Failure(err) => Err(err.clone()),
        }
    }
}

struct CacheEntry {
    outcome: CachedOutcome,
    cached_at: Instant,
}

/// Thread-safe result cache with time-to-live expiration. Its lock is one of
/// the three named lock domains and protects nothing but the cache map.
pub struct ResultCache {
    entries: RwLock<HashMap<ResourceKey, CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Store an outcome, replacing any prior entry and resetting the TTL.
    pub async fn insert(&self, key: ResourceKey, outcome: CachedOutcome) {
        let entry = CacheEntry {
            outcome,
            cached_at: Instant::now(),
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Store an outcome with an explicit timestamp (tests only).
    #[cfg(test)]
    pub async fn insert_at(&self, key: ResourceKey, outcome: CachedOutcome, cached_at: Instant) {
        let entry = CacheEntry { outcome, cached_at };
        self.entries.write().await.insert(key, entry);
    }

    /// Get a non-expired outcome. A stale entry is a miss.
    pub async fn get(&self, key: &ResourceKey) -> Option<CachedOutcome> {
        let guard = self.entries.read().await;
        guard.get(key).and_then(|entry| {
            if entry.cached_at.elapsed() < self.ttl {
                Some(entry.outcome.clone())
            } else {
                None
            }
        })
    }

    /// Drop an entry regardless of age (used when a mutation invalidates a
    /// previously cached read).
    pub async fn invalidate(&self, key: &ResourceKey) {
        self.entries.write().await.remove(key);
    }

    /// Remove all expired entries and return how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        before - guard.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(raw: &str) -> ResourceKey {
        ResourceKey::normalize(raw)
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache
            .insert(key("/Game/Foo"), CachedOutcome::Success(json!({"exists": true})))
            .await;
        let hit = cache.get(&key("/Game/Foo")).await.expect("hit");
        assert_eq!(hit.as_result().expect("ok")["exists"], true);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let ttl = Duration::from_millis(10);
        let cache = ResultCache::new(ttl);
        let expired_at = Instant::now() - (ttl + Duration::from_millis(1));
        cache
            .insert_at(key("/a"), CachedOutcome::Success(json!(1)), expired_at)
            .await;

        assert!(cache.get(&key("/a")).await.is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired() {
        let ttl = Duration::from_millis(10);
        let cache = ResultCache::new(ttl);
        let expired_at = Instant::now() - (ttl + Duration::from_millis(1));
        cache
            .insert_at(key("/old"), CachedOutcome::Success(json!(1)), expired_at)
            .await;
        cache.insert(key("/new"), CachedOutcome::Success(json!(2))).await;

        let removed = cache.cleanup_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get(&key("/new")).await.is_some());
    }

    #[tokio::test]
    async fn invalidate_drops_fresh_entries() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.insert(key("/a"), CachedOutcome::Success(json!(1))).await;
        cache.invalidate(&key("/a")).await;
        assert!(cache.get(&key("/a")).await.is_none());
    }

    #[tokio::test]
    async fn cached_failures_replay_their_code() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache
            .insert(
                key("/missing"),
                CachedOutcome::Failure(OperationError::not_found("no such asset")),
            )
            .await;
        let hit = cache.get(&key("/missing")).await.expect("hit");
        let err = hit.as_result().expect_err("failure");
        assert_eq!(err.code, hostbridge_protocol::ErrorCode::NotFound);
    }
}
