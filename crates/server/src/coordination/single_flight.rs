//! Single-flight coordinator.
//!
//! Guarantees at most one concurrent execution per resource key and fans the
//! result out to every requester that asked for the same key while it was in
//! flight. One execution answers N distinct client requests.
//!
//! Lock discipline: the inflight map, the busy set and the result cache are
//! three separate lock domains. The inflight lock is never held across an
//! operation run or a fan-out delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use hostbridge_protocol::{ErrorCode, ResponseEnvelope};

use crate::error::OperationError;

use super::busy::BusyGuard;
use super::cache::{CachedOutcome, ResultCache};
use super::executor::{HostTask, OwningExecutor};
use super::key::ResourceKey;

/// How the coordinator should treat one operation execution.
#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    /// Qualified action name (`asset.create`); distinct actions on one key
    /// never coalesce.
    pub action: String,
    /// Mutating operations claim the key's busy token for their duration.
    pub mutating: bool,
    /// Successful results are replayed to identical requests within the TTL.
    pub cacheable: bool,
    /// Failures are cached too (only for operations where a negative result
    /// is idempotent-safe).
    pub cache_errors: bool,
    /// Keys beyond the coordination key whose cached reads a successful
    /// mutation makes stale (a rename touches its destination too).
    pub invalidates: Vec<ResourceKey>,
}

/// A requester awaiting the result of an in-flight operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waiter {
    pub request_id: String,
    pub connection_id: Uuid,
}

/// Delivery seam for fan-out. The connection manager implements this; tests
/// substitute a capturing sink.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn deliver(&self, connection_id: Uuid, response: ResponseEnvelope);
}

struct InflightEntry {
    /// Guards against a late completion removing a successor entry for the
    /// same key after the reaper already force-completed this one.
    id: u64,
    action: String,
    waiters: Vec<Waiter>,
    started_at: Instant,
    holds_busy: bool,
}

/// Counters from one reaper sweep, for telemetry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapStats {
    pub inflight_reaped: usize,
    pub waiters_timed_out: usize,
    pub busy_released: usize,
    pub cache_expired: usize,
}

/// Coordinates cache lookup, coalescing, busy exclusion and execution for
/// every routed operation.
pub struct Coordinator<S> {
    inflight: Mutex<HashMap<ResourceKey, InflightEntry>>,
    next_entry_id: AtomicU64,
    busy: BusyGuard,
    cache: ResultCache,
    executor: OwningExecutor<S>,
    sink: Arc<dyn ResponseSink>,
    stale_timeout: Duration,
}

impl<S: Send + 'static> Coordinator<S> {
    pub fn new(
        executor: OwningExecutor<S>,
        sink: Arc<dyn ResponseSink>,
        cache_ttl: Duration,
        stale_timeout: Duration,
    ) -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_entry_id: AtomicU64::new(0),
            busy: BusyGuard::new(),
            cache: ResultCache::new(cache_ttl),
            executor,
            sink,
            stale_timeout,
        }
    }

    /// Route one request through cache, coalescing and busy checks, starting
    /// an execution if this is the first request for the key.
    ///
    /// Returns `Some(response)` when the outcome is immediate (cache hit,
    /// busy rejection); `None` when the waiter will be answered
    /// asynchronously by fan-out once the in-flight run completes.
    pub async fn execute(
        self: &Arc<Self>,
        spec: ExecutionSpec,
        key: ResourceKey,
        task: HostTask<S>,
        waiter: Waiter,
    ) -> Option<ResponseEnvelope> {
        if spec.cacheable {
            if let Some(cached) = self.cache.get(&key).await {
                tracing::debug!(key = %key, action = %spec.action, "Cache hit");
                return Some(envelope_for(&waiter.request_id, &cached.as_result(), true));
            }
        }

        let entry_id = {
            let mut inflight = self.inflight.lock().await;
            if let Some(entry) = inflight.get_mut(&key) {
                if entry.action == spec.action {
                    entry.waiters.push(waiter);
                    tracing::debug!(
                        key = %key,
                        action = %spec.action,
                        waiters = entry.waiters.len(),
                        "Coalesced request onto in-flight operation"
                    );
                    return None;
                }
                tracing::debug!(
                    key = %key,
                    inflight_action = %entry.action,
                    rejected_action = %spec.action,
                    "Rejected non-coalescable operation on in-flight key"
                );
                return Some(ResponseEnvelope::error(
                    &waiter.request_id,
                    ErrorCode::ResourceBusy,
                    format!("{} is busy with {}", key, entry.action),
                ));
            }

            if spec.mutating && !self.busy.try_acquire(&key) {
                return Some(ResponseEnvelope::error(
                    &waiter.request_id,
                    ErrorCode::ResourceBusy,
                    format!("{key} is busy with another modification"),
                ));
            }

            let entry_id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
            inflight.insert(
                key.clone(),
                InflightEntry {
                    id: entry_id,
                    action: spec.action.clone(),
                    waiters: vec![waiter],
                    started_at: Instant::now(),
                    holds_busy: spec.mutating,
                },
            );
            entry_id
        };

        let completion = self.executor.submit(task);
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match completion.await {
                Ok(result) => result,
                Err(_) => Err(OperationError::internal("owning executor unavailable")),
            };
            coordinator.complete(key, entry_id, spec, outcome).await;
        });
        None
    }

    /// Finish an execution: remove the inflight entry, release the busy
    /// token, update the cache and fan the outcome out to every waiter.
    async fn complete(
        &self,
        key: ResourceKey,
        entry_id: u64,
        spec: ExecutionSpec,
        outcome: Result<Value, OperationError>,
    ) {
        let entry = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&key) {
                Some(current) if current.id == entry_id => inflight.remove(&key),
                // Reaped (or replaced) while running; the reaper already
                // answered the waiters. Discard the late result.
                _ => None,
            }
        };
        let Some(entry) = entry else {
            tracing::debug!(key = %key, action = %spec.action, "Discarding result of reaped operation");
            return;
        };

        if entry.holds_busy {
            self.busy.release(&key);
        }

        match &outcome {
            Ok(value) => {
                if spec.cacheable {
                    self.cache
                        .insert(key.clone(), CachedOutcome::Success(value.clone()))
                        .await;
                } else if spec.mutating {
                    // The world changed under this key; cached reads for it
                    // and for every other key the operation touched are no
                    // longer trustworthy.
                    self.cache.invalidate(&key).await;
                    for touched in &spec.invalidates {
                        self.cache.invalidate(touched).await;
                    }
                }
            }
            Err(err) => {
                if spec.cacheable && spec.cache_errors {
                    self.cache
                        .insert(key.clone(), CachedOutcome::Failure(err.clone()))
                        .await;
                }
            }
        }

        tracing::debug!(
            key = %key,
            action = %spec.action,
            waiters = entry.waiters.len(),
            success = outcome.is_ok(),
            "Operation complete, fanning out"
        );
        self.fan_out(&entry.waiters, &outcome).await;
    }

    async fn fan_out(&self, waiters: &[Waiter], outcome: &Result<Value, OperationError>) {
        for waiter in waiters {
            let response = envelope_for(&waiter.request_id, outcome, false);
            self.sink.deliver(waiter.connection_id, response).await;
        }
    }

    /// Drop a dead connection's waiters from every inflight entry. The
    /// operations themselves keep running for any remaining waiters.
    pub async fn forget_connection(&self, connection_id: Uuid) -> usize {
        let mut inflight = self.inflight.lock().await;
        let mut dropped = 0;
        for entry in inflight.values_mut() {
            let before = entry.waiters.len();
            entry.waiters.retain(|w| w.connection_id != connection_id);
            dropped += before - entry.waiters.len();
        }
        if dropped > 0 {
            tracing::debug!(%connection_id, dropped, "Dropped waiters for closed connection");
        }
        dropped
    }

    /// Force-complete every inflight entry with `CONNECTION_LOST`. Used when
    /// the bridge transport itself is torn down.
    pub async fn abort_all(&self, reason: &str) -> usize {
        let entries: Vec<InflightEntry> = {
            let mut inflight = self.inflight.lock().await;
            inflight.drain().map(|(_, entry)| entry).collect()
        };
        let mut aborted = 0;
        for entry in entries {
            aborted += entry.waiters.len();
            let outcome: Result<Value, OperationError> = Err(OperationError::new(
                ErrorCode::ConnectionLost,
                reason.to_string(),
            ));
            self.fan_out(&entry.waiters, &outcome).await;
        }
        // Any busy token held by an aborted run is now orphaned; clear them
        // all rather than leaving keys wedged until the stale sweep.
        let released = self.busy.release_stale(Duration::ZERO);
        if aborted > 0 || !released.is_empty() {
            tracing::warn!(aborted, busy_released = released.len(), "Aborted all in-flight operations");
        }
        aborted
    }

    /// Force-complete entries older than the stale timeout and release
    /// orphaned busy tokens. Called once per reaper tick.
    pub async fn reap_stale(&self) -> ReapStats {
        let stale_timeout = self.stale_timeout;
        let reaped: Vec<(ResourceKey, InflightEntry)> = {
            let mut inflight = self.inflight.lock().await;
            let stale_keys: Vec<ResourceKey> = inflight
                .iter()
                .filter(|(_, entry)| entry.started_at.elapsed() > stale_timeout)
                .map(|(key, _)| key.clone())
                .collect();
            stale_keys
                .into_iter()
                .filter_map(|key| inflight.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        let mut stats = ReapStats::default();
        for (key, entry) in reaped {
            if entry.holds_busy {
                self.busy.release(&key);
                stats.busy_released += 1;
            }
            stats.inflight_reaped += 1;
            stats.waiters_timed_out += entry.waiters.len();
            tracing::warn!(
                key = %key,
                action = %entry.action,
                age_secs = entry.started_at.elapsed().as_secs(),
                waiters = entry.waiters.len(),
                "Reaped stale in-flight operation"
            );
            let outcome: Result<Value, OperationError> = Err(OperationError::new(
                ErrorCode::StaleTimeout,
                format!("{} timed out after {:?}", entry.action, stale_timeout),
            ));
            self.fan_out(&entry.waiters, &outcome).await;
        }

        // Busy tokens whose owning entry disappeared without release.
        stats.busy_released += self.busy.release_stale(stale_timeout).len();
        stats.cache_expired = self.cache.cleanup_expired().await;
        stats
    }

    /// Number of keys currently in flight.
    pub async fn inflight_len(&self) -> usize {
        self.inflight.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) fn busy_guard(&self) -> &BusyGuard {
        &self.busy
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &ResultCache {
        &self.cache
    }
}

fn envelope_for(
    request_id: &str,
    outcome: &Result<Value, OperationError>,
    cached: bool,
) -> ResponseEnvelope {
    match outcome {
        Ok(value) => ResponseEnvelope::success(
            request_id,
            if cached { "ok (cached)" } else { "ok" },
            value.clone(),
        ),
        Err(err) => ResponseEnvelope::error(request_id, err.code.clone(), err.message.clone()),
    }
}
