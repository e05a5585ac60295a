//! Periodic sweep of stale coordination state.
//!
//! A single interval task drives [`Coordinator::reap_stale`], which
//! force-completes hung in-flight entries, releases orphaned busy tokens and
//! evicts expired cache entries. Without it, a hung host operation would wedge
//! its resource key forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::single_flight::Coordinator;

/// Spawn the reaper tick task. The task runs until `shutdown` is cancelled.
pub fn spawn<S: Send + 'static>(
    coordinator: Arc<Coordinator<S>>,
    tick_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let stats = coordinator.reap_stale().await;
                    if stats.inflight_reaped > 0 || stats.busy_released > 0 || stats.cache_expired > 0 {
                        tracing::info!(
                            inflight_reaped = stats.inflight_reaped,
                            waiters_timed_out = stats.waiters_timed_out,
                            busy_released = stats.busy_released,
                            cache_expired = stats.cache_expired,
                            "Reaper sweep"
                        );
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Reaper stopped");
                    break;
                }
            }
        }
    })
}
