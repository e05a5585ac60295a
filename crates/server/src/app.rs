//! Application composition.
//!
//! Wires the owning executor, coordinator, connection manager and router
//! together, and owns the background tasks (reaper sweep, heartbeat sweep,
//! server-initiated pings).

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hostbridge_protocol::ServerMessage;

use crate::api::{ConnectionManager, RequestRouter};
use crate::coordination::{reaper, Coordinator, OwningExecutor};
use crate::host::operations::OperationRegistry;
use crate::host::HostState;
use crate::settings::Settings;

pub struct App {
    pub settings: Settings,
    pub connections: Arc<ConnectionManager>,
    pub coordinator: Arc<Coordinator<HostState>>,
    pub router: RequestRouter,
}

impl App {
    pub fn new(settings: Settings) -> Arc<Self> {
        let connections = Arc::new(ConnectionManager::new());
        let executor = OwningExecutor::spawn(HostState::new());
        let coordinator = Arc::new(Coordinator::new(
            executor,
            connections.clone(),
            settings.cache_ttl,
            settings.stale_timeout,
        ));
        let router = RequestRouter::new(OperationRegistry::builtin(), coordinator.clone());
        Arc::new(Self {
            settings,
            connections,
            coordinator,
            router,
        })
    }

    /// Spawn the periodic background tasks. All of them stop when `shutdown`
    /// is cancelled.
    pub fn spawn_background(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(reaper::spawn(
            self.coordinator.clone(),
            self.settings.tick_interval,
            shutdown.clone(),
        ));

        // Close connections that stopped heartbeating.
        let app = self.clone();
        let sweep_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(app.settings.tick_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let stale = app
                            .connections
                            .stale_connections(app.settings.heartbeat_timeout)
                            .await;
                        for connection_id in stale {
                            tracing::warn!(%connection_id, "Heartbeat timeout");
                            app.connections.request_close(connection_id).await;
                        }
                    }
                    _ = sweep_shutdown.cancelled() => break,
                }
            }
        }));

        // Server-initiated liveness probes.
        let app = self.clone();
        handles.push(tokio::spawn(async move {
            let interval =
                std::time::Duration::from_millis(app.settings.heartbeat_interval_ms.max(1));
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        app.connections.broadcast(ServerMessage::BridgePing).await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        }));

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::BridgeMode;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn fast_settings() -> Settings {
        Settings {
            mode: BridgeMode::Listen {
                host: "127.0.0.1".into(),
                ports: vec![0],
            },
            capability_token: None,
            heartbeat_interval_ms: 20,
            heartbeat_timeout: Duration::from_millis(30),
            reconnect_delay: Duration::from_millis(10),
            tick_interval: Duration::from_millis(10),
            stale_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(10),
            listen_backlog: 10,
            accept_sleep: Duration::from_millis(10),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn heartbeat_sweep_closes_silent_connections() {
        let app = App::new(fast_settings());
        let shutdown = CancellationToken::new();
        let handles = app.spawn_background(shutdown.clone());

        let connection_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(8);
        let token = app
            .connections
            .register(connection_id, "test".to_string(), tx)
            .await;

        // Wait for the sweep to notice the silence.
        for _ in 0..100 {
            if token.is_cancelled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(token.is_cancelled());

        shutdown.cancel();
        for handle in handles {
            handle.await.expect("background task");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ping_task_broadcasts_probes() {
        let app = App::new(fast_settings());
        let shutdown = CancellationToken::new();
        let handles = app.spawn_background(shutdown.clone());

        let connection_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(64);
        app.connections
            .register(connection_id, "test".to_string(), tx)
            .await;

        let frame = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv().await {
                    Some(ServerMessage::BridgePing) => break Some(()),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .expect("ping within deadline");
        assert!(frame.is_some());

        shutdown.cancel();
        for handle in handles {
            handle.await.expect("background task");
        }
    }
}
