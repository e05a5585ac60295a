//! Connection management for WebSocket automation clients.
//!
//! Tracks live connections, their heartbeat freshness and their lifecycle
//! state, and owns delivery of server frames to each client's outbound
//! channel. Implements the coordinator's fan-out seam, so a completed
//! operation reaches every waiting connection through one code path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hostbridge_protocol::{BridgeState, ResponseEnvelope, ServerMessage};

use crate::coordination::ResponseSink;

/// Information about one connected automation client.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    /// Remote address, or the endpoint URL in connect mode.
    pub peer: String,
    pub state: BridgeState,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
}

/// Lifecycle notifications for health/telemetry consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Registered { connection_id: Uuid },
    Connected { connection_id: Uuid },
    Closed { connection_id: Uuid },
}

type Registered = (ConnectionInfo, mpsc::Sender<ServerMessage>, CancellationToken);

/// Buffer for lifecycle event subscribers; a slow subscriber lags, it never
/// blocks connection handling.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Manages all active bridge connections.
pub struct ConnectionManager {
    connections: RwLock<HashMap<Uuid, Registered>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            connections: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Register a new connection in the `Connecting` state. The returned
    /// token is cancelled when the manager wants the session closed.
    pub async fn register(
        &self,
        connection_id: Uuid,
        peer: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        let info = ConnectionInfo {
            connection_id,
            peer,
            state: BridgeState::Connecting,
            connected_at: Utc::now(),
            last_heartbeat: Instant::now(),
        };
        let mut connections = self.connections.write().await;
        connections.insert(connection_id, (info, sender, token.clone()));
        drop(connections);
        tracing::debug!(connection_id = %connection_id, "Connection registered");
        self.emit(ConnectionEvent::Registered { connection_id });
        token
    }

    /// Move a connection to `Connected` once its handshake frame has been
    /// delivered.
    pub async fn mark_connected(&self, connection_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some((info, _, _)) = connections.get_mut(&connection_id) {
            info.state = BridgeState::Connected;
            tracing::info!(connection_id = %connection_id, peer = %info.peer, "Connection established");
            self.emit(ConnectionEvent::Connected { connection_id });
        }
    }

    pub async fn unregister(&self, connection_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some((info, _, token)) = connections.remove(&connection_id) {
            token.cancel();
            tracing::debug!(connection_id = %connection_id, peer = %info.peer, "Connection unregistered");
            self.emit(ConnectionEvent::Closed { connection_id });
        }
    }

    pub async fn get(&self, connection_id: Uuid) -> Option<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections.get(&connection_id).map(|(info, _, _)| info.clone())
    }

    /// Refresh a connection's liveness deadline. Any inbound frame counts.
    pub async fn record_heartbeat(&self, connection_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some((info, _, _)) = connections.get_mut(&connection_id) {
            info.last_heartbeat = Instant::now();
        }
    }

    /// Connections whose last heartbeat is older than `timeout`.
    pub async fn stale_connections(&self, timeout: Duration) -> Vec<Uuid> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|(info, _, _)| info.last_heartbeat.elapsed() > timeout)
            .map(|(info, _, _)| info.connection_id)
            .collect()
    }

    /// Ask a session to close. The session loop observes its token and tears
    /// down; unregistration happens on its exit path.
    pub async fn request_close(&self, connection_id: Uuid) {
        let connections = self.connections.read().await;
        if let Some((info, _, token)) = connections.get(&connection_id) {
            tracing::warn!(connection_id = %connection_id, peer = %info.peer, "Closing connection");
            token.cancel();
        }
    }

    /// Aggregate lifecycle state across all connections: `Connected` if any
    /// session finished its handshake, `Connecting` if any is mid-handshake,
    /// otherwise `Disconnected`.
    pub async fn bridge_state(&self) -> BridgeState {
        let connections = self.connections.read().await;
        let mut state = BridgeState::Disconnected;
        for (info, _, _) in connections.values() {
            match info.state {
                BridgeState::Connected => return BridgeState::Connected,
                BridgeState::Connecting => state = BridgeState::Connecting,
                BridgeState::Disconnected => {}
            }
        }
        state
    }

    /// Send a frame to one connection.
    pub async fn send_to(&self, connection_id: Uuid, message: ServerMessage) {
        let connections = self.connections.read().await;
        if let Some((info, sender, _)) = connections.get(&connection_id) {
            if let Err(e) = sender.try_send(message) {
                tracing::warn!(
                    connection_id = %info.connection_id,
                    error = %e,
                    "Failed to send frame"
                );
            }
        }
    }

    /// Broadcast a frame to every connection.
    pub async fn broadcast(&self, message: ServerMessage) {
        let connections = self.connections.read().await;
        for (info, sender, _) in connections.values() {
            if let Err(e) = sender.try_send(message.clone()) {
                tracing::warn!(
                    connection_id = %info.connection_id,
                    error = %e,
                    "Failed to broadcast frame"
                );
            }
        }
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseSink for ConnectionManager {
    async fn deliver(&self, connection_id: Uuid, response: ResponseEnvelope) {
        self.send_to(
            connection_id,
            ServerMessage::AutomationResponse { envelope: response },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registered(manager: &ConnectionManager) -> (Uuid, mpsc::Receiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        manager.register(id, "test".to_string(), tx).await;
        (id, rx)
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let manager = ConnectionManager::new();
        let (id, _rx) = registered(&manager).await;
        assert_eq!(manager.count().await, 1);
        assert_eq!(manager.get(id).await.expect("info").state, BridgeState::Connecting);

        manager.unregister(id).await;
        assert_eq!(manager.count().await, 0);
        assert!(manager.get(id).await.is_none());
    }

    #[tokio::test]
    async fn bridge_state_aggregates_sessions() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.bridge_state().await, BridgeState::Disconnected);

        let (id, _rx) = registered(&manager).await;
        assert_eq!(manager.bridge_state().await, BridgeState::Connecting);

        manager.mark_connected(id).await;
        assert_eq!(manager.bridge_state().await, BridgeState::Connected);
    }

    #[tokio::test]
    async fn deliver_wraps_the_response_in_a_frame() {
        let manager = ConnectionManager::new();
        let (id, mut rx) = registered(&manager).await;
        manager
            .deliver(id, ResponseEnvelope::success("r1", "ok", serde_json::json!({})))
            .await;
        match rx.recv().await.expect("frame") {
            ServerMessage::AutomationResponse { envelope } => {
                assert_eq!(envelope.request_id, "r1");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_connections_respect_the_timeout() {
        let manager = ConnectionManager::new();
        let (id, _rx) = registered(&manager).await;
        assert!(manager.stale_connections(Duration::from_secs(60)).await.is_empty());

        tokio::time::sleep(Duration::from_millis(15)).await;
        let stale = manager.stale_connections(Duration::from_millis(1)).await;
        assert_eq!(stale, vec![id]);

        manager.record_heartbeat(id).await;
        assert!(manager.stale_connections(Duration::from_millis(10)).await.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_events_reach_subscribers() {
        let manager = ConnectionManager::new();
        let mut events = manager.subscribe();
        let (id, _rx) = registered(&manager).await;
        manager.mark_connected(id).await;
        manager.unregister(id).await;

        assert_eq!(
            events.recv().await.expect("event"),
            ConnectionEvent::Registered { connection_id: id }
        );
        assert_eq!(
            events.recv().await.expect("event"),
            ConnectionEvent::Connected { connection_id: id }
        );
        assert_eq!(
            events.recv().await.expect("event"),
            ConnectionEvent::Closed { connection_id: id }
        );
    }

    #[tokio::test]
    async fn request_close_cancels_the_session_token() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(8);
        let token = manager.register(id, "test".to_string(), tx).await;
        assert!(!token.is_cancelled());
        manager.request_close(id).await;
        assert!(token.is_cancelled());
    }
}
