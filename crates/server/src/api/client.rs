//! Outbound bridge transport (connect mode).
//!
//! Instead of listening, the bridge dials a remote automation hub and serves
//! requests over that single link. A dropped link aborts every in-flight
//! operation with `CONNECTION_LOST`, then reconnects on a fixed delay; the
//! delay never grows, because the host side expects prompt reattachment.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hostbridge_protocol::{ClientMessage, ErrorCode, ServerMessage};

use crate::app::App;

use super::websocket::{handle_message, CAPABILITY_HEADER, CONNECTION_CHANNEL_BUFFER};

/// Fixed-delay reconnect pacing.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    delay: Duration,
    attempts: u64,
}

impl ReconnectSchedule {
    pub fn new(delay: Duration) -> Self {
        Self { delay, attempts: 0 }
    }

    /// Delay before the next attempt. Always the same; only the attempt
    /// counter moves.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        self.delay
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Dial the configured endpoint and serve it until shutdown. Each dropped
/// link is reported, aborted and redialed after the fixed delay.
pub async fn run_connect_loop(
    app: Arc<App>,
    endpoint_url: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut schedule = ReconnectSchedule::new(app.settings.reconnect_delay);
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        match run_session(&app, endpoint_url, &shutdown).await {
            Ok(()) => {
                // Clean shutdown requested.
                return Ok(());
            }
            Err(e) => {
                let aborted = app.coordinator.abort_all("bridge connection lost").await;
                tracing::warn!(
                    error = %e,
                    aborted,
                    attempt = schedule.attempts() + 1,
                    "Bridge link dropped"
                );
            }
        }
        let delay = schedule.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => return Ok(()),
        }
    }
}

/// One connection attempt plus its session loop. Returns `Ok(())` only on a
/// requested shutdown; any transport failure is an error so the caller
/// reconnects.
async fn run_session(
    app: &Arc<App>,
    endpoint_url: &str,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let mut request = endpoint_url.into_client_request()?;
    if let Some(token) = &app.settings.capability_token {
        request
            .headers_mut()
            .insert(CAPABILITY_HEADER, HeaderValue::from_str(token)?);
    }

    let (stream, _) = connect_async(request).await?;
    let (mut sink, mut source) = stream.split();

    let connection_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CONNECTION_CHANNEL_BUFFER);
    let close_token = app
        .connections
        .register(connection_id, endpoint_url.to_string(), tx.clone())
        .await;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let _ = tx.try_send(ServerMessage::BridgeHandshake {
        session_id: connection_id.to_string(),
        heartbeat_interval_ms: app.settings.heartbeat_interval_ms,
    });
    app.connections.mark_connected(connection_id).await;
    tracing::info!(connection_id = %connection_id, endpoint = %endpoint_url, "Bridge link established");

    let outcome = session_loop(app, connection_id, &tx, &mut source, shutdown, &close_token).await;

    app.connections.unregister(connection_id).await;
    app.coordinator.forget_connection(connection_id).await;
    send_task.abort();
    outcome
}

async fn session_loop(
    app: &Arc<App>,
    connection_id: Uuid,
    tx: &mpsc::Sender<ServerMessage>,
    source: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    shutdown: &CancellationToken,
    close_token: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = close_token.cancelled() => anyhow::bail!("session closed by manager"),
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                if let Some(response) = handle_message(app, connection_id, msg).await {
                                    let _ = tx.try_send(response);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(connection_id = %connection_id, error = %e, "Failed to parse frame");
                                let _ = tx.try_send(ServerMessage::BridgeError {
                                    code: ErrorCode::InvalidPayload,
                                    message: format!("invalid frame: {e}"),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        app.connections.record_heartbeat(connection_id).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        anyhow::bail!("link closed by remote");
                    }
                    Some(Err(e)) => {
                        return Err(e.into());
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
