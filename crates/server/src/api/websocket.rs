//! WebSocket handling for automation clients (listen mode).
//!
//! Each accepted socket gets its own session loop plus a forwarding task that
//! drains the connection's outbound channel. Clients authenticate with the
//! `x-bridge-capability` header, or with a `handshake` frame as a fallback
//! for clients that cannot set headers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use hostbridge_protocol::{ClientMessage, ErrorCode, ServerMessage};

use crate::app::App;

/// Buffer size for per-connection outbound channel.
pub(crate) const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// Header carrying the shared capability token.
pub const CAPABILITY_HEADER: &str = "x-bridge-capability";

/// WebSocket upgrade handler, the entry point for new connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(app): State<Arc<App>>,
) -> Response {
    let header_token = headers
        .get(CAPABILITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let authorized = match (&app.settings.capability_token, &header_token) {
        // No token configured, everyone is welcome.
        (None, _) => true,
        (Some(expected), Some(supplied)) => {
            if supplied == expected {
                true
            } else {
                tracing::warn!(peer = %addr, "Rejected connection with wrong capability token");
                return (StatusCode::UNAUTHORIZED, "invalid capability token").into_response();
            }
        }
        // Header absent: allow the upgrade, demand a handshake frame.
        (Some(_), None) => false,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, app, addr, authorized))
}

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, app: Arc<App>, addr: SocketAddr, mut authorized: bool) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection_id = Uuid::new_v4();

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CONNECTION_CHANNEL_BUFFER);
    let close_token = app
        .connections
        .register(connection_id, addr.to_string(), tx.clone())
        .await;

    // Forward frames from the connection's channel to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Clients that could not send the header must lead with a handshake
    // frame before anything else is accepted. The wait is bounded by the
    // heartbeat timeout and by the manager's close token, so a silent
    // connection cannot sit in Connecting forever.
    if !authorized {
        let first = tokio::select! {
            _ = close_token.cancelled() => None,
            frame = tokio::time::timeout(app.settings.heartbeat_timeout, ws_receiver.next()) => {
                frame.ok().flatten()
            }
        };
        match first {
            Some(Ok(Message::Text(text)))
                if handshake_token(&text).as_deref() == app.settings.capability_token.as_deref() =>
            {
                authorized = true;
            }
            _ => {
                tracing::warn!(connection_id = %connection_id, peer = %addr, "Refused unauthenticated connection");
                let _ = tx.try_send(ServerMessage::BridgeError {
                    code: ErrorCode::InvalidArgument,
                    message: "capability token required".to_string(),
                });
            }
        }
    }

    if authorized {
        let _ = tx.try_send(ServerMessage::BridgeHandshake {
            session_id: connection_id.to_string(),
            heartbeat_interval_ms: app.settings.heartbeat_interval_ms,
        });
        app.connections.mark_connected(connection_id).await;

        loop {
            tokio::select! {
                _ = close_token.cancelled() => {
                    tracing::info!(connection_id = %connection_id, "Connection closed by manager");
                    break;
                }
                incoming = ws_receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(msg) => {
                                    if let Some(response) = handle_message(&app, connection_id, msg).await {
                                        if tx.try_send(response).is_err() {
                                            tracing::warn!(
                                                connection_id = %connection_id,
                                                "Failed to send response, channel full or closed"
                                            );
                                        }
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
                            tracing::info!(connection_id = %connection_id, "Socket closed by client");
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::error!(connection_id = %connection_id, error = %e, "Socket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    app.connections.unregister(connection_id).await;
    app.coordinator.forget_connection(connection_id).await;
    send_task.abort();
    tracing::info!(connection_id = %connection_id, peer = %addr, "Connection terminated");
}

/// Dispatch one parsed frame. Shared between listen and connect modes.
pub(crate) async fn handle_message(
    app: &App,
    connection_id: Uuid,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    app.connections.record_heartbeat(connection_id).await;
    match msg {
        // Token already checked at upgrade or session start.
        ClientMessage::Handshake { .. } => None,
        ClientMessage::BridgeHeartbeat => None,
        ClientMessage::BridgePing { .. } => Some(ServerMessage::BridgePong),
        ClientMessage::BridgePong => None,
        ClientMessage::BridgeStateQuery => Some(ServerMessage::BridgeState {
            state: app.connections.bridge_state().await,
        }),
        ClientMessage::AutomationRequest { envelope } => app
            .router
            .dispatch(connection_id, envelope)
            .await
            .map(|envelope| ServerMessage::AutomationResponse { envelope }),
    }
}

fn handshake_token(text: &str) -> Option<String> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Handshake { capability_token }) => capability_token,
        _ => None,
    }
}

/// Build the axum router for the bridge endpoint.
pub fn bridge_router(app: Arc<App>) -> Router {
    Router::new().route("/", any(ws_handler)).with_state(app)
}

fn bind_with_backlog(addr: SocketAddr, backlog: u32) -> std::io::Result<tokio::net::TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Bind one listener with an explicit accept backlog. Port 0 picks a free
/// port; the bound address is returned for callers that need it. The serve
/// loop restarts after transient accept failures, pausing `accept_sleep`
/// between attempts.
pub async fn spawn_listener(
    app: Arc<App>,
    addr: SocketAddr,
    backlog: u32,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = bind_with_backlog(addr, backlog)?;
    let bound = listener.local_addr()?;
    tracing::info!(addr = %bound, "Bridge listening");

    let accept_sleep = app.settings.accept_sleep;
    let router = bridge_router(app);
    let handle = tokio::spawn(async move {
        let mut listener = Some(listener);
        loop {
            let current = match listener.take() {
                Some(l) => l,
                None => match bind_with_backlog(bound, backlog) {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::error!(addr = %bound, error = %e, "Rebind failed");
                        tokio::time::sleep(accept_sleep).await;
                        continue;
                    }
                },
            };
            match axum::serve(
                current,
                router
                    .clone()
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            {
                Ok(()) => break,
                Err(e) => {
                    tracing::error!(addr = %bound, error = %e, "Listener failed, restarting");
                    tokio::time::sleep(accept_sleep).await;
                }
            }
        }
    });
    Ok((bound, handle))
}

/// Bind every configured port and serve until all listeners stop.
pub async fn serve_listeners(
    app: Arc<App>,
    host: &str,
    ports: &[u16],
) -> anyhow::Result<()> {
    let backlog = app.settings.listen_backlog;
    let mut handles = Vec::with_capacity(ports.len());
    for port in ports {
        let addr: SocketAddr = format!("{host}:{port}").parse()?;
        let (_, handle) = spawn_listener(app.clone(), addr, backlog).await?;
        handles.push(handle);
    }
    for handle in handles {
        handle.await?;
    }
    Ok(())
}
