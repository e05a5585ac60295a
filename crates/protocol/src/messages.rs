//! WebSocket message types for bridge-client communication.
//!
//! All frames are JSON objects tagged by a `type` field. Automation requests
//! and responses flatten their envelope into the frame, so a request looks like
//! `{"type":"automation_request","requestId":"r1","action":"asset", ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::ErrorCode;

/// Lifecycle state of the bridge as seen by health/telemetry consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Disconnected => write!(f, "Disconnected"),
            BridgeState::Connecting => write!(f, "Connecting"),
            BridgeState::Connected => write!(f, "Connected"),
        }
    }
}

/// Messages from an automation client to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Optional greeting; the capability token normally travels in the
    /// `x-bridge-capability` header, this is a fallback for clients that
    /// cannot set headers.
    Handshake {
        #[serde(
            rename = "capabilityToken",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        capability_token: Option<String>,
    },
    /// Client-initiated liveness signal; refreshes the heartbeat deadline.
    BridgeHeartbeat,
    /// Liveness probe; the bridge answers with `bridge_pong`.
    BridgePing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Answer to a server-initiated `bridge_ping`.
    BridgePong,
    /// Health query; answered with `bridge_state`.
    BridgeStateQuery,
    /// An automation command to route to a registered operation.
    AutomationRequest {
        #[serde(flatten)]
        envelope: RequestEnvelope,
    },
}

/// Messages from the bridge to an automation client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when a connection is accepted.
    BridgeHandshake {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "heartbeatIntervalMs")]
        heartbeat_interval_ms: u64,
    },
    /// Server-initiated liveness probe.
    BridgePing,
    /// Answer to a client-initiated `bridge_ping`.
    BridgePong,
    /// Answer to `bridge_state_query`.
    BridgeState { state: BridgeState },
    /// Terminal response for one automation request.
    AutomationResponse {
        #[serde(flatten)]
        envelope: ResponseEnvelope,
    },
    /// Out-of-band push (log streaming etc.); bypasses request/response
    /// correlation entirely.
    BridgeEvent { payload: Value },
    /// Frame-level failure (unparseable message, refused handshake).
    BridgeError { code: ErrorCode, message: String },
}
