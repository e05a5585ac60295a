//! HostBridge Protocol - Wire types shared by the bridge server and automation clients
//!
//! This crate contains everything that crosses the WebSocket boundary:
//! - Request/response envelopes for automation commands
//! - Control message types (ClientMessage, ServerMessage)
//! - The coordination-layer error code taxonomy
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde and serde_json
//! 2. **No business logic** - Pure data types and serialization
//! 3. **Stable field names** - Wire fields are camelCase (`requestId`, `subAction`,
//!    `errorCode`) for compatibility with existing automation clients

pub mod envelope;
pub mod error;
pub mod messages;

pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use error::ErrorCode;
pub use messages::{BridgeState, ClientMessage, ServerMessage};
