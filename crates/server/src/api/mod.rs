//! API layer - WebSocket entry points for both transport modes.

pub mod client;
pub mod connections;
pub mod router;
pub mod websocket;

pub use connections::{ConnectionEvent, ConnectionManager};
pub use router::RequestRouter;
