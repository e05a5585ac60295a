//! HostBridge server library.
//!
//! The concurrency-coordination layer that lets external automation clients
//! issue asynchronous commands against a single-threaded host application.
//!
//! ## Structure
//!
//! - `coordination/` - Single-flight coordinator, busy-set guard, TTL result
//!   cache, owning-thread executor, stale-entry reaper
//! - `host/` - The in-process host state and the registered operations
//! - `api/` - WebSocket entry points (listen and connect modes), connection
//!   manager, request router
//! - `settings` - Environment-driven configuration
//! - `app` - Application composition

pub mod api;
pub mod app;
pub mod coordination;
pub mod error;
pub mod host;
pub mod settings;

pub use app::App;
