//! Concurrency coordination between many async clients and one owning host
//! context: request coalescing, busy exclusion, result caching, the owning
//! executor and the stale-entry reaper.

pub mod busy;
pub mod cache;
pub mod executor;
pub mod key;
pub mod reaper;
pub mod single_flight;

pub use busy::BusyGuard;
pub use cache::{CachedOutcome, ResultCache};
pub use executor::{HostTask, OwningExecutor};
pub use key::ResourceKey;
pub use single_flight::{Coordinator, ExecutionSpec, ReapStats, ResponseSink, Waiter};
