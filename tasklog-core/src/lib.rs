//! Task status audit snapshots, cached history and request gating.

pub mod auth;
pub mod cache;
pub mod clock;
pub mod error;
pub mod gate;
pub mod model;
pub mod rate_limit;
pub mod scheduler;
pub mod snapshot;
pub mod store;

pub use auth::Authenticator;
pub use cache::{CacheStore, Cached, MemoryCacheStore, SnapshotCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use gate::{Access, Admission, GateRequest, Operation, RequestGate};
pub use rate_limit::{RateLimit, RateLimiter};
pub use scheduler::Scheduler;
pub use snapshot::SnapshotEngine;
pub use store::{MemoryStore, SqliteStore, StoreError, TaskStore};
