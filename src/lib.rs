//! # kebun-sync
//!
//! Offline-first synchronization for farm record clients.
//!
//! Reads fall back to a local cache, writes that cannot reach the server are
//! durably queued and applied to the cached lists straight away, and when the
//! connection returns the queue is replayed against the server in order.
//!
//! ```text
//! caller ──► OfflineClient ──► CacheAccessor ───────────────┐
//!                 │                                          ▼
//!                 └──► SyncQueue + OptimisticMutator ──► PersistentStore
//!
//! connectivity ──► SyncManager ──► SyncQueue ──► RestTransport ──► CacheAccessor
//! ```
//!
//! ## Modules
//!
//! - [`store`]: durable key-value storage (SQLite, in-memory)
//! - [`cache`]: timestamped cached responses and freshness rules
//! - [`queue`]: the pending write queue
//! - [`optimistic`]: local application of pending writes
//! - [`api`]: REST transport and the offline-aware client
//! - [`sync`]: queue replay and sync events
//! - [`connectivity`]: online/offline signals

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod optimistic;
pub mod queue;
pub mod store;
pub mod sync;

pub use api::{ApiError, ApiResponse, HttpTransport, OfflineClient, RestTransport};
pub use cache::{CacheAccessor, CacheEntry, CachePolicy, CacheSource};
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, HttpProbe, LinkState, ManualConnectivity};
pub use engine::{EngineSettings, OfflineEngine};
pub use queue::{ActionType, FilePart, Payload, QueuedAction, SyncQueue};
pub use store::{PersistentStore, SqliteStore};
pub use sync::{SyncEvent, SyncManager, SyncOutcome, SyncResult};
