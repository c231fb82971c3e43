//! Queue replay and the events it produces.

mod events;
mod manager;

pub use events::{EventBus, Subscription, SyncEvent};
pub use manager::{
  ReplayError, ReplayFailure, SyncManager, SyncOutcome, SyncResult, SyncState,
  DEFAULT_SETTLE_DELAY,
};
