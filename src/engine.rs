//! Wiring of the offline stack.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{OfflineClient, RestTransport};
use crate::cache::{CacheAccessor, CachePolicy};
use crate::clock::Clock;
use crate::connectivity::ConnectivityMonitor;
use crate::optimistic::OptimisticMutator;
use crate::queue::SyncQueue;
use crate::store::PersistentStore;
use crate::sync::{SyncManager, DEFAULT_SETTLE_DELAY};

/// Tunables for [`OfflineEngine::new`].
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
  pub cache_policy: CachePolicy,
  pub settle_delay: Duration,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      cache_policy: CachePolicy::default(),
      settle_delay: DEFAULT_SETTLE_DELAY,
    }
  }
}

/// The client and sync manager built over one shared store.
///
/// Owned by the application root; hand out clones of `client` and the
/// `manager` handle to whatever needs them.
pub struct OfflineEngine {
  pub client: OfflineClient,
  pub manager: Arc<SyncManager>,
  pub connectivity: Arc<dyn ConnectivityMonitor>,
}

impl OfflineEngine {
  pub fn new(
    store: PersistentStore,
    transport: Arc<dyn RestTransport>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
  ) -> Self {
    let cache = CacheAccessor::new(store.clone(), clock.clone());
    let queue = Arc::new(SyncQueue::new(store, clock.clone()));
    let mutator = Arc::new(OptimisticMutator::new(cache.clone(), clock));

    let client = OfflineClient::new(
      transport.clone(),
      connectivity.clone(),
      cache.clone(),
      queue.clone(),
      mutator,
    )
    .with_policy(settings.cache_policy);

    let manager = Arc::new(
      SyncManager::new(queue, transport, cache).with_settle_delay(settings.settle_delay),
    );

    Self {
      client,
      manager,
      connectivity,
    }
  }

  /// Replay the queue automatically each time connectivity returns.
  pub fn start_auto_sync(&self) -> tokio::task::JoinHandle<()> {
    self.manager.spawn_auto_sync(self.connectivity.as_ref())
  }
}
