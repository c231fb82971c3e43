//! Replay of queued writes against the server.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{EventBus, Subscription, SyncEvent};
use crate::api::{refresh_list, ApiError, RestTransport};
use crate::cache::CacheAccessor;
use crate::connectivity::{ConnectivityMonitor, LinkState};
use crate::queue::{ActionType, QueuedAction, SyncQueue};

/// Default pause between reconnecting and starting a pass.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Syncing,
}

/// A queued action that the server did not accept during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayFailure {
  pub action: QueuedAction,
  pub error: String,
}

/// Tally of one sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
  pub success_count: usize,
  pub fail_count: usize,
  pub errors: Vec<ReplayFailure>,
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
  /// Another pass was in progress; nothing was done
  AlreadySyncing,
  Completed(SyncResult),
}

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error(transparent)]
  Api(#[from] ApiError),
  #[error("{action_type} action has no record id")]
  MissingId { action_type: ActionType },
}

/// Coordinates sync passes. Construct once and share behind an `Arc`.
pub struct SyncManager {
  queue: Arc<SyncQueue>,
  transport: Arc<dyn RestTransport>,
  cache: CacheAccessor,
  events: EventBus,
  settle_delay: Duration,
  syncing: AtomicBool,
}

/// Clears the in-progress flag however the pass ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

impl SyncManager {
  pub fn new(
    queue: Arc<SyncQueue>,
    transport: Arc<dyn RestTransport>,
    cache: CacheAccessor,
  ) -> Self {
    Self {
      queue,
      transport,
      cache,
      events: EventBus::new(),
      settle_delay: DEFAULT_SETTLE_DELAY,
      syncing: AtomicBool::new(false),
    }
  }

  /// Set the delay between reconnecting and starting an automatic pass.
  pub fn with_settle_delay(mut self, delay: Duration) -> Self {
    self.settle_delay = delay;
    self
  }

  pub fn state(&self) -> SyncState {
    if self.syncing.load(Ordering::SeqCst) {
      SyncState::Syncing
    } else {
      SyncState::Idle
    }
  }

  pub fn events(&self) -> &EventBus {
    &self.events
  }

  pub fn subscribe(&self) -> Subscription {
    self.events.subscribe()
  }

  /// Replay a snapshot of the queue, oldest first.
  ///
  /// Each accepted action is removed from the durable queue as soon as the
  /// server confirms it. Rejected actions stay queued for the next pass and do
  /// not stop the remaining ones from being tried.
  pub async fn sync_all(&self) -> SyncOutcome {
    if self
      .syncing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("sync requested while a pass is running");
      return SyncOutcome::AlreadySyncing;
    }
    let _guard = PassGuard(&self.syncing);

    let snapshot = self.queue.peek_all().await;
    info!(pending = snapshot.len(), "sync pass started");
    self.events.emit(SyncEvent::PassStarted {
      pending: snapshot.len(),
    });

    let mut result = SyncResult::default();
    let mut synced_entities: Vec<String> = Vec::new();

    for action in snapshot {
      match self.replay(&action).await {
        Ok(response) => {
          self.queue.remove(&action.queue_id).await;
          result.success_count += 1;
          if !synced_entities.contains(&action.entity) {
            synced_entities.push(action.entity.clone());
          }
          debug!(queue_id = %action.queue_id, entity = %action.entity, "action replayed");
          self
            .events
            .emit(SyncEvent::ActionSucceeded { action, response });
        }
        Err(e) => {
          warn!(queue_id = %action.queue_id, entity = %action.entity, error = %e, "replay failed, keeping action");
          let error = e.to_string();
          result.fail_count += 1;
          result.errors.push(ReplayFailure {
            action: action.clone(),
            error: error.clone(),
          });
          self.events.emit(SyncEvent::ActionFailed { action, error });
        }
      }
    }

    for entity in &synced_entities {
      if let Err(e) = refresh_list(self.transport.as_ref(), &self.cache, entity).await {
        warn!(entity = %entity, error = %e, "refresh after sync failed");
      }
    }

    info!(
      succeeded = result.success_count,
      failed = result.fail_count,
      "sync pass completed"
    );
    self.events.emit(SyncEvent::PassCompleted(result.clone()));
    SyncOutcome::Completed(result)
  }

  async fn replay(&self, action: &QueuedAction) -> Result<Value, ReplayError> {
    let entity = action.entity.as_str();
    let response = match action.action_type {
      ActionType::Create => self.transport.create(entity, &action.payload).await?,
      ActionType::Update => {
        let id = self.record_id(action)?;
        self.transport.update(entity, &id, &action.payload).await?
      }
      ActionType::Delete => {
        let id = self.record_id(action)?;
        self.transport.delete(entity, &id).await?
      }
    };
    Ok(response)
  }

  fn record_id(&self, action: &QueuedAction) -> Result<String, ReplayError> {
    action.payload.record_id().ok_or(ReplayError::MissingId {
      action_type: action.action_type,
    })
  }

  /// Start a pass whenever connectivity comes back.
  ///
  /// An offline → online transition waits out the settle delay first. Any
  /// further transition during the delay restarts it (back online) or drops
  /// it (offline again), so a flapping link yields one pass, not many. A
  /// reconnect that happens while a pass is running schedules another pass
  /// once it ends.
  pub fn spawn_auto_sync(self: &Arc<Self>, monitor: &dyn ConnectivityMonitor) -> JoinHandle<()> {
    let rx = monitor.subscribe();
    // Read before spawning so a reconnect that lands first is not missed
    let seen = rx.borrow().reconnects;
    let manager = Arc::clone(self);
    tokio::spawn(async move { manager.run_auto_sync(rx, seen).await })
  }

  async fn run_auto_sync(&self, mut rx: watch::Receiver<LinkState>, mut seen: u64) {
    loop {
      // Wait for a reconnect that no pass has answered yet
      loop {
        let link = *rx.borrow_and_update();
        if link.online && link.reconnects > seen {
          seen = link.reconnects;
          break;
        }
        if rx.changed().await.is_err() {
          return;
        }
      }

      let settled = loop {
        tokio::select! {
          _ = tokio::time::sleep(self.settle_delay) => break true,
          changed = rx.changed() => {
            if changed.is_err() {
              return;
            }
            let link = *rx.borrow_and_update();
            seen = link.reconnects;
            if !link.online {
              break false;
            }
          }
        }
      };

      if settled {
        info!("connection restored, syncing queued actions");
        if let SyncOutcome::AlreadySyncing = self.sync_all().await {
          debug!("automatic pass skipped, manual pass in progress");
        }
      }
    }
  }
}

impl std::fmt::Debug for SyncManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SyncManager")
      .field("state", &self.state())
      .field("settle_delay", &self.settle_delay)
      .finish_non_exhaustive()
  }
}
