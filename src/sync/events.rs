//! Sync event feed.
//!
//! Listeners subscribe to an [`EventBus`] and get a [`Subscription`] that
//! yields events in emission order. Dropping the subscription unsubscribes.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

use super::manager::SyncResult;
use crate::queue::QueuedAction;

/// Sync progress events
#[derive(Debug, Clone)]
pub enum SyncEvent {
  /// A pass took its snapshot and is about to replay it
  PassStarted { pending: usize },
  /// The server accepted a queued action; it has left the queue
  ActionSucceeded {
    action: QueuedAction,
    response: Value,
  },
  /// The server rejected or could not be reached for an action; it stays queued
  ActionFailed { action: QueuedAction, error: String },
  /// Every action in the snapshot has been attempted
  PassCompleted(SyncResult),
}

#[derive(Default)]
struct Listeners {
  next_id: u64,
  senders: BTreeMap<u64, mpsc::UnboundedSender<SyncEvent>>,
}

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
  listeners: Arc<Mutex<Listeners>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&self) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = match self.listeners.lock() {
      Ok(mut listeners) => {
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.senders.insert(id, tx);
        id
      }
      // A poisoned bus delivers nothing; the receiver just stays empty
      Err(_) => u64::MAX,
    };

    Subscription {
      id,
      rx,
      bus: Arc::downgrade(&self.listeners),
    }
  }

  /// Deliver `event` to every current subscriber.
  pub fn emit(&self, event: SyncEvent) {
    if let Ok(mut listeners) = self.listeners.lock() {
      listeners
        .senders
        .retain(|_, tx| tx.send(event.clone()).is_ok());
    }
  }

  pub fn subscriber_count(&self) -> usize {
    self
      .listeners
      .lock()
      .map(|listeners| listeners.senders.len())
      .unwrap_or(0)
  }
}

impl std::fmt::Debug for EventBus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EventBus")
      .field("subscribers", &self.subscriber_count())
      .finish()
  }
}

/// A registered listener.
pub struct Subscription {
  id: u64,
  rx: mpsc::UnboundedReceiver<SyncEvent>,
  bus: Weak<Mutex<Listeners>>,
}

impl Subscription {
  /// Receive the next event
  pub async fn next(&mut self) -> Option<SyncEvent> {
    self.rx.recv().await
  }

  /// Next event if one is already waiting.
  pub fn try_next(&mut self) -> Option<SyncEvent> {
    self.rx.try_recv().ok()
  }

  /// Stop receiving events.
  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(listeners) = self.bus.upgrade() {
      if let Ok(mut listeners) = listeners.lock() {
        listeners.senders.remove(&self.id);
      }
    }
  }
}
