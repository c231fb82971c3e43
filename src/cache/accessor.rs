//! Timestamped reads and writes over the `cache` namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::{Namespace, PersistentStore};

/// A cached value together with the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  #[serde(skip)]
  pub key: String,
  pub data: Value,
  pub timestamp: DateTime<Utc>,
}

/// Get/set access to cached JSON values.
#[derive(Clone)]
pub struct CacheAccessor {
  store: PersistentStore,
  clock: Arc<dyn Clock>,
}

impl CacheAccessor {
  pub fn new(store: PersistentStore, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  /// Store `data` under `key`, replacing whatever was there.
  ///
  /// The new timestamp is never earlier than the one being replaced, even if
  /// the clock stepped backwards in between.
  pub async fn cache_data(&self, key: &str, data: &Value) -> bool {
    let mut timestamp = self.clock.now();
    if let Some(previous) = self.get_entry(key).await {
      timestamp = timestamp.max(previous.timestamp);
    }

    let entry = CacheEntry {
      key: key.to_string(),
      data: data.clone(),
      timestamp,
    };

    let text = match serde_json::to_string(&entry) {
      Ok(text) => text,
      Err(e) => {
        warn!(key, error = %e, "failed to serialize cache entry");
        return false;
      }
    };

    debug!(key, "caching data");
    self.store.set(Namespace::Cache, key, &text).await
  }

  /// The cached value for `key`, or `None` when absent or unreadable.
  pub async fn get_cached_data(&self, key: &str) -> Option<Value> {
    self.get_entry(key).await.map(|entry| entry.data)
  }

  /// The full cache entry, including when it was written.
  pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
    let text = self.store.get(Namespace::Cache, key).await?;
    match serde_json::from_str::<CacheEntry>(&text) {
      Ok(mut entry) => {
        entry.key = key.to_string();
        Some(entry)
      }
      Err(e) => {
        warn!(key, error = %e, "corrupt cache entry, treating as miss");
        None
      }
    }
  }

  pub async fn remove(&self, key: &str) {
    self.store.remove(Namespace::Cache, key).await;
  }

  /// Drop every cached value. The queue namespace is untouched.
  pub async fn clear(&self) {
    self.store.clear(Namespace::Cache).await;
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }
}

impl std::fmt::Debug for CacheAccessor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheAccessor").finish_non_exhaustive()
  }
}
