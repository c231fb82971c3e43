//! Durable key-value storage shared by the cache and the sync queue.
//!
//! Backends report failures through [`StorageError`]. [`PersistentStore`] is the
//! boundary where those failures stop: reads degrade to "absent", writes to a
//! logged no-op, so a full disk or a corrupt database never blocks data entry.
//! Read-modify-write callers use [`PersistentStore::try_get`] instead, since
//! rewriting a value they failed to read would destroy it.

mod memory;
mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Isolated key spaces within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
  Cache,
  Queue,
}

impl Namespace {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Cache => "cache",
      Self::Queue => "queue",
    }
  }
}

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("Storage backend error: {0}")]
  Backend(String),
  #[error("Lock poisoned: {0}")]
  Poisoned(String),
}

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Backend(e.to_string())
  }
}

/// A storage backend. Values are opaque text (serialized JSON).
#[async_trait]
pub trait StoreBackend: Send + Sync {
  async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>, StorageError>;
  async fn set(&self, namespace: Namespace, key: &str, value: &str) -> Result<(), StorageError>;
  async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StorageError>;
  async fn clear(&self, namespace: Namespace) -> Result<(), StorageError>;
}

/// Fault-absorbing handle over a [`StoreBackend`].
#[derive(Clone)]
pub struct PersistentStore {
  backend: Arc<dyn StoreBackend>,
}

impl PersistentStore {
  pub fn new(backend: impl StoreBackend + 'static) -> Self {
    Self {
      backend: Arc::new(backend),
    }
  }

  pub fn from_arc(backend: Arc<dyn StoreBackend>) -> Self {
    Self { backend }
  }

  /// In-memory store, nothing survives the process.
  pub fn in_memory() -> Self {
    Self::new(MemoryStore::new())
  }

  pub async fn get(&self, namespace: Namespace, key: &str) -> Option<String> {
    match self.try_get(namespace, key).await {
      Ok(value) => value,
      Err(e) => {
        warn!(namespace = namespace.as_str(), key, error = %e, "store read failed, treating as absent");
        None
      }
    }
  }

  /// Like [`get`](Self::get), but a backend fault is returned rather than read
  /// as absent.
  pub async fn try_get(
    &self,
    namespace: Namespace,
    key: &str,
  ) -> Result<Option<String>, StorageError> {
    self.backend.get(namespace, key).await
  }

  /// Returns false when the write did not reach storage.
  pub async fn set(&self, namespace: Namespace, key: &str, value: &str) -> bool {
    match self.backend.set(namespace, key, value).await {
      Ok(()) => true,
      Err(e) => {
        warn!(namespace = namespace.as_str(), key, error = %e, "store write failed");
        false
      }
    }
  }

  pub async fn remove(&self, namespace: Namespace, key: &str) {
    if let Err(e) = self.backend.remove(namespace, key).await {
      warn!(namespace = namespace.as_str(), key, error = %e, "store remove failed");
    }
  }

  pub async fn clear(&self, namespace: Namespace) {
    if let Err(e) = self.backend.clear(namespace).await {
      warn!(namespace = namespace.as_str(), error = %e, "store clear failed");
    }
  }
}

impl std::fmt::Debug for PersistentStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PersistentStore").finish_non_exhaustive()
  }
}
