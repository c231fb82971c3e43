use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{Namespace, StorageError, StoreBackend};

/// Process-local backend. Used in tests and when no database path is usable.
#[derive(Debug, Default)]
pub struct MemoryStore {
  data: Mutex<HashMap<(Namespace, String), String>>,
  failing: AtomicBool,
  failing_reads: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every operation fail, to simulate quota or corruption faults.
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Make only reads fail, as a busy or locked database file does.
  pub fn set_failing_reads(&self, failing: bool) {
    self.failing_reads.store(failing, Ordering::SeqCst);
  }

  pub fn len(&self) -> usize {
    self.data.lock().map(|d| d.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn check(&self) -> Result<(), StorageError> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(StorageError::Backend("simulated failure".into()));
    }
    Ok(())
  }

  fn lock(
    &self,
  ) -> Result<std::sync::MutexGuard<'_, HashMap<(Namespace, String), String>>, StorageError> {
    self
      .data
      .lock()
      .map_err(|e| StorageError::Poisoned(e.to_string()))
  }
}

#[async_trait]
impl StoreBackend for MemoryStore {
  async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>, StorageError> {
    self.check()?;
    if self.failing_reads.load(Ordering::SeqCst) {
      return Err(StorageError::Backend("simulated read failure".into()));
    }
    Ok(self.lock()?.get(&(namespace, key.to_string())).cloned())
  }

  async fn set(&self, namespace: Namespace, key: &str, value: &str) -> Result<(), StorageError> {
    self.check()?;
    self
      .lock()?
      .insert((namespace, key.to_string()), value.to_string());
    Ok(())
  }

  async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StorageError> {
    self.check()?;
    self.lock()?.remove(&(namespace, key.to_string()));
    Ok(())
  }

  async fn clear(&self, namespace: Namespace) -> Result<(), StorageError> {
    self.check()?;
    self.lock()?.retain(|(ns, _), _| *ns != namespace);
    Ok(())
  }
}
