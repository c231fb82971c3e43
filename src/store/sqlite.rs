//! SQLite-backed store.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{Namespace, StorageError, StoreBackend};

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, key)
);
"#;

/// SQLite-based storage. One row per (namespace, key).
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("kebun-sync").join("offline.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::Poisoned(e.to_string()))
  }
}

#[async_trait]
impl StoreBackend for SqliteStore {
  async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>, StorageError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_store WHERE namespace = ? AND key = ?",
        params![namespace.as_str(), key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  async fn set(&self, namespace: Namespace, key: &str, value: &str) -> Result<(), StorageError> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_store (namespace, key, value, updated_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![namespace.as_str(), key, value],
    )?;
    Ok(())
  }

  async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StorageError> {
    let conn = self.conn()?;
    conn.execute(
      "DELETE FROM kv_store WHERE namespace = ? AND key = ?",
      params![namespace.as_str(), key],
    )?;
    Ok(())
  }

  async fn clear(&self, namespace: Namespace) -> Result<(), StorageError> {
    let conn = self.conn()?;
    conn.execute(
      "DELETE FROM kv_store WHERE namespace = ?",
      params![namespace.as_str()],
    )?;
    Ok(())
  }
}
