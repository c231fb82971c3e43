//! In-memory stand-in for the REST server, used by tests.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::error::ApiError;
use super::transport::RestTransport;
use crate::queue::Payload;

pub(crate) struct MockTransport {
  reachable: AtomicBool,
  tables: Mutex<HashMap<String, Vec<Value>>>,
  next_id: AtomicU64,
  rejected: Mutex<HashSet<String>>,
  calls: Mutex<Vec<String>>,
  gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self {
      reachable: AtomicBool::new(true),
      tables: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(100),
      rejected: Mutex::new(HashSet::new()),
      calls: Mutex::new(Vec::new()),
      gate: Mutex::new(None),
    }
  }

  /// Simulate a dead network: every call fails at the transport level.
  pub fn set_reachable(&self, reachable: bool) {
    self.reachable.store(reachable, Ordering::SeqCst);
  }

  pub fn seed(&self, entity: &str, rows: Value) {
    let rows = rows.as_array().cloned().unwrap_or_default();
    self.tables.lock().unwrap().insert(entity.to_string(), rows);
  }

  pub fn rows(&self, entity: &str) -> Vec<Value> {
    self
      .tables
      .lock()
      .unwrap()
      .get(entity)
      .cloned()
      .unwrap_or_default()
  }

  /// Answer the given call (e.g. "POST /hasil") with a 422.
  pub fn reject(&self, call: &str) {
    self.rejected.lock().unwrap().insert(call.to_string());
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  /// Hold every write until `release` is notified. `started` fires as a write
  /// begins waiting.
  pub fn pause_writes(&self) -> (Arc<Notify>, Arc<Notify>) {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    *self.gate.lock().unwrap() = Some((started.clone(), release.clone()));
    (started, release)
  }

  /// Stop holding writes. Calls already waiting still need `release`.
  pub fn resume_writes(&self) {
    *self.gate.lock().unwrap() = None;
  }

  fn begin(&self, call: String) -> Result<(), ApiError> {
    self.calls.lock().unwrap().push(call.clone());
    if !self.reachable.load(Ordering::SeqCst) {
      return Err(ApiError::Transport("connection refused".into()));
    }
    if self.rejected.lock().unwrap().contains(&call) {
      return Err(ApiError::Application {
        status: 422,
        body: json!({"message": "validation failed"}),
      });
    }
    Ok(())
  }

  async fn wait_gate(&self) {
    let gate = self.gate.lock().unwrap().clone();
    if let Some((started, release)) = gate {
      started.notify_one();
      release.notified().await;
    }
  }
}

fn matches_id(row: &Value, id: &str) -> bool {
  match row.get("id") {
    Some(Value::Number(n)) => n.to_string() == id,
    Some(Value::String(s)) => s == id,
    _ => false,
  }
}

#[async_trait]
impl RestTransport for MockTransport {
  async fn get(&self, path: &str) -> Result<Value, ApiError> {
    self.begin(format!("GET {path}"))?;
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    let tables = self.tables.lock().unwrap();
    match parts.as_slice() {
      [entity] => Ok(json!({ "data": tables.get(*entity).cloned().unwrap_or_default() })),
      [entity, id] => tables
        .get(*entity)
        .and_then(|rows| rows.iter().find(|r| matches_id(r, id)).cloned())
        .map(|row| json!({ "data": row }))
        .ok_or(ApiError::Application {
          status: 404,
          body: json!({"message": "not found"}),
        }),
      _ => Err(ApiError::Application {
        status: 404,
        body: Value::Null,
      }),
    }
  }

  async fn create(&self, entity: &str, payload: &Payload) -> Result<Value, ApiError> {
    self.wait_gate().await;
    self.begin(format!("POST /{entity}"))?;
    let mut row = match payload.data() {
      Value::Object(map) => map,
      _ => Map::new(),
    };
    row.insert("id".into(), json!(self.next_id.fetch_add(1, Ordering::SeqCst)));
    if let Payload::Multipart { file, .. } = payload {
      row.insert(file.field.clone(), json!(format!("/uploads/{}", file.file_name)));
    }
    let row = Value::Object(row);
    self
      .tables
      .lock()
      .unwrap()
      .entry(entity.to_string())
      .or_default()
      .push(row.clone());
    Ok(json!({ "data": row }))
  }

  async fn update(&self, entity: &str, id: &str, payload: &Payload) -> Result<Value, ApiError> {
    self.wait_gate().await;
    self.begin(format!("PUT /{entity}/{id}"))?;
    let mut tables = self.tables.lock().unwrap();
    let row = tables
      .get_mut(entity)
      .and_then(|rows| rows.iter_mut().find(|r| matches_id(r, id)))
      .ok_or(ApiError::Application {
        status: 404,
        body: json!({"message": "not found"}),
      })?;
    if let (Value::Object(existing), Value::Object(changes)) = (row, payload.data()) {
      for (k, v) in changes {
        if k != "id" {
          existing.insert(k, v);
        }
      }
      return Ok(json!({ "data": existing.clone() }));
    }
    Ok(Value::Null)
  }

  async fn delete(&self, entity: &str, id: &str) -> Result<Value, ApiError> {
    self.wait_gate().await;
    self.begin(format!("DELETE /{entity}/{id}"))?;
    let mut tables = self.tables.lock().unwrap();
    if let Some(rows) = tables.get_mut(entity) {
      rows.retain(|r| !matches_id(r, id));
    }
    Ok(Value::Null)
  }
}
