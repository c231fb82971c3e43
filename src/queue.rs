//! Durable FIFO of writes waiting to be replayed against the server.
//!
//! The whole queue lives under a single key in the `queue` namespace and every
//! operation rewrites it. An action leaves the queue only through [`SyncQueue::remove`],
//! which the sync manager calls after the server has accepted the replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::{Clock, IdGenerator};
use crate::store::{Namespace, PersistentStore, StorageError};

/// Storage key of the pending action list.
pub const QUEUE_KEY: &str = "pending_actions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
  Create,
  Update,
  Delete,
}

impl std::fmt::Display for ActionType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Create => "CREATE",
      Self::Update => "UPDATE",
      Self::Delete => "DELETE",
    };
    f.write_str(name)
  }
}

/// A binary file attached to a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePart {
  /// Form field the file is sent under (e.g. "gambar")
  pub field: String,
  pub file_name: String,
  pub mime_type: Option<String>,
  #[serde(with = "base64_bytes")]
  pub bytes: Vec<u8>,
}

/// Body of a write, fixed when the write is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
  Json(Value),
  Multipart {
    fields: Map<String, Value>,
    #[serde(rename = "fileField")]
    file: FilePart,
  },
}

impl Payload {
  /// The JSON view of this payload: the body itself, or the plain form fields.
  pub fn data(&self) -> Value {
    match self {
      Self::Json(value) => value.clone(),
      Self::Multipart { fields, .. } => Value::Object(fields.clone()),
    }
  }

  /// The record id carried in the payload, rendered for use in a URL.
  pub fn record_id(&self) -> Option<String> {
    let id = match self {
      Self::Json(value) => value.get("id")?,
      Self::Multipart { fields, .. } => fields.get("id")?,
    };
    match id {
      Value::String(s) if !s.is_empty() => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    }
  }

  /// Return the payload with `id` set, for writes addressed by id. The given
  /// id replaces any `id` already in the body.
  pub fn with_id(self, id: &str) -> Self {
    let id_value = id
      .parse::<i64>()
      .map(Value::from)
      .unwrap_or_else(|_| Value::String(id.to_string()));

    match self {
      Self::Json(Value::Object(mut map)) => {
        map.insert("id".into(), id_value);
        Self::Json(Value::Object(map))
      }
      Self::Json(Value::Null) => {
        let mut map = Map::new();
        map.insert("id".into(), id_value);
        Self::Json(Value::Object(map))
      }
      Self::Json(other) => Self::Json(other),
      Self::Multipart { mut fields, file } => {
        fields.insert("id".into(), id_value);
        Self::Multipart { fields, file }
      }
    }
  }

  pub fn is_multipart(&self) -> bool {
    matches!(self, Self::Multipart { .. })
  }
}

/// A durably stored pending write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
  pub queue_id: String,
  pub entity: String,
  #[serde(rename = "type")]
  pub action_type: ActionType,
  #[serde(rename = "data")]
  pub payload: Payload,
  pub timestamp: DateTime<Utc>,
}

/// Persistent FIFO of [`QueuedAction`]s.
pub struct SyncQueue {
  store: PersistentStore,
  clock: Arc<dyn Clock>,
  ids: IdGenerator,
  /// Serialises read-modify-write cycles within this process
  write_lock: Mutex<()>,
}

impl SyncQueue {
  pub fn new(store: PersistentStore, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      ids: IdGenerator::new(clock.clone()),
      clock,
      write_lock: Mutex::new(()),
    }
  }

  /// Append a new action and persist the queue.
  ///
  /// If the stored queue cannot be read, the new action is logged and
  /// dropped; rewriting the key from an empty list would lose every action
  /// already pending.
  pub async fn enqueue(
    &self,
    entity: &str,
    action_type: ActionType,
    payload: Payload,
  ) -> QueuedAction {
    let _guard = self.write_lock.lock().await;
    let loaded = self.read().await;

    // Ids persisted by an earlier run stay below anything handed out now
    if let Ok(actions) = &loaded {
      if let Some(max) = actions.iter().filter_map(|a| a.queue_id.parse::<u64>().ok()).max() {
        self.ids.observe(max);
      }
    }

    let action = QueuedAction {
      queue_id: self.ids.next().to_string(),
      entity: entity.to_string(),
      action_type,
      payload,
      timestamp: self.clock.now(),
    };

    let mut actions = match loaded {
      Ok(actions) => actions,
      Err(e) => {
        warn!(queue_id = %action.queue_id, entity, error = %e, "sync queue unreadable, action not persisted");
        return action;
      }
    };
    actions.push(action.clone());

    if self.save(&actions).await {
      debug!(queue_id = %action.queue_id, entity, %action_type, "action queued");
    } else {
      warn!(queue_id = %action.queue_id, entity, "queued action could not be persisted");
    }
    action
  }

  /// Snapshot of the queue in insertion order.
  pub async fn peek_all(&self) -> Vec<QueuedAction> {
    self.load().await
  }

  /// Remove the action with `queue_id`. Returns whether it was present.
  pub async fn remove(&self, queue_id: &str) -> bool {
    let _guard = self.write_lock.lock().await;
    let mut actions = match self.read().await {
      Ok(actions) => actions,
      Err(e) => {
        warn!(queue_id, error = %e, "sync queue unreadable, action left in place");
        return false;
      }
    };
    let before = actions.len();
    actions.retain(|a| a.queue_id != queue_id);

    if actions.len() == before {
      return false;
    }
    self.save(&actions).await;
    true
  }

  pub async fn clear(&self) {
    let _guard = self.write_lock.lock().await;
    self.save(&[]).await;
  }

  pub async fn len(&self) -> usize {
    self.load().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  async fn load(&self) -> Vec<QueuedAction> {
    self.read().await.unwrap_or_else(|e| {
      warn!(error = %e, "sync queue read failed, treating as empty");
      Vec::new()
    })
  }

  /// The stored queue. Unparseable content reads as empty; a store fault is
  /// an error so writers can leave the key alone.
  async fn read(&self) -> Result<Vec<QueuedAction>, StorageError> {
    let Some(text) = self.store.try_get(Namespace::Queue, QUEUE_KEY).await? else {
      return Ok(Vec::new());
    };
    Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
      warn!(error = %e, "unreadable sync queue, treating as empty");
      Vec::new()
    }))
  }

  async fn save(&self, actions: &[QueuedAction]) -> bool {
    match serde_json::to_string(actions) {
      Ok(text) => self.store.set(Namespace::Queue, QUEUE_KEY, &text).await,
      Err(e) => {
        warn!(error = %e, "failed to serialize sync queue");
        false
      }
    }
  }
}

impl std::fmt::Debug for SyncQueue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SyncQueue").field("ids", &self.ids).finish_non_exhaustive()
  }
}

mod base64_bytes {
  use base64::{engine::general_purpose::STANDARD, Engine as _};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
  }
}
