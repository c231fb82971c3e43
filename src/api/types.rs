use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheEntry, CacheSource};
use crate::queue::QueuedAction;

/// What the offline client hands back for a read or write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
  /// Response body, with any `{ "data": ... }` envelope removed
  pub data: Value,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Set when a write was queued instead of sent
  pub queue_id: Option<String>,
}

impl ApiResponse {
  /// Create a response from live server data.
  pub fn from_network(data: Value) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
      queue_id: None,
    }
  }

  /// Create a response from a cache entry.
  pub fn from_entry(entry: CacheEntry, source: CacheSource) -> Self {
    Self {
      data: entry.data,
      source,
      cached_at: Some(entry.timestamp),
      queue_id: None,
    }
  }

  /// Synthetic success for a write accepted into the queue.
  pub fn queued(action: &QueuedAction) -> Self {
    Self {
      data: action.payload.data(),
      source: CacheSource::Queued,
      cached_at: None,
      queue_id: Some(action.queue_id.clone()),
    }
  }

  pub fn from_cache(&self) -> bool {
    matches!(
      self.source,
      CacheSource::CacheFresh | CacheSource::CacheStale | CacheSource::Offline
    )
  }

  /// True when the server was not reached for this call.
  pub fn offline(&self) -> bool {
    matches!(self.source, CacheSource::Offline | CacheSource::Queued)
  }

  pub fn queued_write(&self) -> bool {
    self.source == CacheSource::Queued
  }
}

/// Strip the `{ "data": ... }` envelope the server wraps responses in.
pub fn unwrap_envelope(body: Value) -> Value {
  match body {
    Value::Object(mut map) if map.contains_key("data") => {
      map.remove("data").unwrap_or(Value::Null)
    }
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_unwrap_envelope() {
    assert_eq!(
      unwrap_envelope(json!({"data": [{"id": 1}], "meta": {"total": 1}})),
      json!([{"id": 1}])
    );
    assert_eq!(unwrap_envelope(json!([1, 2])), json!([1, 2]));
    assert_eq!(unwrap_envelope(json!({"id": 3})), json!({"id": 3}));
  }

  #[test]
  fn test_flags() {
    let live = ApiResponse::from_network(json!([]));
    assert!(!live.from_cache());
    assert!(!live.offline());

    let entry = CacheEntry {
      key: "pokok_list".into(),
      data: json!([]),
      timestamp: Utc::now(),
    };
    let offline = ApiResponse::from_entry(entry.clone(), CacheSource::Offline);
    assert!(offline.from_cache());
    assert!(offline.offline());

    let fresh = ApiResponse::from_entry(entry, CacheSource::CacheFresh);
    assert!(fresh.from_cache());
    assert!(!fresh.offline());
  }
}
