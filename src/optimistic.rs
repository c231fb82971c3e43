//! Local application of pending writes to cached entity lists.
//!
//! Records touched here carry `"unconfirmed": true`, and records created here
//! carry a `temp_<token>` id. Nothing in this module ever undoes that; the
//! next authoritative list fetch overwrites the cached list wholesale.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::{list_key, CacheAccessor};
use crate::clock::{Clock, IdGenerator};
use crate::queue::ActionType;

/// Marker set on cached records that the server has not confirmed yet.
pub const UNCONFIRMED_FIELD: &str = "unconfirmed";

/// Prefix of ids synthesized for records created offline.
pub const TEMP_ID_PREFIX: &str = "temp_";

pub struct OptimisticMutator {
  cache: CacheAccessor,
  ids: IdGenerator,
  list_lock: Mutex<()>,
}

impl OptimisticMutator {
  pub fn new(cache: CacheAccessor, clock: Arc<dyn Clock>) -> Self {
    Self {
      cache,
      ids: IdGenerator::new(clock),
      list_lock: Mutex::new(()),
    }
  }

  /// Apply a write to the cached `{entity}_list` and store the result.
  ///
  /// Returns the list as written.
  pub async fn apply(&self, entity: &str, action_type: ActionType, data: &Value) -> Vec<Value> {
    let _guard = self.list_lock.lock().await;
    let key = list_key(entity);

    let items = match self.cache.get_cached_data(&key).await {
      Some(Value::Array(items)) => items,
      _ => Vec::new(),
    };

    let updated = match action_type {
      ActionType::Create => self.create(items, data),
      ActionType::Update => update(items, data),
      ActionType::Delete => delete(items, data),
    };

    debug!(entity, %action_type, len = updated.len(), "optimistic update applied");
    self
      .cache
      .cache_data(&key, &Value::Array(updated.clone()))
      .await;
    updated
  }

  fn create(&self, mut items: Vec<Value>, data: &Value) -> Vec<Value> {
    let mut record = match data {
      Value::Object(map) => map.clone(),
      _ => Map::new(),
    };
    record.insert(
      "id".into(),
      Value::String(format!("{}{}", TEMP_ID_PREFIX, self.ids.next())),
    );
    record.insert(UNCONFIRMED_FIELD.into(), Value::Bool(true));
    items.push(Value::Object(record));
    items
  }
}

fn update(mut items: Vec<Value>, data: &Value) -> Vec<Value> {
  let (Some(id), Value::Object(changes)) = (data.get("id"), data) else {
    return items;
  };

  if let Some(Value::Object(existing)) = items
    .iter_mut()
    .find(|item| item.get("id").is_some_and(|v| same_id(v, id)))
  {
    for (field, value) in changes {
      // Keep the cached id form so later lookups still match it
      if field != "id" {
        existing.insert(field.clone(), value.clone());
      }
    }
    existing.insert(UNCONFIRMED_FIELD.into(), Value::Bool(true));
  }
  items
}

fn delete(mut items: Vec<Value>, data: &Value) -> Vec<Value> {
  let Some(id) = data.get("id") else {
    return items;
  };
  items.retain(|item| !item.get("id").is_some_and(|v| same_id(v, id)));
  items
}

/// Compare ids leniently: `2` and `"2"` refer to the same record.
fn same_id(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => x == y,
    (Value::String(x), Value::String(y)) => x == y,
    (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
      n.to_string() == *s
    }
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::SystemClock;
  use crate::store::PersistentStore;
  use serde_json::json;

  fn mutator() -> (OptimisticMutator, CacheAccessor) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = CacheAccessor::new(PersistentStore::in_memory(), clock.clone());
    (OptimisticMutator::new(cache.clone(), clock), cache)
  }

  fn is_temp_id(id: &Value) -> bool {
    id.as_str()
      .and_then(|s| s.strip_prefix(TEMP_ID_PREFIX))
      .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
  }

  #[tokio::test]
  async fn test_create_on_empty_cache() {
    let (mutator, cache) = mutator();
    mutator
      .apply("pokok", ActionType::Create, &json!({"varieti": "Musang King"}))
      .await;

    let list = cache.get_cached_data("pokok_list").await.unwrap();
    let items = list.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert!(is_temp_id(&items[0]["id"]));
    assert_eq!(items[0]["unconfirmed"], json!(true));
    assert_eq!(items[0]["varieti"], "Musang King");
  }

  #[tokio::test]
  async fn test_create_appends_and_ids_differ() {
    let (mutator, cache) = mutator();
    cache.cache_data("pokok_list", &json!([{"id": 1}])).await;

    mutator.apply("pokok", ActionType::Create, &json!({"varieti": "D24"})).await;
    let items = mutator
      .apply("pokok", ActionType::Create, &json!({"varieti": "D24"}))
      .await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0], json!({"id": 1}));
    assert_ne!(items[1]["id"], items[2]["id"]);
  }

  #[tokio::test]
  async fn test_update_merges_matching_item() {
    let (mutator, cache) = mutator();
    cache
      .cache_data(
        "pokok_list",
        &json!([{"id": 1, "varieti": "A"}, {"id": 2, "varieti": "B"}]),
      )
      .await;

    mutator
      .apply("pokok", ActionType::Update, &json!({"id": 2, "varieti": "C"}))
      .await;

    assert_eq!(
      cache.get_cached_data("pokok_list").await.unwrap(),
      json!([
        {"id": 1, "varieti": "A"},
        {"id": 2, "varieti": "C", "unconfirmed": true}
      ])
    );
  }

  #[tokio::test]
  async fn test_update_matches_string_route_id() {
    let (mutator, cache) = mutator();
    cache
      .cache_data("pokok_list", &json!([{"id": 5, "umur": 3}]))
      .await;

    let items = mutator
      .apply("pokok", ActionType::Update, &json!({"id": "5", "umur": 4}))
      .await;
    assert_eq!(items, vec![json!({"id": 5, "umur": 4, "unconfirmed": true})]);
  }

  #[tokio::test]
  async fn test_update_without_match_is_noop() {
    let (mutator, cache) = mutator();
    let original = json!([{"id": 1, "varieti": "A"}]);
    cache.cache_data("pokok_list", &original).await;

    mutator
      .apply("pokok", ActionType::Update, &json!({"id": 99, "varieti": "Z"}))
      .await;
    assert_eq!(cache.get_cached_data("pokok_list").await.unwrap(), original);
  }

  #[tokio::test]
  async fn test_delete_removes_only_match() {
    let (mutator, cache) = mutator();
    cache
      .cache_data(
        "pokok_list",
        &json!([{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}]),
      )
      .await;

    mutator.apply("pokok", ActionType::Delete, &json!({"id": 2})).await;

    assert_eq!(
      cache.get_cached_data("pokok_list").await.unwrap(),
      json!([{"id": 1}, {"id": 3}, {"id": 4}])
    );
  }

  #[tokio::test]
  async fn test_delete_of_temp_record() {
    let (mutator, _) = mutator();
    let items = mutator
      .apply("racun", ActionType::Create, &json!({"jenis": "kulat"}))
      .await;
    let temp_id = items[0]["id"].clone();

    let items = mutator
      .apply("racun", ActionType::Delete, &json!({ "id": temp_id }))
      .await;
    assert!(items.is_empty());
  }

  #[tokio::test]
  async fn test_non_list_cache_is_replaced() {
    let (mutator, cache) = mutator();
    cache.cache_data("pokok_list", &json!({"unexpected": true})).await;

    let items = mutator
      .apply("pokok", ActionType::Create, &json!({"varieti": "Black Thorn"}))
      .await;
    assert_eq!(items.len(), 1);
  }
}
