//! Network-aware client that wraps a [`RestTransport`] with caching and queueing.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{cache_key, list_key, CacheAccessor, CachePolicy, CacheSource, Freshness};
use crate::connectivity::ConnectivityMonitor;
use crate::optimistic::OptimisticMutator;
use crate::queue::{ActionType, Payload, QueuedAction, SyncQueue};

use super::error::ApiError;
use super::transport::RestTransport;
use super::types::{unwrap_envelope, ApiResponse};

/// REST client with transparent offline support.
///
/// Reads go to the server when it is reachable and fall back to the cache when
/// it is not. Writes that cannot reach the server are queued, applied to the
/// cached list, and reported as a queued success so data entry never blocks.
#[derive(Clone)]
pub struct OfflineClient {
  transport: Arc<dyn RestTransport>,
  connectivity: Arc<dyn ConnectivityMonitor>,
  cache: CacheAccessor,
  queue: Arc<SyncQueue>,
  mutator: Arc<OptimisticMutator>,
  policy: CachePolicy,
}

impl OfflineClient {
  pub fn new(
    transport: Arc<dyn RestTransport>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    cache: CacheAccessor,
    queue: Arc<SyncQueue>,
    mutator: Arc<OptimisticMutator>,
  ) -> Self {
    Self {
      transport,
      connectivity,
      cache,
      queue,
      mutator,
      policy: CachePolicy::default(),
    }
  }

  /// Set the freshness thresholds used by [`OfflineClient::fetch`].
  pub fn with_policy(mut self, policy: CachePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn queue(&self) -> &Arc<SyncQueue> {
    &self.queue
  }

  pub fn cache(&self) -> &CacheAccessor {
    &self.cache
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  pub async fn pending_count(&self) -> usize {
    self.queue.len().await
  }

  /// Network-first read.
  ///
  /// 1. If online, fetch and refresh the cache
  /// 2. If offline or the transport fails, serve the cached copy
  /// 3. Nothing cached while offline is a [`ApiError::CacheMiss`]
  pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
    let key = cache_key(path);

    if self.connectivity.is_online() {
      match self.fetch_and_cache(path, &key).await {
        Ok(data) => return Ok(ApiResponse::from_network(data)),
        Err(e) if e.is_transport() => {
          warn!(path, error = %e, "read failed at transport level, using cache");
        }
        Err(e) => return Err(e),
      }
    } else {
      debug!(path, "offline, reading from cache");
    }

    self.serve_cached(&key, CacheSource::Offline).await
  }

  /// Cache-first read honouring the freshness policy.
  ///
  /// Fresh entries are served without touching the network. Stale and expired
  /// entries are refetched; if that cannot complete the cached copy is still
  /// returned, flagged stale or offline respectively.
  pub async fn fetch(&self, path: &str) -> Result<ApiResponse, ApiError> {
    let key = cache_key(path);
    let Some(entry) = self.cache.get_entry(&key).await else {
      return self.get(path).await;
    };

    let freshness = self.policy.classify(entry.timestamp, self.cache.now());
    if freshness == Freshness::Fresh {
      return Ok(ApiResponse::from_entry(entry, CacheSource::CacheFresh));
    }

    let fallback = match freshness {
      Freshness::Expired => CacheSource::Offline,
      _ => CacheSource::CacheStale,
    };

    if !self.connectivity.is_online() {
      return Ok(ApiResponse::from_entry(entry, CacheSource::Offline));
    }

    match self.fetch_and_cache(path, &key).await {
      Ok(data) => Ok(ApiResponse::from_network(data)),
      Err(e) if e.is_transport() => {
        warn!(path, error = %e, ?freshness, "refetch failed, serving cached copy");
        Ok(ApiResponse::from_entry(entry, fallback))
      }
      Err(e) => Err(e),
    }
  }

  /// Create a record.
  pub async fn post(&self, entity: &str, payload: Payload) -> Result<ApiResponse, ApiError> {
    self.write(entity, ActionType::Create, None, payload).await
  }

  /// Update the record `id`.
  pub async fn put(&self, entity: &str, id: &str, payload: Payload) -> Result<ApiResponse, ApiError> {
    self.write(entity, ActionType::Update, Some(id), payload).await
  }

  /// Delete the record `id`.
  pub async fn delete(&self, entity: &str, id: &str) -> Result<ApiResponse, ApiError> {
    self
      .write(entity, ActionType::Delete, Some(id), Payload::Json(Value::Null))
      .await
  }

  /// Replace the cached list for `entity` with the server's copy.
  pub async fn refresh(&self, entity: &str) -> Result<Value, ApiError> {
    refresh_list(self.transport.as_ref(), &self.cache, entity).await
  }

  async fn write(
    &self,
    entity: &str,
    action_type: ActionType,
    id: Option<&str>,
    payload: Payload,
  ) -> Result<ApiResponse, ApiError> {
    let missing_id = || ApiError::MissingId {
      entity: entity.to_string(),
      action_type,
    };
    // Never queue something the replay could not address
    if action_type != ActionType::Create && id.is_none() {
      return Err(missing_id());
    }
    let payload = match id {
      Some(id) => payload.with_id(id),
      None => payload,
    };

    if self.connectivity.is_online() {
      let result = match (action_type, id) {
        (ActionType::Create, _) => self.transport.create(entity, &payload).await,
        (ActionType::Update, Some(id)) => self.transport.update(entity, id, &payload).await,
        (ActionType::Delete, Some(id)) => self.transport.delete(entity, id).await,
        (_, None) => return Err(missing_id()),
      };

      match result {
        Ok(body) => {
          // Server truth replaces whatever optimistic state the list had
          if let Err(e) = self.refresh(entity).await {
            warn!(entity, error = %e, "cache refresh after write failed");
          }
          return Ok(ApiResponse::from_network(unwrap_envelope(body)));
        }
        Err(e) if e.is_transport() => {
          warn!(entity, %action_type, error = %e, "write failed at transport level, queueing");
        }
        Err(e) => return Err(e),
      }
    }

    Ok(self.queue_write(entity, action_type, payload).await)
  }

  async fn queue_write(
    &self,
    entity: &str,
    action_type: ActionType,
    payload: Payload,
  ) -> ApiResponse {
    let data = payload.data();
    let action: QueuedAction = self.queue.enqueue(entity, action_type, payload).await;
    self.mutator.apply(entity, action_type, &data).await;
    ApiResponse::queued(&action)
  }

  async fn fetch_and_cache(&self, path: &str, key: &str) -> Result<Value, ApiError> {
    let body = self.transport.get(path).await?;
    let data = unwrap_envelope(body);
    self.cache.cache_data(key, &data).await;
    Ok(data)
  }

  async fn serve_cached(&self, key: &str, source: CacheSource) -> Result<ApiResponse, ApiError> {
    match self.cache.get_entry(key).await {
      Some(entry) => Ok(ApiResponse::from_entry(entry, source)),
      None => Err(ApiError::CacheMiss {
        key: key.to_string(),
      }),
    }
  }
}

/// Fetch `/{entity}` and store it as the entity's cached list.
pub(crate) async fn refresh_list(
  transport: &dyn RestTransport,
  cache: &CacheAccessor,
  entity: &str,
) -> Result<Value, ApiError> {
  let body = transport.get(&format!("/{entity}")).await?;
  let data = unwrap_envelope(body);
  cache.cache_data(&list_key(entity), &data).await;
  debug!(entity, "list cache refreshed");
  Ok(data)
}
