//! Core types describing cached data and where it came from.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Indicates where a response's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, stale but the network fetch failed
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Write accepted locally and queued for replay
  Queued,
}

/// Age bracket of a cached entry under a [`CachePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  Fresh,
  Stale,
  Expired,
}

/// Reader-side freshness thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
  /// Entries older than this are refetched before being served
  pub stale_after: Duration,
  /// Entries older than this are only served when the refetch fails
  pub expire_after: Duration,
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self {
      stale_after: Duration::seconds(60),
      expire_after: Duration::seconds(3600),
    }
  }
}

impl CachePolicy {
  pub fn classify(&self, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
    let age = now - cached_at;
    if age > self.expire_after {
      Freshness::Expired
    } else if age > self.stale_after {
      Freshness::Stale
    } else {
      Freshness::Fresh
    }
  }
}
