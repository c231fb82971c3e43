//! Local cache of server responses.
//!
//! This module provides:
//! - Timestamped get/set of JSON values in the `cache` namespace
//! - Stable cache keys derived from endpoint paths
//! - Freshness classification so readers can decide when to refetch
//!
//! Expiry is never enforced on write or read here; the API facade decides what
//! to do with stale entries.

mod accessor;
mod keys;
mod traits;

pub use accessor::{CacheAccessor, CacheEntry};
pub use keys::{cache_key, list_key};
pub use traits::{CachePolicy, CacheSource, Freshness};
