//! Cache keys derived from endpoint paths.

/// Key under which an entity's list is cached.
pub fn list_key(entity: &str) -> String {
  format!("{}_list", sanitize(entity))
}

/// Map an endpoint path to its cache key.
///
/// A bare collection path (`/pokok`) shares its key with the optimistic list
/// for that entity, so offline writes show up in the next list read.
/// Anything else has its separators flattened: `/pokok/5?x=1` → `pokok_5_x_1`.
pub fn cache_key(path: &str) -> String {
  let trimmed = path.trim_matches('/');
  if !trimmed.is_empty() && !trimmed.contains(['/', '?', '#']) {
    return list_key(trimmed);
  }
  sanitize(trimmed)
}

fn sanitize(segment: &str) -> String {
  segment
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
        c
      } else {
        '_'
      }
    })
    .collect()
}
