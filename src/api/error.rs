use serde_json::Value;
use thiserror::Error;

use crate::queue::ActionType;

/// Failures surfaced by the transport and the offline client.
///
/// Only [`ApiError::Transport`] means "could not reach the server"; it is the
/// one variant that makes writes queue and reads fall back to the cache.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
  /// Connection refused, DNS failure, timeout and the like.
  #[error("transport error: {0}")]
  Transport(String),

  /// The server answered with a non-success status.
  #[error("server returned {status}: {body}")]
  Application { status: u16, body: Value },

  /// A success response whose body was not valid JSON.
  #[error("invalid response body: {0}")]
  Decode(String),

  /// Offline read with nothing cached to serve.
  #[error("no cached data for '{key}' while offline")]
  CacheMiss { key: String },

  #[error("invalid endpoint '{0}'")]
  InvalidUrl(String),

  /// An update or delete with no record to address.
  #[error("{action_type} on '{entity}' requires a record id")]
  MissingId {
    entity: String,
    action_type: ActionType,
  },
}

impl ApiError {
  pub fn is_transport(&self) -> bool {
    matches!(self, Self::Transport(_))
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Application { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      Self::Decode(e.to_string())
    } else if let Some(status) = e.status() {
      Self::Application {
        status: status.as_u16(),
        body: Value::Null,
      }
    } else if e.is_builder() {
      Self::InvalidUrl(e.to_string())
    } else {
      Self::Transport(e.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_only_transport_is_transport() {
    assert!(ApiError::Transport("refused".into()).is_transport());
    assert!(!ApiError::Application {
      status: 422,
      body: json!({"errors": {"varieti": ["required"]}})
    }
    .is_transport());
    assert!(!ApiError::CacheMiss { key: "k".into() }.is_transport());
    assert!(!ApiError::Decode("eof".into()).is_transport());
    assert!(!ApiError::MissingId {
      entity: "pokok".into(),
      action_type: ActionType::Delete,
    }
    .is_transport());
  }

  #[test]
  fn test_status() {
    let err = ApiError::Application {
      status: 403,
      body: Value::Null,
    };
    assert_eq!(err.status(), Some(403));
    assert_eq!(ApiError::Transport("x".into()).status(), None);
  }
}
