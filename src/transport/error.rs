//! Transport error taxonomy.

use thiserror::Error;

/// Errors a single API call can fail with.
///
/// The type is `Clone` so one failed fetch can be handed to every subscriber
/// of a cache entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  /// No response was received (connection refused, timeout, broken stream).
  #[error("Network error: {0}")]
  Network(String),

  /// The credential was missing, or the server rejected it (401/403).
  #[error("Authentication failed: {message}")]
  Auth {
    status: Option<u16>,
    message: String,
  },

  /// The server responded with a non-success status.
  #[error("HTTP {status}: {body}")]
  Http { status: u16, body: String },

  /// The response body could not be parsed into the expected shape.
  #[error("Failed to decode response: {0}")]
  Decode(String),

  /// The request could not be built (invalid URL, header or body shape).
  #[error("Invalid request: {0}")]
  Request(String),
}

impl TransportError {
  /// Credential required but none is configured.
  pub fn missing_credential() -> Self {
    TransportError::Auth {
      status: None,
      message: "no API token configured".to_string(),
    }
  }

  /// Classify a non-success HTTP status.
  pub fn from_status(status: u16, body: String) -> Self {
    match status {
      401 | 403 => TransportError::Auth {
        status: Some(status),
        message: if body.is_empty() {
          format!("server rejected credential with status {}", status)
        } else {
          body
        },
      },
      _ => TransportError::Http { status, body },
    }
  }

  /// HTTP status attached to this error, if the server responded at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      TransportError::Http { status, .. } => Some(*status),
      TransportError::Auth { status, .. } => *status,
      _ => None,
    }
  }
}

impl From<serde_json::Error> for TransportError {
  fn from(e: serde_json::Error) -> Self {
    TransportError::Decode(e.to_string())
  }
}

impl From<reqwest::Error> for TransportError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_builder() {
      TransportError::Request(e.to_string())
    } else if e.is_decode() {
      TransportError::Decode(e.to_string())
    } else {
      TransportError::Network(e.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_auth_statuses_classified_as_auth() {
    let err = TransportError::from_status(401, String::new());
    assert!(matches!(err, TransportError::Auth { status: Some(401), .. }));
    assert_eq!(err.status(), Some(401));

    let err = TransportError::from_status(403, "forbidden".into());
    assert_eq!(
      err,
      TransportError::Auth {
        status: Some(403),
        message: "forbidden".into()
      }
    );
  }

  #[test]
  fn test_other_statuses_classified_as_http() {
    let err = TransportError::from_status(500, "boom".into());
    assert_eq!(
      err,
      TransportError::Http {
        status: 500,
        body: "boom".into()
      }
    );
    assert_eq!(err.status(), Some(500));
  }

  #[test]
  fn test_missing_credential_has_no_status() {
    assert_eq!(TransportError::missing_credential().status(), None);
    assert_eq!(TransportError::Network("refused".into()).status(), None);
  }
}
