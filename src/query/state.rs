//! What subscribers see of a cache entry.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::transport::TransportError;

/// Coarse status of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Nothing fetched and nothing in flight
  Idle,
  /// First fetch in flight, no data yet
  Loading,
  /// Data available (possibly being revalidated)
  Success,
  /// Last fetch failed
  Error,
}

impl QueryStatus {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryStatus::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryStatus::Success)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryStatus::Error)
  }
}

/// Snapshot of a cache entry as delivered to subscribers.
///
/// Snapshots are immutable; the payload is shared behind an `Arc` and replaced
/// wholesale on every successful fetch. Subscribers never see a request
/// future, only its outcome.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
  pub data: Option<Arc<Value>>,
  /// A fetch is in flight and there is no data to show yet
  pub is_loading: bool,
  /// A fetch is in flight (initial load or background revalidation)
  pub is_fetching: bool,
  pub is_error: bool,
  /// Error from the last fetch. Previous data stays in `data`.
  pub error: Option<TransportError>,
  /// Wall-clock time of the last successful fetch
  pub updated_at: Option<DateTime<Utc>>,
}

impl QueryResult {
  pub fn status(&self) -> QueryStatus {
    if self.is_error {
      QueryStatus::Error
    } else if self.data.is_some() {
      QueryStatus::Success
    } else if self.is_loading {
      QueryStatus::Loading
    } else {
      QueryStatus::Idle
    }
  }

  pub fn data(&self) -> Option<&Value> {
    self.data.as_deref()
  }

  /// Decode the payload into a typed value.
  ///
  /// Returns `Ok(None)` when there is no data yet.
  pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, TransportError> {
    match self.data() {
      Some(value) => Ok(Some(T::deserialize(value)?)),
      None => Ok(None),
    }
  }
}
