//! In-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::transport::{ApiRequest, Method, Transport, TransportError};

type Route = (Method, String);

#[derive(Default)]
struct MockState {
  once: HashMap<Route, VecDeque<Result<Value, TransportError>>>,
  always: HashMap<Route, Result<Value, TransportError>>,
  requests: Vec<ApiRequest>,
}

/// Records every request and answers from canned responses.
///
/// Unrouted requests fail with a 404.
#[derive(Clone, Default)]
pub struct MockTransport {
  state: Arc<Mutex<MockState>>,
  delay: Duration,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every response; use with paused Tokio time.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn respond(&self, method: Method, path: &str, result: Result<Value, TransportError>) {
    let mut state = self.state.lock().unwrap();
    state.always.insert((method, path.to_string()), result);
  }

  /// Answer the next matching request only; takes priority over `respond`.
  pub fn respond_once(&self, method: Method, path: &str, result: Result<Value, TransportError>) {
    let mut state = self.state.lock().unwrap();
    state
      .once
      .entry((method, path.to_string()))
      .or_default()
      .push_back(result);
  }

  pub fn requests(&self) -> Vec<ApiRequest> {
    self.state.lock().unwrap().requests.clone()
  }

  pub fn count(&self, method: Method, path: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .requests
      .iter()
      .filter(|r| r.method == method && r.path == path)
      .count()
  }
}

impl Transport for MockTransport {
  async fn send(&self, request: ApiRequest) -> Result<Value, TransportError> {
    let result = {
      let mut state = self.state.lock().unwrap();
      let route = (request.method, request.path.clone());
      state.requests.push(request);
      let queued = state.once.get_mut(&route).and_then(VecDeque::pop_front);
      queued
        .or_else(|| state.always.get(&route).cloned())
        .unwrap_or_else(|| {
          Err(TransportError::Http {
            status: 404,
            body: format!("no route for {} {}", route.0, route.1),
          })
        })
    };

    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    result
  }
}
