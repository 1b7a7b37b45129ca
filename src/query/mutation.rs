//! Writes against the API followed by cache invalidation.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::client::QueryClient;
use super::key::ResourceKey;
use crate::transport::{ApiRequest, ContentType, FilePart, Method, Transport, TransportError};

/// Everything needed to perform one write and refresh what it touched.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationDescriptor {
  /// Path relative to the API base URL
  pub url: String,
  pub method: Method,
  pub content_type: ContentType,
  pub body: Option<Value>,
  pub files: Vec<FilePart>,
  /// Attach the bearer credential (default true)
  pub auth: bool,
  pub additional_headers: BTreeMap<String, String>,
  /// Key prefixes invalidated after a successful write
  pub invalidates: Vec<ResourceKey>,
}

impl MutationDescriptor {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method,
      content_type: ContentType::Json,
      body: None,
      files: Vec::new(),
      auth: true,
      additional_headers: BTreeMap::new(),
      invalidates: Vec::new(),
    }
  }

  pub fn post(url: impl Into<String>) -> Self {
    Self::new(Method::Post, url)
  }

  pub fn put(url: impl Into<String>) -> Self {
    Self::new(Method::Put, url)
  }

  pub fn patch(url: impl Into<String>) -> Self {
    Self::new(Method::Patch, url)
  }

  pub fn delete(url: impl Into<String>) -> Self {
    Self::new(Method::Delete, url).no_body()
  }

  pub fn json(mut self, body: Value) -> Self {
    self.content_type = ContentType::Json;
    self.body = Some(body);
    self
  }

  /// Send `fields` (a JSON object) as multipart form fields.
  pub fn multipart(mut self, fields: Value) -> Self {
    self.content_type = ContentType::Multipart;
    self.body = Some(fields);
    self
  }

  pub fn file(mut self, file: FilePart) -> Self {
    self.content_type = ContentType::Multipart;
    self.files.push(file);
    self
  }

  pub fn no_body(mut self) -> Self {
    self.content_type = ContentType::None;
    self.body = None;
    self.files.clear();
    self
  }

  pub fn auth(mut self, auth: bool) -> Self {
    self.auth = auth;
    self
  }

  pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.additional_headers.insert(key.into(), value.into());
    self
  }

  pub fn invalidates(mut self, key: ResourceKey) -> Self {
    if !self.invalidates.contains(&key) {
      self.invalidates.push(key);
    }
    self
  }

  pub fn to_request(&self) -> ApiRequest {
    ApiRequest {
      method: self.method,
      path: self.url.clone(),
      body: self.body.clone(),
      files: self.files.clone(),
      content_type: self.content_type,
      headers: self.additional_headers.clone(),
      auth: self.auth,
    }
  }
}

/// Runs mutations through a transport and invalidates the cache on success.
///
/// Mutations are never deduplicated: two identical calls send two requests.
#[derive(Clone)]
pub struct MutationExecutor<T: Transport> {
  transport: T,
  cache: QueryClient,
}

impl<T: Transport> MutationExecutor<T> {
  pub fn new(transport: T, cache: QueryClient) -> Self {
    Self { transport, cache }
  }

  pub fn cache(&self) -> &QueryClient {
    &self.cache
  }

  /// Perform the write once. On success every key in `invalidates` is
  /// invalidated before the response is returned; on failure the cache is
  /// left untouched.
  pub async fn run(&self, descriptor: &MutationDescriptor) -> Result<Value, TransportError> {
    if descriptor.method == Method::Get {
      return Err(TransportError::Request(format!(
        "mutation {} must not use GET",
        descriptor.url
      )));
    }

    info!(method = %descriptor.method, url = %descriptor.url, "Running mutation");
    let response = match self.transport.send(descriptor.to_request()).await {
      Ok(response) => response,
      Err(error) => {
        warn!(method = %descriptor.method, url = %descriptor.url, %error, "Mutation failed");
        return Err(error);
      }
    };

    for key in &descriptor.invalidates {
      let count = self.cache.invalidate_prefix(key);
      debug!(key = %key, count, "Invalidated after mutation");
    }
    Ok(response)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::key;
  use crate::query::CacheConfig;
  use crate::testing::MockTransport;
  use serde_json::json;
  use std::time::Duration;

  fn setup() -> (MockTransport, QueryClient, MutationExecutor<MockTransport>) {
    let transport = MockTransport::new().with_delay(Duration::from_millis(20));
    let cache = QueryClient::new(CacheConfig::default());
    let executor = MutationExecutor::new(transport.clone(), cache.clone());
    (transport, cache, executor)
  }

  fn watch_projects(transport: &MockTransport, cache: &QueryClient) -> crate::query::Subscription {
    let transport = transport.clone();
    cache
      .subscribe("projects", move || {
        let transport = transport.clone();
        async move { transport.send(ApiRequest::get("/projects")).await }
      })
      .unwrap()
  }

  #[test]
  fn test_descriptor_builders() {
    let descriptor = MutationDescriptor::post("/projects")
      .json(json!({"name": "Apollo"}))
      .header("X-Trace", "1")
      .invalidates(key!["projects"].unwrap())
      .invalidates(key!["projects"].unwrap());
    assert_eq!(descriptor.invalidates.len(), 1);

    let request = descriptor.to_request();
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.path, "/projects");
    assert_eq!(request.content_type, ContentType::Json);
    assert_eq!(request.headers.get("X-Trace").map(String::as_str), Some("1"));
    assert!(request.auth);

    let upload = MutationDescriptor::post("/upload")
      .file(FilePart::new("file", "a.txt", b"hi".to_vec()))
      .auth(false);
    assert_eq!(upload.content_type, ContentType::Multipart);
    assert!(!upload.to_request().auth);

    let delete = MutationDescriptor::delete("/projects/1");
    assert_eq!(delete.content_type, ContentType::None);
    assert!(delete.body.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_success_invalidates_and_refetches_subscribers() {
    let (transport, cache, executor) = setup();
    transport.respond(Method::Get, "/projects", Ok(json!([])));
    transport.respond(Method::Post, "/projects", Ok(json!({"id": 1})));

    let mut projects = watch_projects(&transport, &cache);
    projects.settled().await;
    transport.respond(Method::Get, "/projects", Ok(json!([{"id": 1}])));

    let descriptor = MutationDescriptor::post("/projects")
      .json(json!({"name": "Apollo"}))
      .invalidates(key!["projects"].unwrap());
    let response = executor.run(&descriptor).await.unwrap();
    assert_eq!(response, json!({"id": 1}));

    // Invalidation happened before `run` returned.
    assert!(projects.current().is_fetching);
    let refreshed = projects.settled().await;
    assert_eq!(refreshed.data.as_deref(), Some(&json!([{"id": 1}])));
    assert_eq!(transport.count(Method::Get, "/projects"), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_leaves_cache_untouched() {
    let (transport, cache, executor) = setup();
    transport.respond(Method::Get, "/projects", Ok(json!([])));
    transport.respond(
      Method::Post,
      "/projects",
      Err(TransportError::Http {
        status: 422,
        body: "invalid".to_string(),
      }),
    );

    let mut projects = watch_projects(&transport, &cache);
    projects.settled().await;

    let descriptor = MutationDescriptor::post("/projects")
      .json(json!({}))
      .invalidates(key!["projects"].unwrap());
    let err = executor.run(&descriptor).await.unwrap_err();
    assert_eq!(err.status(), Some(422));
    assert!(!projects.current().is_fetching);
    assert_eq!(transport.count(Method::Get, "/projects"), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_mutations_are_not_deduplicated() {
    let (transport, _cache, executor) = setup();
    transport.respond(Method::Post, "/projects", Ok(json!({"ok": true})));

    let descriptor = MutationDescriptor::post("/projects").json(json!({"name": "x"}));
    let (a, b) = tokio::join!(executor.run(&descriptor), executor.run(&descriptor));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.count(Method::Post, "/projects"), 2);
  }

  #[tokio::test]
  async fn test_get_is_rejected_without_sending() {
    let (transport, _cache, executor) = setup();
    let descriptor = MutationDescriptor::new(Method::Get, "/projects");
    let err = executor.run(&descriptor).await.unwrap_err();
    assert!(matches!(err, TransportError::Request(_)));
    assert!(transport.requests().is_empty());
  }
}
