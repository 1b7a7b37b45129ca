//! Cached API client: typed reads through the query cache, writes through
//! the mutation executor.

use std::collections::BTreeMap;
use std::sync::Arc;

use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::{Config, MutationConfig};
use crate::query::{
  KeyError, MutationDescriptor, MutationExecutor, QueryClient, QueryError, QueryKey, Subscription,
};
use crate::transport::{ApiRequest, FilePart, HttpTransport, Transport, TransportError};

use super::keys::ApiQueryKey;
use super::mutations;
use super::types::{
  Client, DashboardSummary, Employee, FileEntry, NewEmployee, NewProject, NewTask, Notification,
  Project, ProjectUpdate, Task, TaskUpdate,
};

/// API client with transparent caching.
///
/// Reads are deduplicated and served from cache while fresh; successful
/// writes invalidate the resources they touch so live subscriptions refetch.
#[derive(Clone)]
pub struct CachedApiClient<T: Transport = HttpTransport> {
  transport: T,
  mutations: MutationExecutor<T>,
  overrides: BTreeMap<String, MutationConfig>,
}

impl CachedApiClient<HttpTransport> {
  /// Create a client for the configured API.
  pub fn new(config: &Config) -> Result<Self> {
    let transport = HttpTransport::new(config)?;
    let cache = QueryClient::new(config.cache_config());
    Ok(Self::with_transport(transport, cache).with_overrides(config.mutations.clone()))
  }
}

impl<T: Transport> CachedApiClient<T> {
  pub fn with_transport(transport: T, cache: QueryClient) -> Self {
    Self {
      mutations: MutationExecutor::new(transport.clone(), cache),
      transport,
      overrides: BTreeMap::new(),
    }
  }

  /// Mutation entries from config: overrides for built-ins, or new mutations.
  pub fn with_overrides(mut self, overrides: BTreeMap<String, MutationConfig>) -> Self {
    self.overrides = overrides;
    self
  }

  pub fn cache(&self) -> &QueryClient {
    self.mutations.cache()
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  fn fetcher(
    &self,
    key: &ApiQueryKey,
  ) -> impl Fn() -> BoxFuture<'static, Result<Value, TransportError>> + Send + Sync + 'static {
    let transport = self.transport.clone();
    let path = key.path();
    move || {
      let transport = transport.clone();
      let request = ApiRequest::get(path.clone());
      async move { transport.send(request).await }.boxed()
    }
  }

  /// Live subscription to a resource.
  pub fn watch(&self, key: &ApiQueryKey) -> Result<Subscription, KeyError> {
    debug!(resource = %key.description(), "Watching");
    self.cache().subscribe(key.resource_key()?, self.fetcher(key))
  }

  /// One-shot read through the cache.
  pub async fn fetch(&self, key: &ApiQueryKey) -> Result<Arc<Value>, QueryError> {
    self
      .cache()
      .fetch_query(key.resource_key()?, self.fetcher(key))
      .await
  }

  async fn fetch_as<R: DeserializeOwned>(&self, key: ApiQueryKey) -> Result<R, QueryError> {
    let value = self.fetch(&key).await?;
    R::deserialize(&*value).map_err(|e| QueryError::Transport(e.into()))
  }

  pub async fn projects(&self) -> Result<Vec<Project>, QueryError> {
    self.fetch_as(ApiQueryKey::Projects).await
  }

  pub async fn project(&self, id: &str) -> Result<Project, QueryError> {
    self
      .fetch_as(ApiQueryKey::ProjectView { id: id.to_string() })
      .await
  }

  pub async fn project_tasks(&self, project_id: &str) -> Result<Vec<Task>, QueryError> {
    self
      .fetch_as(ApiQueryKey::ProjectTasks {
        project_id: project_id.to_string(),
      })
      .await
  }

  pub async fn project_files(&self, project_id: &str) -> Result<Vec<FileEntry>, QueryError> {
    self
      .fetch_as(ApiQueryKey::ProjectFiles {
        project_id: project_id.to_string(),
      })
      .await
  }

  pub async fn employees(&self) -> Result<Vec<Employee>, QueryError> {
    self.fetch_as(ApiQueryKey::Employees).await
  }

  pub async fn clients(&self) -> Result<Vec<Client>, QueryError> {
    self.fetch_as(ApiQueryKey::Clients).await
  }

  pub async fn notifications(&self) -> Result<Vec<Notification>, QueryError> {
    self.fetch_as(ApiQueryKey::Notifications).await
  }

  pub async fn dashboard(&self) -> Result<DashboardSummary, QueryError> {
    self.fetch_as(ApiQueryKey::Dashboard).await
  }

  // ==========================================================================
  // Mutations (not cached - write operations)
  // ==========================================================================

  /// Run a built-in mutation, with any config override for `name` applied.
  async fn run_builtin(
    &self,
    name: &str,
    descriptor: Result<MutationDescriptor, KeyError>,
  ) -> Result<Value, TransportError> {
    let descriptor = descriptor.map_err(|e| TransportError::Request(e.to_string()))?;
    let descriptor = match self.overrides.get(name) {
      Some(entry) => entry.apply(descriptor),
      None => descriptor,
    };
    self.mutations.run(&descriptor).await
  }

  pub async fn create_project(&self, project: &NewProject) -> Result<Value, TransportError> {
    let body = to_body(project)?;
    self
      .run_builtin("create_project", mutations::create_project(body))
      .await
  }

  pub async fn update_project(
    &self,
    id: &str,
    update: &ProjectUpdate,
  ) -> Result<Value, TransportError> {
    let body = to_body(update)?;
    self
      .run_builtin("update_project", mutations::update_project(id, body))
      .await
  }

  pub async fn delete_project(&self, id: &str) -> Result<Value, TransportError> {
    self
      .run_builtin("delete_project", mutations::delete_project(id))
      .await
  }

  pub async fn create_task(&self, task: &NewTask) -> Result<Value, TransportError> {
    let body = to_body(task)?;
    self
      .run_builtin("create_task", mutations::create_task(&task.project_id, body))
      .await
  }

  pub async fn update_task(
    &self,
    project_id: &str,
    task_id: &str,
    update: &TaskUpdate,
  ) -> Result<Value, TransportError> {
    let body = to_body(update)?;
    self
      .run_builtin(
        "update_task",
        mutations::update_task(project_id, task_id, body),
      )
      .await
  }

  pub async fn create_employee(&self, employee: &NewEmployee) -> Result<Value, TransportError> {
    let body = to_body(employee)?;
    self
      .run_builtin("create_employee", mutations::create_employee(body))
      .await
  }

  pub async fn upload_file(
    &self,
    project_id: &str,
    file: FilePart,
  ) -> Result<Value, TransportError> {
    self
      .run_builtin("upload_file", mutations::upload_file(project_id, file))
      .await
  }

  pub async fn mark_notification_read(&self, id: &str) -> Result<Value, TransportError> {
    self
      .run_builtin(
        "mark_notification_read",
        mutations::mark_notification_read(id),
      )
      .await
  }

  /// Run a mutation by name.
  ///
  /// Complete config entries run as declared; otherwise the built-in of that
  /// name is used, with any partial config entry applied on top.
  pub async fn run_named(
    &self,
    name: &str,
    body: Option<Value>,
    files: Vec<FilePart>,
  ) -> Result<Value, TransportError> {
    let entry = self.overrides.get(name);

    let descriptor = match entry.and_then(|e| e.to_descriptor(name).ok()) {
      Some(declared) => with_payload(declared, body, files),
      None => match mutations::builtin(name, body, files) {
        Some(builtin) => {
          let builtin = builtin?;
          match entry {
            Some(entry) => entry.apply(builtin),
            None => builtin,
          }
        }
        None => {
          return Err(TransportError::Request(format!(
            "Unknown mutation: {}",
            name
          )))
        }
      },
    };

    self.mutations.run(&descriptor).await
  }
}

fn to_body(payload: &impl serde::Serialize) -> Result<Value, TransportError> {
  serde_json::to_value(payload).map_err(|e| TransportError::Request(e.to_string()))
}

/// Attach a caller-supplied body and files to a declared mutation, keeping
/// its configured content type.
fn with_payload(
  mut descriptor: MutationDescriptor,
  body: Option<Value>,
  files: Vec<FilePart>,
) -> MutationDescriptor {
  descriptor.body = body;
  descriptor.files = files;
  descriptor
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::key;
  use crate::query::CacheConfig;
  use crate::testing::MockTransport;
  use crate::transport::{ContentType, Method};
  use serde_json::json;
  use std::time::Duration;

  fn client() -> (MockTransport, CachedApiClient<MockTransport>) {
    let transport = MockTransport::new().with_delay(Duration::from_millis(10));
    let cache = QueryClient::new(CacheConfig::default());
    let client = CachedApiClient::with_transport(transport.clone(), cache);
    (transport, client)
  }

  #[tokio::test(start_paused = true)]
  async fn test_typed_reads_are_cached() {
    let (transport, client) = client();
    transport.respond(
      Method::Get,
      "/projects",
      Ok(json!([{"id": 1, "name": "Apollo"}, {"id": "2", "name": "Gemini"}])),
    );

    let projects = client.projects().await.unwrap();
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].id, "1");

    let again = client.projects().await.unwrap();
    assert_eq!(again, projects);
    assert_eq!(transport.count(Method::Get, "/projects"), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_reads_share_request() {
    let (transport, client) = client();
    transport.respond(Method::Get, "/employees-list", Ok(json!([{"id": 1}])));

    let (a, b, c) = tokio::join!(client.employees(), client.employees(), client.employees());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(transport.count(Method::Get, "/employees-list"), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_decode_failure_is_reported() {
    let (transport, client) = client();
    transport.respond(Method::Get, "/dashboard", Ok(json!("not an object")));

    let err = client.dashboard().await.unwrap_err();
    assert!(matches!(err, QueryError::Transport(TransportError::Decode(_))));
  }

  #[tokio::test(start_paused = true)]
  async fn test_watch_recovers_after_failed_read() {
    let (transport, client) = client();
    transport.respond_once(
      Method::Get,
      "/clients-list",
      Err(TransportError::Http {
        status: 502,
        body: "bad gateway".to_string(),
      }),
    );
    transport.respond(Method::Get, "/clients-list", Ok(json!([{"id": 3, "name": "Acme"}])));

    let mut clients = client.watch(&ApiQueryKey::Clients).unwrap();
    let failed = clients.settled().await;
    assert!(failed.is_error);
    assert!(failed.data.is_none());

    assert!(clients.refetch());
    let recovered = clients.settled().await;
    assert!(!recovered.is_error);
    assert_eq!(recovered.data(), Some(&json!([{"id": 3, "name": "Acme"}])));
    assert_eq!(transport.count(Method::Get, "/clients-list"), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_project_refreshes_list() {
    let (transport, client) = client();
    transport.respond(Method::Get, "/projects", Ok(json!([])));
    transport.respond(Method::Get, "/dashboard", Ok(json!({"total_projects": 0})));
    transport.respond(Method::Post, "/projects", Ok(json!({"id": 5})));

    let mut list = client.watch(&ApiQueryKey::Projects).unwrap();
    list.settled().await;

    let project = NewProject {
      name: "Apollo".to_string(),
      ..Default::default()
    };
    client.create_project(&project).await.unwrap();
    list.settled().await;

    assert_eq!(transport.count(Method::Get, "/projects"), 2);
    // Not subscribed, so invalidation does not fetch it.
    assert_eq!(transport.count(Method::Get, "/dashboard"), 0);

    let posted = transport
      .requests()
      .into_iter()
      .find(|r| r.method == Method::Post)
      .unwrap();
    assert_eq!(posted.body, Some(json!({"name": "Apollo"})));
  }

  #[tokio::test(start_paused = true)]
  async fn test_update_project_refreshes_its_family_only() {
    let (transport, client) = client();
    transport.respond(Method::Get, "/project-view/42", Ok(json!({"id": 42})));
    transport.respond(Method::Get, "/project-tasks/42", Ok(json!([])));
    transport.respond(Method::Get, "/project-view/43", Ok(json!({"id": 43})));
    transport.respond(Method::Put, "/projects/42", Ok(json!({"id": 42})));

    let mut subs = vec![
      client.watch(&"project:42".parse().unwrap()).unwrap(),
      client.watch(&"project-tasks:42".parse().unwrap()).unwrap(),
      client.watch(&"project:43".parse().unwrap()).unwrap(),
    ];
    for sub in &mut subs {
      sub.settled().await;
    }

    let update = ProjectUpdate {
      name: Some("Renamed".to_string()),
      ..Default::default()
    };
    client.update_project("42", &update).await.unwrap();
    for sub in &mut subs {
      sub.settled().await;
    }

    assert_eq!(transport.count(Method::Get, "/project-view/42"), 2);
    assert_eq!(transport.count(Method::Get, "/project-tasks/42"), 2);
    assert_eq!(transport.count(Method::Get, "/project-view/43"), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_mutation_does_not_refetch() {
    let (transport, client) = client();
    transport.respond(Method::Get, "/notifications", Ok(json!([])));
    transport.respond(
      Method::Patch,
      "/notifications/7/read",
      Err(TransportError::Auth {
        status: Some(401),
        message: "expired".to_string(),
      }),
    );

    let mut notes = client.watch(&ApiQueryKey::Notifications).unwrap();
    notes.settled().await;

    let err = client.mark_notification_read("7").await.unwrap_err();
    assert!(matches!(err, TransportError::Auth { .. }));
    assert!(!notes.current().is_fetching);
    assert_eq!(transport.count(Method::Get, "/notifications"), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_config_override_changes_create_project_route() {
    let (transport, client) = client();
    let client = client.with_overrides(BTreeMap::from([(
      "create_project".to_string(),
      MutationConfig {
        url: Some("/project-create".to_string()),
        content_type: Some(ContentType::Multipart),
        ..Default::default()
      },
    )]));
    transport.respond(Method::Post, "/project-create", Ok(json!({"ok": true})));

    let project = NewProject {
      name: "Apollo".to_string(),
      ..Default::default()
    };
    client.create_project(&project).await.unwrap();

    let sent = &transport.requests()[0];
    assert_eq!(sent.path, "/project-create");
    assert_eq!(sent.content_type, ContentType::Multipart);
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_named_declared_and_builtin() {
    let (transport, client) = client();
    let client = client.with_overrides(BTreeMap::from([(
      "archive_project".to_string(),
      MutationConfig {
        url: Some("/projects/archive".to_string()),
        method: Some(Method::Post),
        invalidates: vec![key!["projects"].unwrap()],
        ..Default::default()
      },
    )]));
    transport.respond(Method::Get, "/projects", Ok(json!([])));
    transport.respond(Method::Post, "/projects/archive", Ok(json!({"archived": 1})));
    transport.respond(Method::Delete, "/projects/9", Ok(Value::Null));

    let mut list = client.watch(&ApiQueryKey::Projects).unwrap();
    list.settled().await;

    let response = client
      .run_named("archive_project", Some(json!({"id": 9})), Vec::new())
      .await
      .unwrap();
    assert_eq!(response, json!({"archived": 1}));
    list.settled().await;
    assert_eq!(transport.count(Method::Get, "/projects"), 2);

    client
      .run_named("delete_project", Some(json!({"id": 9})), Vec::new())
      .await
      .unwrap();
    list.settled().await;
    assert_eq!(transport.count(Method::Get, "/projects"), 3);

    let unknown = client.run_named("nope", None, Vec::new()).await.unwrap_err();
    assert!(matches!(unknown, TransportError::Request(_)));
  }
}
