//! Built-in write operations and the cache keys each one invalidates.

use serde_json::Value;

use crate::key;
use crate::query::{KeyError, MutationDescriptor, ResourceKey};
use crate::transport::{FilePart, TransportError};

use super::keys::project_family;

/// Names accepted by [`builtin`].
pub const BUILTIN_MUTATIONS: &[&str] = &[
  "create_project",
  "update_project",
  "delete_project",
  "create_task",
  "update_task",
  "create_employee",
  "upload_file",
  "mark_notification_read",
];

fn tasks_of(project_id: &str) -> Result<ResourceKey, KeyError> {
  key!["project", project_id, "tasks"]
}

fn files_of(project_id: &str) -> Result<ResourceKey, KeyError> {
  key!["project", project_id, "files"]
}

pub fn create_project(body: Value) -> Result<MutationDescriptor, KeyError> {
  Ok(
    MutationDescriptor::post("/projects")
      .json(body)
      .invalidates(key!["projects"]?)
      .invalidates(key!["dashboard"]?),
  )
}

pub fn update_project(id: &str, body: Value) -> Result<MutationDescriptor, KeyError> {
  Ok(
    MutationDescriptor::put(format!("/projects/{}", id))
      .json(body)
      .invalidates(key!["projects"]?)
      .invalidates(project_family(id)?)
      .invalidates(key!["dashboard"]?),
  )
}

pub fn delete_project(id: &str) -> Result<MutationDescriptor, KeyError> {
  Ok(
    MutationDescriptor::delete(format!("/projects/{}", id))
      .invalidates(key!["projects"]?)
      .invalidates(project_family(id)?)
      .invalidates(key!["dashboard"]?),
  )
}

pub fn create_task(project_id: &str, body: Value) -> Result<MutationDescriptor, KeyError> {
  Ok(
    MutationDescriptor::post("/tasks")
      .json(body)
      .invalidates(tasks_of(project_id)?)
      .invalidates(key!["dashboard"]?),
  )
}

pub fn update_task(
  project_id: &str,
  task_id: &str,
  body: Value,
) -> Result<MutationDescriptor, KeyError> {
  Ok(
    MutationDescriptor::put(format!("/tasks/{}", task_id))
      .json(body)
      .invalidates(tasks_of(project_id)?)
      .invalidates(key!["dashboard"]?),
  )
}

pub fn create_employee(body: Value) -> Result<MutationDescriptor, KeyError> {
  Ok(
    MutationDescriptor::post("/employees")
      .json(body)
      .invalidates(key!["employees"]?),
  )
}

pub fn upload_file(project_id: &str, file: FilePart) -> Result<MutationDescriptor, KeyError> {
  Ok(
    MutationDescriptor::post(format!("/project-files/{}", project_id))
      .multipart(Value::Object(Default::default()))
      .file(file)
      .invalidates(files_of(project_id)?),
  )
}

pub fn mark_notification_read(id: &str) -> Result<MutationDescriptor, KeyError> {
  Ok(
    MutationDescriptor::patch(format!("/notifications/{}/read", id))
      .no_body()
      .invalidates(key!["notifications"]?),
  )
}

/// Read a required id field from a loosely-typed body.
fn id_field(body: &Value, field: &str) -> Result<String, TransportError> {
  match body.get(field) {
    Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
    Some(Value::Number(n)) => Ok(n.to_string()),
    _ => Err(TransportError::Request(format!(
      "body must contain a \"{}\" field",
      field
    ))),
  }
}

/// Build a built-in mutation from a name and a loosely-typed body.
///
/// Ids that appear in the path are read from the body (`id`, `project_id`,
/// `task_id`). Returns `None` for names that are not built in.
pub fn builtin(
  name: &str,
  body: Option<Value>,
  files: Vec<FilePart>,
) -> Option<Result<MutationDescriptor, TransportError>> {
  let body = body.unwrap_or_else(|| Value::Object(Default::default()));
  let key_error = |e: KeyError| TransportError::Request(e.to_string());

  let descriptor = match name {
    "create_project" => create_project(body).map_err(key_error),
    "update_project" => {
      id_field(&body, "id").and_then(|id| update_project(&id, body.clone()).map_err(key_error))
    }
    "delete_project" => id_field(&body, "id").and_then(|id| delete_project(&id).map_err(key_error)),
    "create_task" => id_field(&body, "project_id")
      .and_then(|project_id| create_task(&project_id, body.clone()).map_err(key_error)),
    "update_task" => id_field(&body, "project_id").and_then(|project_id| {
      let task_id = id_field(&body, "task_id")?;
      update_task(&project_id, &task_id, body.clone()).map_err(key_error)
    }),
    "create_employee" => create_employee(body).map_err(key_error),
    "upload_file" => id_field(&body, "project_id").and_then(|project_id| {
      let mut files = files.into_iter();
      let file = files
        .next()
        .ok_or_else(|| TransportError::Request("upload_file needs a file".to_string()))?;
      let descriptor = upload_file(&project_id, file).map_err(key_error)?;
      Ok(files.fold(descriptor, MutationDescriptor::file))
    }),
    "mark_notification_read" => {
      id_field(&body, "id").and_then(|id| mark_notification_read(&id).map_err(key_error))
    }
    _ => return None,
  };
  Some(descriptor)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::{ContentType, Method};
  use serde_json::json;

  #[test]
  fn test_update_project_invalidates_family() {
    let descriptor = update_project("42", json!({"name": "x"})).unwrap();
    assert_eq!(descriptor.method, Method::Put);
    assert_eq!(descriptor.url, "/projects/42");
    assert!(descriptor
      .invalidates
      .contains(&key!["project", "42"].unwrap()));
    assert!(descriptor.invalidates.contains(&key!["projects"].unwrap()));
  }

  #[test]
  fn test_builtin_reads_ids_from_body() {
    let descriptor = builtin("update_task", Some(json!({"project_id": 3, "task_id": "t1"})), vec![])
      .unwrap()
      .unwrap();
    assert_eq!(descriptor.url, "/tasks/t1");
    assert_eq!(descriptor.invalidates[0], key!["project", "3", "tasks"].unwrap());

    let missing = builtin("delete_project", None, vec![]).unwrap().unwrap_err();
    assert!(matches!(missing, TransportError::Request(_)));

    assert!(builtin("archive_everything", None, vec![]).is_none());
  }

  #[test]
  fn test_upload_is_multipart() {
    let file = FilePart::new("file", "plan.pdf", vec![1, 2, 3]);
    let descriptor = builtin("upload_file", Some(json!({"project_id": "9"})), vec![file])
      .unwrap()
      .unwrap();
    assert_eq!(descriptor.content_type, ContentType::Multipart);
    assert_eq!(descriptor.files.len(), 1);
    assert_eq!(descriptor.invalidates, vec![key!["project", "9", "files"].unwrap()]);

    assert!(builtin("upload_file", Some(json!({"project_id": "9"})), vec![])
      .unwrap()
      .is_err());
  }

  #[test]
  fn test_every_builtin_name_resolves() {
    let body = json!({"id": 1, "project_id": 2, "task_id": 3});
    let file = FilePart::new("file", "a.txt", vec![]);
    for name in BUILTIN_MUTATIONS {
      let descriptor = builtin(name, Some(body.clone()), vec![file.clone()]);
      assert!(matches!(descriptor, Some(Ok(_))), "{}", name);
    }
  }
}
