//! Payload types for the project-management API.
//!
//! Responses are deserialized leniently: ids may arrive as numbers or
//! strings, and missing fields fall back to defaults. Fields the API adds
//! later land in `extra` instead of failing the decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
  Str(String),
  Int(i64),
  Float(f64),
}

impl From<RawId> for String {
  fn from(raw: RawId) -> Self {
    match raw {
      RawId::Str(s) => s,
      RawId::Int(n) => n.to_string(),
      RawId::Float(n) => n.to_string(),
    }
  }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(RawId::deserialize(deserializer)?.into())
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Project {
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default, alias = "title")]
  pub name: String,
  pub description: Option<String>,
  pub status: Option<String>,
  #[serde(default, alias = "client", deserialize_with = "deserialize_opt_id")]
  pub client_id: Option<String>,
  pub start_date: Option<String>,
  #[serde(alias = "deadline")]
  pub end_date: Option<String>,
  pub progress: Option<f64>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Task {
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default, alias = "project", deserialize_with = "deserialize_opt_id")]
  pub project_id: Option<String>,
  #[serde(default, alias = "name")]
  pub title: String,
  pub description: Option<String>,
  pub status: Option<String>,
  pub priority: Option<String>,
  #[serde(default, alias = "assigned_to", deserialize_with = "deserialize_opt_id")]
  pub assignee_id: Option<String>,
  pub due_date: Option<String>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Employee {
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub email: Option<String>,
  pub role: Option<String>,
  pub designation: Option<String>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Client {
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub email: Option<String>,
  pub company: Option<String>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Notification {
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub message: String,
  #[serde(default, alias = "is_read")]
  pub read: bool,
  pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FileEntry {
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default, alias = "file_name", alias = "filename")]
  pub name: String,
  pub url: Option<String>,
  pub size: Option<u64>,
  pub uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DashboardSummary {
  pub total_projects: Option<u64>,
  pub active_projects: Option<u64>,
  pub completed_projects: Option<u64>,
  pub total_tasks: Option<u64>,
  pub pending_tasks: Option<u64>,
  pub total_employees: Option<u64>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewProject {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub client_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_date: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_date: Option<String>,
}

/// Partial update; only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewTask {
  pub project_id: String,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assignee_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assignee_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewEmployee {
  pub name: String,
  pub email: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub designation: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_ids_accept_numbers_and_strings() {
    let projects: Vec<Project> = serde_json::from_value(json!([
      {"id": 42, "name": "Apollo", "client": 7},
      {"id": "p-9", "title": "Gemini", "budget": 1000}
    ]))
    .unwrap();

    assert_eq!(projects[0].id, "42");
    assert_eq!(projects[0].client_id.as_deref(), Some("7"));
    assert_eq!(projects[1].id, "p-9");
    assert_eq!(projects[1].name, "Gemini");
    assert_eq!(projects[1].extra.get("budget"), Some(&json!(1000)));
  }

  #[test]
  fn test_missing_fields_default() {
    let task: Task = serde_json::from_value(json!({"id": 1})).unwrap();
    assert_eq!(task.id, "1");
    assert!(task.title.is_empty());
    assert!(task.project_id.is_none());

    let note: Notification = serde_json::from_value(json!({"id": 3, "is_read": true})).unwrap();
    assert!(note.read);

    let summary: DashboardSummary = serde_json::from_value(json!({"total_projects": 4})).unwrap();
    assert_eq!(summary.total_projects, Some(4));
  }

  #[test]
  fn test_updates_skip_unset_fields() {
    let update = ProjectUpdate {
      status: Some("done".to_string()),
      ..Default::default()
    };
    assert_eq!(serde_json::to_value(&update).unwrap(), json!({"status": "done"}));
  }
}
