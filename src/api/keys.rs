//! Query keys for the project-management API.

use std::fmt;
use std::str::FromStr;

use color_eyre::eyre::{eyre, Report};

use crate::key;
use crate::query::{KeyError, QueryKey, ResourceKey};

/// Readable API resources.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApiQueryKey {
  /// All projects
  Projects,
  /// One project's detail view
  ProjectView { id: String },
  /// Tasks belonging to a project
  ProjectTasks { project_id: String },
  /// Files attached to a project
  ProjectFiles { project_id: String },
  Employees,
  Clients,
  Notifications,
  Dashboard,
}

impl ApiQueryKey {
  /// Request path relative to the API base URL.
  pub fn path(&self) -> String {
    match self {
      Self::Projects => "/projects".to_string(),
      Self::ProjectView { id } => format!("/project-view/{}", id),
      Self::ProjectTasks { project_id } => format!("/project-tasks/{}", project_id),
      Self::ProjectFiles { project_id } => format!("/project-files/{}", project_id),
      Self::Employees => "/employees-list".to_string(),
      Self::Clients => "/clients-list".to_string(),
      Self::Notifications => "/notifications".to_string(),
      Self::Dashboard => "/dashboard".to_string(),
    }
  }

  /// Canonical resource name, as used on the command line.
  pub fn name(&self) -> &'static str {
    match self {
      Self::Projects => "projects",
      Self::ProjectView { .. } => "project",
      Self::ProjectTasks { .. } => "project-tasks",
      Self::ProjectFiles { .. } => "project-files",
      Self::Employees => "employees",
      Self::Clients => "clients",
      Self::Notifications => "notifications",
      Self::Dashboard => "dashboard",
    }
  }

  /// Build a key from a canonical name and optional id.
  pub fn from_name(name: &str, id: Option<&str>) -> Option<Self> {
    let id = id.map(str::to_string);
    match (name, id) {
      ("projects", None) => Some(Self::Projects),
      ("project", Some(id)) => Some(Self::ProjectView { id }),
      ("project-tasks", Some(project_id)) => Some(Self::ProjectTasks { project_id }),
      ("project-files", Some(project_id)) => Some(Self::ProjectFiles { project_id }),
      ("employees", None) => Some(Self::Employees),
      ("clients", None) => Some(Self::Clients),
      ("notifications", None) => Some(Self::Notifications),
      ("dashboard", None) => Some(Self::Dashboard),
      _ => None,
    }
  }

  fn id(&self) -> Option<&str> {
    match self {
      Self::ProjectView { id } => Some(id),
      Self::ProjectTasks { project_id } | Self::ProjectFiles { project_id } => Some(project_id),
      _ => None,
    }
  }
}

/// Key of a project and everything nested under it.
pub fn project_family(id: &str) -> Result<ResourceKey, KeyError> {
  key!["project", id]
}

impl QueryKey for ApiQueryKey {
  fn resource_key(&self) -> Result<ResourceKey, KeyError> {
    match self {
      Self::Projects => key!["projects"],
      Self::ProjectView { id } => project_family(id),
      Self::ProjectTasks { project_id } => key!["project", project_id, "tasks"],
      Self::ProjectFiles { project_id } => key!["project", project_id, "files"],
      Self::Employees => key!["employees"],
      Self::Clients => key!["clients"],
      Self::Notifications => key!["notifications"],
      Self::Dashboard => key!["dashboard"],
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Projects => "all projects".to_string(),
      Self::ProjectView { id } => format!("project {}", id),
      Self::ProjectTasks { project_id } => format!("tasks for project {}", project_id),
      Self::ProjectFiles { project_id } => format!("files for project {}", project_id),
      Self::Employees => "employees".to_string(),
      Self::Clients => "clients".to_string(),
      Self::Notifications => "notifications".to_string(),
      Self::Dashboard => "dashboard summary".to_string(),
    }
  }
}

impl fmt::Display for ApiQueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.id() {
      Some(id) => write!(f, "{}:{}", self.name(), id),
      None => f.write_str(self.name()),
    }
  }
}

/// Parses `name` or `name:id`, e.g. `projects` or `project-tasks:42`.
impl FromStr for ApiQueryKey {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (name, id) = match s.split_once(':') {
      Some((name, id)) => (name.trim(), Some(id.trim())),
      None => (s.trim(), None),
    };
    if id.is_some_and(str::is_empty) {
      return Err(eyre!("Missing id in resource {:?}", s));
    }

    Self::from_name(name, id).ok_or_else(|| match (Self::from_name(name, Some("_")), id) {
      (Some(_), None) => eyre!("Resource {} needs an id, e.g. {}:42", name, name),
      (None, Some(_)) if Self::from_name(name, None).is_some() => {
        eyre!("Resource {} does not take an id", name)
      }
      _ => eyre!("Unknown resource: {}", name),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resource_keys_match_routes() {
    let view = ApiQueryKey::ProjectView {
      id: "42".to_string(),
    };
    assert_eq!(view.path(), "/project-view/42");
    assert_eq!(view.resource_key().unwrap(), key!["project", "42"].unwrap());

    let tasks = ApiQueryKey::ProjectTasks {
      project_id: "42".to_string(),
    };
    assert_eq!(tasks.path(), "/project-tasks/42");
    assert!(tasks
      .resource_key()
      .unwrap()
      .starts_with(&project_family("42").unwrap()));

    assert_eq!(ApiQueryKey::Employees.path(), "/employees-list");
    assert_eq!(
      ApiQueryKey::Projects.resource_key().unwrap(),
      ResourceKey::normalize("projects").unwrap()
    );
  }

  #[test]
  fn test_parse_and_display() {
    let key: ApiQueryKey = "project-files:7".parse().unwrap();
    assert_eq!(
      key,
      ApiQueryKey::ProjectFiles {
        project_id: "7".to_string()
      }
    );
    assert_eq!(key.to_string(), "project-files:7");
    assert_eq!("dashboard".parse::<ApiQueryKey>().unwrap(), ApiQueryKey::Dashboard);
  }

  #[test]
  fn test_parse_errors() {
    let missing = "project".parse::<ApiQueryKey>().unwrap_err();
    assert!(missing.to_string().contains("needs an id"));

    let extra = "projects:1".parse::<ApiQueryKey>().unwrap_err();
    assert!(extra.to_string().contains("does not take an id"));

    let unknown = "invoices".parse::<ApiQueryKey>().unwrap_err();
    assert!(unknown.to_string().contains("Unknown resource"));

    assert!("project:".parse::<ApiQueryKey>().is_err());
  }

  #[test]
  fn test_empty_id_is_a_malformed_key() {
    let key = ApiQueryKey::ProjectView { id: String::new() };
    assert_eq!(key.resource_key(), Err(KeyError::EmptySegment { index: 1 }));
  }
}
