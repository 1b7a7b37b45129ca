//! Typed surface of the project-management API.

mod client;
mod keys;
pub mod mutations;
mod types;

pub use client::CachedApiClient;
pub use keys::{project_family, ApiQueryKey};
pub use types::{
  Client, DashboardSummary, Employee, FileEntry, NewEmployee, NewProject, NewTask, Notification,
  Project, ProjectUpdate, Task, TaskUpdate,
};
