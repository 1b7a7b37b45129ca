//! Resource catalog and name resolution for the command line.
use color_eyre::{eyre::eyre, Result};

use crate::api::ApiQueryKey;

#[derive(Debug, Clone)]
pub struct Resource {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
  /// Requires an id, written `name:id`
  pub takes_id: bool,
}

/// All readable resources
pub const RESOURCES: &[Resource] = &[
  Resource {
    name: "projects",
    aliases: &["p", "ps"],
    description: "All projects",
    takes_id: false,
  },
  Resource {
    name: "project",
    aliases: &["pv", "view"],
    description: "One project's detail view",
    takes_id: true,
  },
  Resource {
    name: "project-tasks",
    aliases: &["t", "tasks"],
    description: "Tasks of a project",
    takes_id: true,
  },
  Resource {
    name: "project-files",
    aliases: &["f", "files"],
    description: "Files attached to a project",
    takes_id: true,
  },
  Resource {
    name: "employees",
    aliases: &["e", "emp", "staff"],
    description: "Employee directory",
    takes_id: false,
  },
  Resource {
    name: "clients",
    aliases: &["c", "customers"],
    description: "Client list",
    takes_id: false,
  },
  Resource {
    name: "notifications",
    aliases: &["n", "notes"],
    description: "Your notifications",
    takes_id: false,
  },
  Resource {
    name: "dashboard",
    aliases: &["d", "home"],
    description: "Summary counts",
    takes_id: false,
  },
];

/// Get suggestions for a given input, best match first.
///
/// Input written `name:id` (or just `name:`) only matches resources that
/// take an id.
pub fn get_suggestions(input: &str) -> Vec<&'static Resource> {
  let (name, with_id) = match input.split_once(':') {
    Some((name, _)) => (name, true),
    None => (input, false),
  };
  let input_lower = name.trim().to_lowercase();
  let candidates = RESOURCES.iter().filter(|res| res.takes_id || !with_id);

  if input_lower.is_empty() {
    return candidates.collect();
  }

  let mut matches: Vec<(&Resource, u32)> = Vec::new();

  for res in candidates {
    // Exact match on name
    if res.name == input_lower {
      matches.push((res, 0));
      continue;
    }

    // Exact match on alias
    if res.aliases.contains(&input_lower.as_str()) {
      matches.push((res, 1));
      continue;
    }

    // Prefix match on name
    if res.name.starts_with(&input_lower) {
      matches.push((res, 2));
      continue;
    }

    // Prefix match on alias
    if res.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((res, 3));
      continue;
    }

    // Fuzzy match (contains)
    if res.name.contains(&input_lower) {
      matches.push((res, 4));
      continue;
    }

    // Fuzzy match on alias
    if res.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((res, 5));
    }
  }

  // Stable sort keeps catalog order within a priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(res, _)| res).collect()
}

/// Resolve `name[:id]`, accepting aliases, into a query key.
///
/// Only exact names and aliases resolve; anything else is an error listing
/// the closest suggestions.
pub fn parse_resource(input: &str) -> Result<ApiQueryKey> {
  let (name, id) = match input.split_once(':') {
    Some((name, id)) => (name.trim(), Some(id.trim())),
    None => (input.trim(), None),
  };
  let name_lower = name.to_lowercase();

  let resolved = RESOURCES
    .iter()
    .find(|r| r.name == name_lower || r.aliases.contains(&name_lower.as_str()));

  let Some(resource) = resolved else {
    let suggestions: Vec<&str> = get_suggestions(input)
      .into_iter()
      .take(3)
      .map(|r| r.name)
      .collect();
    return Err(if suggestions.is_empty() {
      eyre!("Unknown resource: {}", name)
    } else {
      eyre!(
        "Unknown resource: {} (did you mean {}?)",
        name,
        suggestions.join(", ")
      )
    });
  };

  let canonical = match id {
    Some(id) => format!("{}:{}", resource.name, id),
    None => resource.name.to_string(),
  };
  canonical.parse()
}
