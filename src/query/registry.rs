//! Map from canonical resource keys to cache entries.

use std::collections::HashMap;

use super::key::ResourceKey;

/// Keyed storage for cache entries, with family (prefix) lookups.
#[derive(Debug)]
pub struct KeyRegistry<E> {
  entries: HashMap<ResourceKey, E>,
}

impl<E> Default for KeyRegistry<E> {
  fn default() -> Self {
    Self {
      entries: HashMap::new(),
    }
  }
}

impl<E> KeyRegistry<E> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &ResourceKey) -> Option<&E> {
    self.entries.get(key)
  }

  pub fn get_mut(&mut self, key: &ResourceKey) -> Option<&mut E> {
    self.entries.get_mut(key)
  }

  /// Insert an entry, returning the one it replaced.
  pub fn insert(&mut self, key: ResourceKey, entry: E) -> Option<E> {
    self.entries.insert(key, entry)
  }

  /// Existing entry for `key`, or a new one built by `make`.
  pub fn get_or_insert_with(&mut self, key: ResourceKey, make: impl FnOnce() -> E) -> &mut E {
    self.entries.entry(key).or_insert_with(make)
  }

  pub fn remove(&mut self, key: &ResourceKey) -> Option<E> {
    self.entries.remove(key)
  }

  /// Keys equal to `prefix` or extending it, in sorted order.
  pub fn keys_with_prefix(&self, prefix: &ResourceKey) -> Vec<ResourceKey> {
    let mut keys: Vec<ResourceKey> = self
      .entries
      .keys()
      .filter(|key| ResourceKey::matches_prefix(key, prefix))
      .cloned()
      .collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::key;

  #[test]
  fn test_keys_with_prefix_selects_family_only() {
    let mut registry = KeyRegistry::new();
    registry.insert(key!["project", 1].unwrap(), "view");
    registry.insert(key!["project", 1, "tasks"].unwrap(), "tasks");
    registry.insert(key!["project", 2].unwrap(), "other");
    registry.insert(key!["projects"].unwrap(), "list");

    let family = registry.keys_with_prefix(&key!["project", 1].unwrap());
    assert_eq!(
      family,
      vec![key!["project", 1].unwrap(), key!["project", 1, "tasks"].unwrap()]
    );

    let all_projects = registry.keys_with_prefix(&key!["project"].unwrap());
    assert_eq!(all_projects.len(), 3);
  }

  #[test]
  fn test_insert_get_remove() {
    let mut registry = KeyRegistry::new();
    let key = key!["employees"].unwrap();
    assert!(registry.insert(key.clone(), 1).is_none());
    assert_eq!(registry.insert(key.clone(), 2), Some(1));
    assert_eq!(registry.get(&key), Some(&2));
    *registry.get_mut(&key).unwrap() += 1;
    assert_eq!(registry.remove(&key), Some(3));
    assert!(registry.is_empty());

    *registry.get_or_insert_with(key.clone(), || 10) += 1;
    assert_eq!(*registry.get_or_insert_with(key.clone(), || 0), 11);
  }
}
