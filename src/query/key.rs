//! Canonical resource keys.
//!
//! Callers identify resources with a bare string (`"projects"`), a sequence of
//! primitives (`["project", 42]`), or a loosely-typed JSON value read from
//! configuration. All of these normalize into a [`ResourceKey`] before any
//! comparison, so `"projects"` and `["projects"]` are the same key.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Reasons a key cannot be normalized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
  #[error("resource key must contain at least one segment")]
  Empty,

  #[error("resource key segment {index} is an empty string")]
  EmptySegment { index: usize },

  #[error("resource key segment {index} is not a string or integer: {found}")]
  UnsupportedSegment { index: usize, found: String },

  #[error("resource key must be a string or a sequence, got {0}")]
  UnsupportedShape(String),
}

/// A single key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
  Str(String),
  Int(i64),
}

impl fmt::Display for KeyPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeyPart::Str(s) => write!(f, "{:?}", s),
      KeyPart::Int(n) => write!(f, "{}", n),
    }
  }
}

impl From<&str> for KeyPart {
  fn from(s: &str) -> Self {
    KeyPart::Str(s.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(s: String) -> Self {
    KeyPart::Str(s)
  }
}

impl From<&String> for KeyPart {
  fn from(s: &String) -> Self {
    KeyPart::Str(s.clone())
  }
}

impl From<i64> for KeyPart {
  fn from(n: i64) -> Self {
    KeyPart::Int(n)
  }
}

impl From<i32> for KeyPart {
  fn from(n: i32) -> Self {
    KeyPart::Int(n.into())
  }
}

impl From<u32> for KeyPart {
  fn from(n: u32) -> Self {
    KeyPart::Int(n.into())
  }
}

/// Canonical identifier of a cacheable resource or resource family.
///
/// Equality is element-wise. Keys sharing a prefix belong to the same family
/// for invalidation purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Vec<KeyPart>);

impl ResourceKey {
  /// Normalize any accepted key shape.
  pub fn normalize(key: impl IntoResourceKey) -> Result<Self, KeyError> {
    key.into_resource_key()
  }

  pub fn from_parts(parts: Vec<KeyPart>) -> Result<Self, KeyError> {
    if parts.is_empty() {
      return Err(KeyError::Empty);
    }
    for (index, part) in parts.iter().enumerate() {
      if matches!(part, KeyPart::Str(s) if s.is_empty()) {
        return Err(KeyError::EmptySegment { index });
      }
    }
    Ok(Self(parts))
  }

  /// Normalize a loosely-typed key: a string or an array of strings/integers.
  pub fn from_json(value: &Value) -> Result<Self, KeyError> {
    match value {
      Value::String(s) => Self::from_parts(vec![KeyPart::Str(s.clone())]),
      Value::Array(items) => {
        let parts = items
          .iter()
          .enumerate()
          .map(|(index, item)| match item {
            Value::String(s) => Ok(KeyPart::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(KeyPart::Int).ok_or_else(|| {
              KeyError::UnsupportedSegment {
                index,
                found: n.to_string(),
              }
            }),
            other => Err(KeyError::UnsupportedSegment {
              index,
              found: other.to_string(),
            }),
          })
          .collect::<Result<Vec<_>, _>>()?;
        Self::from_parts(parts)
      }
      other => Err(KeyError::UnsupportedShape(other.to_string())),
    }
  }

  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Always false; keys have at least one segment.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// True if `self` equals `prefix` or extends it.
  pub fn starts_with(&self, prefix: &ResourceKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  pub fn matches_prefix(candidate: &ResourceKey, prefix: &ResourceKey) -> bool {
    candidate.starts_with(prefix)
  }

  /// Extend the key with one more segment.
  pub fn child(&self, part: impl Into<KeyPart>) -> Result<Self, KeyError> {
    let mut parts = self.0.clone();
    parts.push(part.into());
    Self::from_parts(parts)
  }

  pub fn to_json(&self) -> Value {
    Value::Array(
      self
        .0
        .iter()
        .map(|part| match part {
          KeyPart::Str(s) => Value::String(s.clone()),
          KeyPart::Int(n) => Value::from(*n),
        })
        .collect(),
    )
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("[")?;
    for (i, part) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{}", part)?;
    }
    f.write_str("]")
  }
}

impl Serialize for ResourceKey {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_json().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for ResourceKey {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = Value::deserialize(deserializer)?;
    ResourceKey::from_json(&value).map_err(serde::de::Error::custom)
  }
}

/// Shapes accepted wherever a key is expected.
pub trait IntoResourceKey {
  fn into_resource_key(self) -> Result<ResourceKey, KeyError>;
}

impl IntoResourceKey for ResourceKey {
  fn into_resource_key(self) -> Result<ResourceKey, KeyError> {
    Ok(self)
  }
}

impl IntoResourceKey for &ResourceKey {
  fn into_resource_key(self) -> Result<ResourceKey, KeyError> {
    Ok(self.clone())
  }
}

impl IntoResourceKey for &str {
  fn into_resource_key(self) -> Result<ResourceKey, KeyError> {
    ResourceKey::from_parts(vec![KeyPart::from(self)])
  }
}

impl IntoResourceKey for String {
  fn into_resource_key(self) -> Result<ResourceKey, KeyError> {
    ResourceKey::from_parts(vec![KeyPart::Str(self)])
  }
}

impl IntoResourceKey for Vec<KeyPart> {
  fn into_resource_key(self) -> Result<ResourceKey, KeyError> {
    ResourceKey::from_parts(self)
  }
}

impl<const N: usize> IntoResourceKey for [KeyPart; N] {
  fn into_resource_key(self) -> Result<ResourceKey, KeyError> {
    ResourceKey::from_parts(self.into())
  }
}

impl IntoResourceKey for &Value {
  fn into_resource_key(self) -> Result<ResourceKey, KeyError> {
    ResourceKey::from_json(self)
  }
}

impl IntoResourceKey for Value {
  fn into_resource_key(self) -> Result<ResourceKey, KeyError> {
    ResourceKey::from_json(&self)
  }
}

/// Typed query keys (e.g. an enum of API resources).
pub trait QueryKey {
  /// Canonical key used for caching and invalidation.
  fn resource_key(&self) -> Result<ResourceKey, KeyError>;

  /// Human-readable description for logs.
  fn description(&self) -> String;
}

/// Build a [`ResourceKey`] from segments: `key!["project", 42]`.
///
/// Evaluates to `Result<ResourceKey, KeyError>`.
#[macro_export]
macro_rules! key {
  [$($part:expr),+ $(,)?] => {
    $crate::query::ResourceKey::from_parts(vec![$($crate::query::KeyPart::from($part)),+])
  };
}
