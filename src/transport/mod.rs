//! HTTP transport for the project-management API.
//!
//! A [`Transport`] issues exactly one request per call and turns the response
//! into a parsed JSON value or a classified [`TransportError`]. It never
//! touches the cache; the query layer decides when to call it.

mod error;
mod http;

pub use error::TransportError;
pub use http::HttpTransport;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

/// HTTP methods used by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// How a request body is encoded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
  #[default]
  Json,
  Multipart,
  None,
}

/// A file attached to a multipart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
  /// Form field name
  pub field: String,
  pub file_name: String,
  pub mime: Option<String>,
  pub bytes: Vec<u8>,
}

impl FilePart {
  pub fn new(field: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      field: field.into(),
      file_name: file_name.into(),
      mime: None,
      bytes,
    }
  }

  pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
    self.mime = Some(mime.into());
    self
  }
}

/// One API call: method, path relative to the base URL, optional body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
  pub files: Vec<FilePart>,
  pub content_type: ContentType,
  pub headers: BTreeMap<String, String>,
  /// Attach the bearer credential
  pub auth: bool,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      body: None,
      files: Vec::new(),
      content_type: ContentType::Json,
      headers: BTreeMap::new(),
      auth: true,
    }
  }

  /// An authenticated GET without a body.
  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path).content_type(ContentType::None)
  }

  pub fn body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn content_type(mut self, content_type: ContentType) -> Self {
    self.content_type = content_type;
    self
  }

  pub fn file(mut self, file: FilePart) -> Self {
    self.files.push(file);
    self
  }

  pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(key.into(), value.into());
    self
  }

  pub fn auth(mut self, auth: bool) -> Self {
    self.auth = auth;
    self
  }
}

/// Issues a single request and parses the response.
///
/// Implementations must be cheap to clone; fetchers capture a clone per call.
pub trait Transport: Clone + Send + Sync + 'static {
  fn send(&self, request: ApiRequest)
    -> impl Future<Output = Result<Value, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_has_no_body_and_requires_auth() {
    let request = ApiRequest::get("/projects");
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.content_type, ContentType::None);
    assert!(request.body.is_none());
    assert!(request.auth);
  }

  #[test]
  fn test_method_and_content_type_deserialize() {
    let method: Method = serde_yaml::from_str("PATCH").unwrap();
    assert_eq!(method, Method::Patch);

    let content_type: ContentType = serde_yaml::from_str("multipart").unwrap();
    assert_eq!(content_type, ContentType::Multipart);
  }
}
