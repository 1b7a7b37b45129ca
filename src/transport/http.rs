use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{ApiRequest, ContentType, FilePart, Transport, TransportError};
use crate::config::Config;

/// API client over `reqwest`.
///
/// Cloning is cheap and clones share the connection pool and the credential.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
  token: Arc<RwLock<Option<String>>>,
}

impl HttpTransport {
  pub fn new(config: &Config) -> Result<Self> {
    Self::from_parts(
      &config.api.base_url,
      Duration::from_secs(config.api.timeout_secs),
      config.api_token(),
    )
  }

  pub fn from_parts(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
    let parsed =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL {}: {}", base_url, e))?;
    if parsed.cannot_be_a_base() {
      return Err(eyre!("Invalid API base URL {}: not a base URL", base_url));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
      token: Arc::new(RwLock::new(token)),
    })
  }

  /// Replace the bearer credential used for `auth` requests.
  pub fn set_token(&self, token: impl Into<String>) {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
  }

  pub fn clear_token(&self) {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
  }

  fn token(&self) -> Option<String> {
    self
      .token
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn url(&self, path: &str) -> Result<Url, TransportError> {
    let full = if path.starts_with('/') {
      format!("{}{}", self.base_url, path)
    } else {
      format!("{}/{}", self.base_url, path)
    };
    Url::parse(&full).map_err(|e| TransportError::Request(format!("invalid URL {}: {}", full, e)))
  }
}

impl Transport for HttpTransport {
  async fn send(&self, request: ApiRequest) -> Result<Value, TransportError> {
    let url = self.url(&request.path)?;
    let mut builder = self.client.request(request.method.into(), url);

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    if request.auth {
      let token = self.token().ok_or_else(TransportError::missing_credential)?;
      builder = builder.bearer_auth(token);
    }

    builder = match request.content_type {
      ContentType::Json => {
        if !request.files.is_empty() {
          return Err(TransportError::Request(
            "file attachments require multipart encoding".to_string(),
          ));
        }
        match &request.body {
          Some(body) => builder.json(body),
          None => builder,
        }
      }
      ContentType::Multipart => {
        builder.multipart(encode_multipart(request.body.as_ref(), &request.files)?)
      }
      ContentType::None => {
        if request.body.is_some() || !request.files.is_empty() {
          return Err(TransportError::Request(format!(
            "{} {} does not take a body",
            request.method, request.path
          )));
        }
        builder
      }
    };

    debug!(method = %request.method, path = %request.path, "Sending request");

    let response = builder.send().await?;
    let status = response.status();
    let bytes = response
      .bytes()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?;

    if !status.is_success() {
      let body = String::from_utf8_lossy(&bytes).into_owned();
      warn!(method = %request.method, path = %request.path, status = status.as_u16(), "Request failed");
      return Err(TransportError::from_status(status.as_u16(), body));
    }

    parse_body(&bytes)
  }
}

/// Parse a success body. Empty bodies (e.g. 204) decode to `null`.
fn parse_body(bytes: &[u8]) -> Result<Value, TransportError> {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }
  Ok(serde_json::from_slice(bytes)?)
}

/// Encode a JSON object and file attachments as multipart form data.
///
/// Strings are sent verbatim, other scalars rendered, nested values JSON-encoded,
/// and `null` fields skipped.
fn encode_multipart(body: Option<&Value>, files: &[FilePart]) -> Result<Form, TransportError> {
  let mut form = Form::new();

  match body {
    None => {}
    Some(Value::Object(fields)) => {
      for (name, value) in fields {
        form = match value {
          Value::Null => continue,
          Value::String(s) => form.text(name.clone(), s.clone()),
          other => form.text(name.clone(), other.to_string()),
        };
      }
    }
    Some(_) => {
      return Err(TransportError::Request(
        "multipart body must be a JSON object".to_string(),
      ))
    }
  }

  for file in files {
    let mut part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
    if let Some(mime) = &file.mime {
      part = part
        .mime_str(mime)
        .map_err(|e| TransportError::Request(format!("invalid MIME type {}: {}", mime, e)))?;
    }
    form = form.part(file.field.clone(), part);
  }

  Ok(form)
}
