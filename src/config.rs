use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::{CacheConfig, MutationDescriptor, ResourceKey};
use crate::transport::{ContentType, Method};

/// Environment variable holding the API bearer token.
pub const TOKEN_ENV: &str = "PMQ_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub logging: LoggingConfig,
  /// Named mutations, or overrides for built-in ones
  #[serde(default)]
  pub mutations: BTreeMap<String, MutationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Fallback when PMQ_API_TOKEN is not set
  pub token: Option<String>,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheSettings {
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
  #[serde(default = "default_gc_time_secs")]
  pub gc_time_secs: u64,
}

fn default_stale_time_secs() -> u64 {
  60
}

fn default_gc_time_secs() -> u64 {
  300
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
      gc_time_secs: default_gc_time_secs(),
    }
  }
}

impl From<CacheSettings> for CacheConfig {
  fn from(settings: CacheSettings) -> Self {
    CacheConfig {
      stale_time: Duration::from_secs(settings.stale_time_secs),
      gc_time: Duration::from_secs(settings.gc_time_secs),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Default filter directive; RUST_LOG takes precedence
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Log file name, written under the data directory. Logs go to stderr when unset.
  pub file: Option<String>,
}

fn default_log_level() -> String {
  "warn".to_string()
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

impl LoggingConfig {
  /// Full path of the log file, if file logging is enabled.
  pub fn file_path(&self) -> Option<PathBuf> {
    let name = self.file.as_ref()?;
    let dir = dirs::data_dir()
      .map(|d| d.join("pmq"))
      .unwrap_or_else(|| PathBuf::from("."));
    Some(dir.join(name))
  }
}

/// A mutation declared in config.
///
/// Complete entries (url and method) define new mutations; partial entries
/// override fields of the built-in mutation with the same name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MutationConfig {
  pub url: Option<String>,
  pub method: Option<Method>,
  #[serde(alias = "contentType")]
  pub content_type: Option<ContentType>,
  pub auth: Option<bool>,
  #[serde(default, alias = "additionalHeaders")]
  pub additional_headers: BTreeMap<String, String>,
  /// Key prefixes to invalidate on success
  #[serde(default)]
  pub invalidates: Vec<ResourceKey>,
}

impl MutationConfig {
  /// Apply this entry on top of an existing descriptor.
  pub fn apply(&self, mut descriptor: MutationDescriptor) -> MutationDescriptor {
    if let Some(url) = &self.url {
      descriptor.url = url.clone();
    }
    if let Some(method) = self.method {
      descriptor.method = method;
    }
    if let Some(content_type) = self.content_type {
      descriptor.content_type = content_type;
    }
    if let Some(auth) = self.auth {
      descriptor.auth = auth;
    }
    descriptor.additional_headers.extend(
      self
        .additional_headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone())),
    );
    for key in &self.invalidates {
      descriptor = descriptor.invalidates(key.clone());
    }
    descriptor
  }

  /// Build a standalone descriptor. Requires `url` and `method`.
  pub fn to_descriptor(&self, name: &str) -> Result<MutationDescriptor> {
    let (Some(url), Some(method)) = (&self.url, self.method) else {
      return Err(eyre!("Mutation {} needs both url and method", name));
    };
    Ok(self.apply(MutationDescriptor::new(method, url.clone())))
  }
}

impl Config {
  /// Minimal config pointing at `base_url`, with defaults everywhere else.
  pub fn with_base_url(base_url: impl Into<String>) -> Self {
    Self {
      api: ApiConfig {
        base_url: base_url.into(),
        timeout_secs: default_timeout_secs(),
        token: None,
      },
      cache: CacheSettings::default(),
      logging: LoggingConfig::default(),
      mutations: BTreeMap::new(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pmq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pmq/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/pmq/config.yaml\n\
                 or pass --base-url."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("pmq.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pmq").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {:?}: {}", self.api.base_url, e))?;

    for (name, mutation) in &self.mutations {
      if mutation.method == Some(Method::Get) {
        return Err(eyre!("Mutation {} cannot use GET", name));
      }
    }
    Ok(())
  }

  /// The API token: PMQ_API_TOKEN, then `api.token`.
  pub fn api_token(&self) -> Option<String> {
    std::env::var(TOKEN_ENV)
      .ok()
      .filter(|t| !t.is_empty())
      .or_else(|| self.api.token.clone())
  }

  pub fn cache_config(&self) -> CacheConfig {
    self.cache.into()
  }
}
