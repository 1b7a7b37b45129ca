use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use pmq::api::{ApiQueryKey, CachedApiClient};
use pmq::commands::{self, get_suggestions};
use pmq::config::{Config, LoggingConfig};
use pmq::query::QueryResult;
use pmq::transport::FilePart;

#[derive(Parser, Debug)]
#[command(name = "pmq")]
#[command(about = "Query and mutate the project-management API through a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pmq/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base URL (overrides config; usable without a config file)
  #[arg(long)]
  base_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a resource once and print it
  Get {
    /// Resource name or alias, with `:id` where needed (e.g. `project:42`)
    resource: String,
  },
  /// Subscribe to a resource and print every state change
  Watch {
    resource: String,
    /// Invalidate the resource this often
    #[arg(long, default_value_t = 30)]
    interval_secs: u64,
    /// Stop after this many completed fetches
    #[arg(long)]
    count: Option<usize>,
  },
  /// Run a built-in or configured mutation
  Mutate {
    name: String,
    /// JSON body
    #[arg(long)]
    body: Option<String>,
    /// File to upload, as FIELD=PATH (repeatable)
    #[arg(long = "file")]
    files: Vec<String>,
  },
  /// List resource names matching a prefix
  Resources { prefix: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  if let Command::Resources { prefix } = &args.command {
    list_resources(prefix.as_deref().unwrap_or(""));
    return Ok(());
  }

  let config = load_config(args.config.as_deref(), args.base_url)?;
  let _guard = init_tracing(&config.logging)?;

  let client = CachedApiClient::new(&config)?;
  match args.command {
    Command::Get { resource } => get(&client, &resource).await,
    Command::Watch {
      resource,
      interval_secs,
      count,
    } => watch(&client, &resource, interval_secs, count).await,
    Command::Mutate { name, body, files } => mutate(&client, &name, body, files).await,
    Command::Resources { .. } => Ok(()),
  }
}

fn load_config(path: Option<&Path>, base_url: Option<String>) -> Result<Config> {
  match (Config::load(path), base_url) {
    (Ok(config), None) => Ok(config),
    (Ok(mut config), Some(url)) => {
      config.api.base_url = url;
      Ok(config)
    }
    // No config file is fine when the URL is given on the command line.
    (Err(_), Some(url)) if path.is_none() => {
      let config = Config::with_base_url(url);
      url::Url::parse(&config.api.base_url)
        .map_err(|e| eyre!("Invalid --base-url {:?}: {}", config.api.base_url, e))?;
      Ok(config)
    }
    (Err(e), _) => Err(e),
  }
}

fn init_tracing(logging: &LoggingConfig) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&logging.level))
    .map_err(|e| eyre!("Invalid log level {:?}: {}", logging.level, e))?;

  let (writer, guard) = match logging.file_path() {
    Some(path) => {
      let dir = path.parent().unwrap_or_else(|| Path::new("."));
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name))
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(logging.file.is_none())
    .init();

  Ok(guard)
}

fn list_resources(prefix: &str) {
  for res in get_suggestions(prefix) {
    let name = if res.takes_id {
      format!("{}:<id>", res.name)
    } else {
      res.name.to_string()
    };
    println!("{:<20} {:<24} {}", name, res.aliases.join(", "), res.description);
  }
}

async fn get(client: &CachedApiClient, resource: &str) -> Result<()> {
  let key = commands::parse_resource(resource)?;
  let data = client.fetch(&key).await?;
  println!("{}", serde_json::to_string_pretty(&*data)?);
  Ok(())
}

fn state_line(key: &ApiQueryKey, state: &QueryResult) -> Value {
  json!({
    "resource": key.to_string(),
    "status": format!("{:?}", state.status()).to_lowercase(),
    "fetching": state.is_fetching,
    "updated_at": state.updated_at,
    "error": state.error.as_ref().map(ToString::to_string),
    "data": state.data(),
  })
}

async fn watch(
  client: &CachedApiClient,
  resource: &str,
  interval_secs: u64,
  count: Option<usize>,
) -> Result<()> {
  let key = commands::parse_resource(resource)?;
  let mut subscription = client.watch(&key)?;
  println!("{}", state_line(&key, &subscription.current()));

  let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
  // First tick fires immediately
  ticker.tick().await;

  let mut completed = 0;
  loop {
    tokio::select! {
      changed = subscription.changed() => {
        let Some(state) = changed else { break };
        println!("{}", state_line(&key, &state));
        if !state.is_fetching {
          completed += 1;
          if count.is_some_and(|limit| completed >= limit) {
            break;
          }
        }
      }
      _ = ticker.tick() => {
        client.cache().invalidate_prefix(subscription.key());
      }
      _ = tokio::signal::ctrl_c() => break,
    }
  }

  info!(resource = %key, "Stopped watching");
  Ok(())
}

async fn read_file_part(arg: &str) -> Result<FilePart> {
  let (field, path) = arg
    .split_once('=')
    .ok_or_else(|| eyre!("Expected FIELD=PATH, got {:?}", arg))?;
  let path = Path::new(path);
  let bytes = tokio::fs::read(path)
    .await
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "upload".to_string());
  Ok(FilePart::new(field, file_name, bytes))
}

async fn mutate(
  client: &CachedApiClient,
  name: &str,
  body: Option<String>,
  files: Vec<String>,
) -> Result<()> {
  let body = body
    .map(|raw| serde_json::from_str::<Value>(&raw))
    .transpose()
    .map_err(|e| eyre!("--body is not valid JSON: {}", e))?;

  let mut parts = Vec::with_capacity(files.len());
  for arg in &files {
    parts.push(read_file_part(arg).await?);
  }

  let response = client.run_named(name, body, parts).await?;
  println!("{}", serde_json::to_string_pretty(&response)?);
  Ok(())
}
