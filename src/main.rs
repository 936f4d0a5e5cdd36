mod classify;
mod config;
mod control;
mod error;
mod lifecycle;
mod logging;
mod network;
mod notify;
mod relay;
mod request;
mod response;
mod server;
mod store;
mod strategy;
mod tasks;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use config::Config;
use network::HttpNetwork;
use notify::LogNotificationHost;
use relay::Relay;
use request::InterceptedRequest;
use store::{ContentStore, MemoryStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "fatslim-relay")]
#[command(about = "Offline-capable caching relay in front of the Fat & Slim web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fatslim-relay/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin to relay, overriding the config file
  #[arg(long, global = true)]
  origin: Option<Url>,

  /// Version tag naming the store generation, overriding the config file
  #[arg(long, global = true)]
  version_tag: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current generation, then proxy HTTP traffic through the relay
  Serve {
    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,
  },
  /// Precache the current generation
  Install,
  /// Make the current generation active and delete the others
  Activate,
  /// Fetch one path through the relay and print the response body
  Fetch {
    /// Path (and query) under the origin, e.g. /static/js/main.js
    path: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Extra request header as `Name: value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Send a control message (skipWaiting or clearCache)
  Message { message: String },
  /// Simulate a push with an optional JSON payload
  Push { payload: Option<String> },
  /// List store generations and their entry counts
  Generations,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = load_config(&args)?;

  let _log_guard = logging::init(&config.logging)?;

  let store = open_store(&config)?;
  let network = HttpNetwork::new()?;
  let relay = Arc::new(Relay::new(
    &config,
    store,
    Arc::new(network),
    Arc::new(LogNotificationHost),
  ));

  match args.command {
    Command::Serve { listen } => {
      let (report, _) = relay.on_install().await?;
      if !report.failed.is_empty() {
        warn!(failed = report.failed.len(), "Some assets could not be precached");
      }
      let addr = listen.unwrap_or(config.server.listen);
      server::serve(Arc::clone(&relay), addr).await?;
    }
    Command::Install => {
      let (report, activation) = relay.on_install().await?;
      println!("generation {}", report.generation);
      for path in &report.cached {
        println!("  cached   {}", path);
      }
      for path in &report.skipped {
        println!("  skipped  {}", path);
      }
      for (path, reason) in &report.failed {
        println!("  failed   {} ({})", path, reason);
      }
      if let Some(activation) = activation {
        for name in &activation.retired {
          println!("retired {}", name);
        }
      }
    }
    Command::Activate => {
      let report = relay.on_activate().await;
      println!("active {}", report.active);
      for name in &report.retired {
        println!("retired {}", name);
      }
      for (name, reason) in &report.failed {
        println!("failed to retire {} ({})", name, reason);
      }
    }
    Command::Fetch {
      path,
      method,
      navigate,
      headers,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let url = relay.resolve(&path)?;
      let mut request =
        InterceptedRequest::from_parts(method, url, parse_headers(&headers)?, None);
      request.navigate |= navigate;

      let response = relay.on_fetch(request).await?;
      eprintln!("{} ({})", response.status, response.source.as_str());
      if let Some(stored_at) = response.stored_at {
        eprintln!("stored at {}", stored_at.to_rfc3339());
      }
      println!("{}", String::from_utf8_lossy(&response.body));
    }
    Command::Message { message } => {
      relay.on_message(&Value::String(message)).await;
    }
    Command::Push { payload } => {
      let notification = relay.on_push(payload.as_deref().map(str::as_bytes));
      println!("{}", serde_json::to_string_pretty(&notification)?);
    }
    Command::Generations => {
      for name in relay.caches().list_names()? {
        let entries = relay.caches().open(&name)?.identities()?.len();
        println!("{}\t{} entries", name, entries);
      }
    }
  }

  relay.shutdown().await;
  Ok(())
}

/// Load the config file and apply command-line overrides.
fn load_config(args: &Args) -> Result<Config> {
  let mut config = Config::load_or_origin(args.config.as_deref(), args.origin.as_ref())?;
  if let Some(origin) = &args.origin {
    config.origin = origin.clone();
  }
  if let Some(version) = &args.version_tag {
    if version.trim().is_empty() {
      return Err(eyre!("--version-tag must not be empty"));
    }
    config.version = version.clone();
  }
  Ok(config)
}

fn open_store(config: &Config) -> Result<Arc<dyn ContentStore>> {
  if config.store.ephemeral {
    return Ok(Arc::new(MemoryStore::new()));
  }
  let path = config.store.resolved_path()?;
  Ok(Arc::new(SqliteStore::open(&path)?))
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
  let mut headers = HeaderMap::new();
  for header in raw {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Header must look like 'Name: value': {}", header))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
      .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
    let value = HeaderValue::from_str(value.trim())
      .map_err(|e| eyre!("Invalid header value for {}: {}", name, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}
