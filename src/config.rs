use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::store::SqliteStore;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the relay sits in front of (e.g. https://app.fatslim.fr)
  pub origin: Url,
  /// Version tag naming the current store generation
  #[serde(default = "default_version")]
  pub version: String,
  /// Paths under this prefix are API calls and are never stored
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Paths stored into a new generation at setup
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_precache() -> Vec<String> {
  vec![
    "/".to_string(),
    "/index.html".to_string(),
    "/manifest.json".to_string(),
  ]
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// SQLite file (defaults to $XDG_DATA_HOME/fatslim-relay/store.db)
  pub path: Option<PathBuf>,
  /// Keep everything in memory; nothing survives the process
  #[serde(default)]
  pub ephemeral: bool,
}

impl StoreConfig {
  pub fn resolved_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStore::default_path().ok_or_else(|| eyre!("Could not determine data directory")),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_listen")]
  pub listen: SocketAddr,
}

fn default_listen() -> SocketAddr {
  SocketAddr::from(([127, 0, 0, 1], 8787))
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: default_listen(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub default_title: String,
  pub default_body: String,
  pub icon: Option<String>,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      default_title: "Fat & Slim".to_string(),
      default_body: "Vous avez une nouvelle notification".to_string(),
      icon: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter used when RUST_LOG is unset
  pub level: String,
  /// Also write daily-rolling log files here
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fatslim-relay.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fatslim-relay/config.yaml
  ///
  /// When no file exists at all and `origin` is given, every other setting takes its default.
  /// A file that exists but does not parse is always an error.
  pub fn load_or_origin(explicit_path: Option<&Path>, origin: Option<&Url>) -> Result<Self> {
    match (Self::locate(explicit_path)?, origin) {
      (Some(path), _) => Self::load_from_path(&path),
      (None, Some(origin)) => Ok(Self::for_origin(origin.clone())),
      (None, None) => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fatslim-relay/config.yaml\n\
                 or pass --config. At minimum it needs an `origin:` URL."
      )),
    }
  }

  fn locate(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
    match explicit_path {
      Some(p) if p.exists() => Ok(Some(p.to_path_buf())),
      Some(p) => Err(eyre!("Config file not found: {}", p.display())),
      None => Ok(Self::find_config_file()),
    }
  }

  /// Configuration with every default and the given origin.
  pub fn for_origin(origin: Url) -> Self {
    Self {
      origin,
      version: default_version(),
      api_prefix: default_api_prefix(),
      precache: default_precache(),
      store: StoreConfig::default(),
      server: ServerConfig::default(),
      notifications: NotificationsConfig::default(),
      logging: LoggingConfig::default(),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fatslim-relay.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fatslim-relay").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("`version` must not be empty"));
    }
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!("`api_prefix` must start with '/': {}", self.api_prefix));
    }
    if self.origin.cannot_be_a_base() {
      return Err(eyre!("`origin` must be an http(s) URL: {}", self.origin));
    }
    Ok(())
  }
}
