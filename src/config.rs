use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_ENDPOINT: &str = "https://randomuser.me/api/";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Random-user service endpoint
  pub endpoint: String,
  /// Number of users requested per sync
  pub results: u32,
  pub request_timeout_secs: u64,
  /// Where the database and thumbnails live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      endpoint: DEFAULT_ENDPOINT.to_string(),
      results: 30,
      request_timeout_secs: 30,
      data_dir: None,
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is unset (e.g. "info", "abook=debug")
  pub level: String,
  /// Write daily log files here instead of stderr
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./abook.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/abook/config.yaml
  ///
  /// Without a file, defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("abook.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("abook").join("config.yaml");
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
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.results == 0 {
      return Err(eyre!("results must be at least 1"));
    }
    config.endpoint_url()?;
    Ok(config)
  }

  pub fn endpoint_url(&self) -> Result<Url> {
    Url::parse(&self.endpoint).map_err(|e| eyre!("Invalid endpoint {}: {}", self.endpoint, e))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("abook"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("contacts.db"))
  }

  pub fn thumbnail_dir(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("thumbnails"))
  }
}
