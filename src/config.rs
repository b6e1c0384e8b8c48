use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory name under the platform data/config dirs.
const APP_DIR: &str = "awsearch";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub aws: AwsConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwsConfig {
  /// Named profile from ~/.aws/config (default profile if not set)
  pub profile: Option<String>,
  /// Region to search (falls back to the AWS environment, then us-east-1)
  pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Disable to fetch on every query and persist nothing
  pub enabled: bool,
  /// Override for the cache database location
  pub path: Option<PathBuf>,
  /// Ttl for kinds without an entry in `ttl_secs`
  pub default_ttl_secs: u64,
  /// Per resource kind ttl, keyed by kind name (e.g. "lambda_functions")
  pub ttl_secs: BTreeMap<String, u64>,
  /// Deadline for one complete (all pages) fetch
  pub fetch_timeout_secs: u64,
  /// How long to wait for another process holding the database lock
  pub busy_timeout_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      default_ttl_secs: 300,
      ttl_secs: BTreeMap::new(),
      fetch_timeout_secs: 10,
      busy_timeout_ms: 2_000,
    }
  }
}

impl CacheConfig {
  /// Ttl for `kind`: configured value, else the kind's builtin, else the default.
  pub fn ttl_for(&self, kind: &str, builtin: Option<u64>) -> chrono::Duration {
    let secs = self
      .ttl_secs
      .get(kind)
      .copied()
      .or(builtin)
      .unwrap_or(self.default_ttl_secs);
    seconds(secs)
  }

  pub fn default_ttl(&self) -> chrono::Duration {
    seconds(self.default_ttl_secs)
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }

  pub fn busy_timeout(&self) -> Duration {
    Duration::from_millis(self.busy_timeout_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./awsearch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/awsearch/config.yaml
  ///
  /// Without any file the defaults apply.
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
    let local = PathBuf::from("awsearch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }
}

/// Clamp to what `chrono::Duration` can hold.
fn seconds(secs: u64) -> chrono::Duration {
  chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000))
}

/// Directory for the cache database and logs.
pub fn data_dir() -> Option<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|dir| dir.join(APP_DIR))
}
