use chrono::Duration as ChronoDuration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CachePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// API root, e.g. "https://kebun.example.com/api"
  pub url: String,
  /// Per-request timeout; the only timeout the engine applies
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_stale_after_secs")]
  pub stale_after_secs: i64,
  #[serde(default = "default_expire_after_secs")]
  pub expire_after_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Pause after reconnecting before replaying the queue
  #[serde(default = "default_settle_delay_ms")]
  pub settle_delay_ms: u64,
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
  /// Path probed to decide whether the server is reachable
  #[serde(default = "default_probe_path")]
  pub probe_path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file; defaults to $XDG_DATA_HOME/kebun-sync/offline.db
  pub path: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_stale_after_secs() -> i64 {
  60
}

fn default_expire_after_secs() -> i64 {
  3600
}

fn default_settle_delay_ms() -> u64 {
  2000
}

fn default_probe_interval_secs() -> u64 {
  15
}

fn default_probe_path() -> String {
  "/".to_string()
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after_secs: default_stale_after_secs(),
      expire_after_secs: default_expire_after_secs(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      settle_delay_ms: default_settle_delay_ms(),
      probe_interval_secs: default_probe_interval_secs(),
      probe_path: default_probe_path(),
    }
  }
}

impl CacheConfig {
  pub fn policy(&self) -> CachePolicy {
    CachePolicy {
      stale_after: ChronoDuration::seconds(self.stale_after_secs),
      expire_after: ChronoDuration::seconds(self.expire_after_secs),
    }
  }
}

impl SyncConfig {
  pub fn settle_delay(&self) -> Duration {
    Duration::from_millis(self.settle_delay_ms)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs)
  }
}

impl ServerConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kebun-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kebun-sync/config.yaml
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
        "No configuration file found. Create one at ~/.config/kebun-sync/config.yaml\n\
                 with at least `server: {{ url: https://... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kebun-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kebun-sync").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.stale_after_secs > config.cache.expire_after_secs {
      return Err(eyre!("cache.stale_after_secs must not exceed cache.expire_after_secs"));
    }
    Ok(config)
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks KEBUN_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("KEBUN_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
