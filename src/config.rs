use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub firestore: FirestoreConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub gate: GateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreConfig {
  /// Google Cloud project hosting the Firestore database
  #[serde(default)]
  pub project_id: String,
  /// Database id, "(default)" unless a named database is used
  #[serde(default = "default_database")]
  pub database: String,
  /// REST endpoint, overridable for the emulator
  #[serde(default = "default_base_url")]
  pub base_url: String,
}

impl Default for FirestoreConfig {
  fn default() -> Self {
    Self {
      project_id: String::new(),
      database: default_database(),
      base_url: default_base_url(),
    }
  }
}

fn default_database() -> String {
  "(default)".to_string()
}

fn default_base_url() -> String {
  "https://firestore.googleapis.com/v1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// When false every read goes to the remote service
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_plan_ttl_secs")]
  pub plan_ttl_secs: u64,
  #[serde(default = "default_users_total_ttl_secs")]
  pub users_total_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      plan_ttl_secs: default_plan_ttl_secs(),
      users_total_ttl_secs: default_users_total_ttl_secs(),
    }
  }
}

impl CacheConfig {
  pub fn plan_ttl(&self) -> Duration {
    Duration::from_secs(self.plan_ttl_secs)
  }

  pub fn users_total_ttl(&self) -> Duration {
    Duration::from_secs(self.users_total_ttl_secs)
  }
}

fn default_true() -> bool {
  true
}

fn default_plan_ttl_secs() -> u64 {
  60 * 60 // 1 hour
}

fn default_users_total_ttl_secs() -> u64 {
  30 * 24 * 60 * 60 // 30 days
}

/// What the gate does when a remote call fails.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Stay in the loading state forever, like the browser dashboard did
  StayLoading,
  /// Report the failure so the caller can offer a retry
  #[default]
  Surface,
  /// Admit on a stale cached Active plan that has not ended, otherwise report
  FailOpenWithCache,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GateConfig {
  #[serde(default)]
  pub failure_policy: FailurePolicy,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tnker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tnker/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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
    let local = PathBuf::from("tnker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tnker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null, not to an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Get the Firestore bearer token from environment variables.
  ///
  /// Checks TNKER_FIRESTORE_TOKEN first, then FIRESTORE_ID_TOKEN as fallback.
  pub fn get_firestore_token() -> Result<String> {
    std::env::var("TNKER_FIRESTORE_TOKEN")
      .or_else(|_| std::env::var("FIRESTORE_ID_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Firestore token not found. Set TNKER_FIRESTORE_TOKEN or FIRESTORE_ID_TOKEN."
        )
      })
  }

  /// Directory for the cache database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tnker"))
  }
}
