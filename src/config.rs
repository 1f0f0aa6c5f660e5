//! Backend configuration, loaded once at process start.
//!
//! The endpoint comes from a yaml file, the credential from the environment;
//! both are handed to [`RestDataSource`](crate::source::RestDataSource)
//! explicitly rather than read from ambient globals, so tests can inject a
//! double instead.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Base URL of the hosted backend, e.g. `https://xyzcompany.supabase.co`.
  pub url: String,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./revboard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/revboard/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.display().to_string()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(ConfigError::NotFound(
        "no revboard.yaml in the current directory or ~/.config/revboard/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("revboard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("revboard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
      path: path.display().to_string(),
      source: e,
    })?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
      path: path.display().to_string(),
      source: e,
    })
  }

  /// The backend base URL, validated.
  pub fn backend_url(&self) -> Result<Url, ConfigError> {
    Url::parse(&self.backend.url).map_err(|e| ConfigError::InvalidUrl {
      url: self.backend.url.clone(),
      source: e,
    })
  }

  /// The backend API key from the REVBOARD_API_KEY environment variable.
  pub fn get_api_key() -> Result<String, ConfigError> {
    std::env::var("REVBOARD_API_KEY").map_err(|_| ConfigError::MissingApiKey)
  }
}
