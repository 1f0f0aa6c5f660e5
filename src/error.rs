//! Error types for remote fetches and configuration loading.

use thiserror::Error;

/// A failed fetch, as reported by the backend collaborator or detected at the
/// response boundary.
///
/// The cache stores a settled error and fans it out to every subscriber of the
/// key, so the type is `Clone` and comparable. No variant is fatal to the
/// cache: failures are isolated per query key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// Transport-level failure: connection refused, DNS, TLS, timeout.
  #[error("network error: {0}")]
  Network(String),

  /// The backend rejected our credentials (HTTP 401/403).
  #[error("{0}")]
  Auth(String),

  /// The backend reported a query or remote-procedure failure.
  #[error("remote error: {0}")]
  Rpc(String),

  /// The response arrived but did not match the expected row schema.
  #[error("invalid row: {0}")]
  Validation(String),
}

impl FetchError {
  /// The human-readable message, without the variant prefix.
  pub fn message(&self) -> &str {
    match self {
      Self::Network(m) | Self::Auth(m) | Self::Rpc(m) | Self::Validation(m) => m,
    }
  }
}

impl From<serde_json::Error> for FetchError {
  fn from(e: serde_json::Error) -> Self {
    FetchError::Validation(e.to_string())
  }
}

/// Errors raised while loading the backend configuration at process start.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(String),

  #[error("failed to read config file {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid backend url {url}: {source}")]
  InvalidUrl {
    url: String,
    #[source]
    source: url::ParseError,
  },

  #[error("API key not found. Set the REVBOARD_API_KEY environment variable.")]
  MissingApiKey,
}
