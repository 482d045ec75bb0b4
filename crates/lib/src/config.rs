//! Engine configuration.
//!
//! Loaded from TOML (`$XDG_CONFIG_HOME/shipyard/config.toml` by default) with
//! `SHIPYARD_*` environment overrides for the server connection.
//!
//! ```toml
//! [server]
//! url = "https://repo.example.com/artifactory"
//! access_token = "..."
//!
//! [deploy]
//! repository = "libs-release-local"
//! pattern = "build/*.jar => release/"
//! threads = 4
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{AGENT_CALL_TIMEOUT, DEFAULT_DEPLOY_THREADS, DEFAULT_ENV_EXCLUDES, IMAGE_MAX_AGE};
use crate::paths::config_file;

pub const ENV_URL: &str = "SHIPYARD_URL";
pub const ENV_USER: &str = "SHIPYARD_USER";
pub const ENV_PASSWORD: &str = "SHIPYARD_PASSWORD";
pub const ENV_ACCESS_TOKEN: &str = "SHIPYARD_ACCESS_TOKEN";
pub const ENV_DIST_URL: &str = "SHIPYARD_DIST_URL";

/// Configuration problems. All are raised before any network call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("no server URL configured (set [server].url or {ENV_URL})")]
  MissingServerUrl,

  #[error("invalid URL {url}: {message}")]
  InvalidUrl { url: String, message: String },

  #[error("deploy threads must be at least 1")]
  ZeroThreads,

  #[error("missing required argument: {0}")]
  MissingArgument(String),

  #[error("argument '{key}' is not allowed here (allowed: {allowed})")]
  DisallowedArgument { key: String, allowed: String },

  #[error("invalid value for '{key}': {value}")]
  InvalidArgument { key: String, value: String },

  #[error("conflicting arguments: {0}")]
  Conflict(String),
}

/// Connection settings for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
  pub url: String,
  pub user: Option<String>,
  pub password: Option<String>,
  pub access_token: Option<String>,
  /// Per-request timeout.
  pub timeout_secs: u64,
  /// Retries for connection failures. HTTP error statuses are never retried.
  pub max_retries: u32,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: String::new(),
      user: None,
      password: None,
      access_token: None,
      timeout_secs: 300,
      max_retries: 3,
    }
  }
}

impl ServerConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  /// Check that the URL is present and parses as http(s).
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.url.trim().is_empty() {
      return Err(ConfigError::MissingServerUrl);
    }
    let parsed = url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
      url: self.url.clone(),
      message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
      return Err(ConfigError::InvalidUrl {
        url: self.url.clone(),
        message: format!("unsupported scheme '{}'", parsed.scheme()),
      });
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
  pub repository: String,
  pub pattern: String,
  pub matrix_params: String,
  pub threads: usize,
  pub override_deployer: bool,
}

impl Default for DeployConfig {
  fn default() -> Self {
    Self {
      repository: String::new(),
      pattern: String::new(),
      matrix_params: String::new(),
      threads: DEFAULT_DEPLOY_THREADS,
      override_deployer: false,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolveConfig {
  pub pattern: String,
  pub flat: bool,
}

/// Environment capture filter, as comma-separated wildcard lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvConfig {
  pub capture: bool,
  pub include: String,
  pub exclude: String,
}

impl Default for EnvConfig {
  fn default() -> Self {
    Self {
      capture: false,
      include: "*".to_string(),
      exclude: DEFAULT_ENV_EXCLUDES.join(","),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DockerConfig {
  pub image_ttl_secs: u64,
  pub agent_timeout_secs: u64,
}

impl Default for DockerConfig {
  fn default() -> Self {
    Self {
      image_ttl_secs: IMAGE_MAX_AGE.as_secs(),
      agent_timeout_secs: AGENT_CALL_TIMEOUT.as_secs(),
    }
  }
}

impl DockerConfig {
  pub fn image_ttl(&self) -> Duration {
    Duration::from_secs(self.image_ttl_secs)
  }

  pub fn agent_timeout(&self) -> Duration {
    Duration::from_secs(self.agent_timeout_secs)
  }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  pub server: ServerConfig,
  pub distribution: Option<ServerConfig>,
  pub deploy: DeployConfig,
  pub resolve: ResolveConfig,
  pub env: EnvConfig,
  pub docker: DockerConfig,
}

impl Config {
  /// Load configuration and apply environment overrides.
  ///
  /// An explicit `path` must exist. Without one, the default location is used
  /// and a missing file yields the defaults.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None => {
        let default_path = config_file();
        if default_path.exists() {
          Self::from_file(&default_path)?
        } else {
          debug!(path = ?default_path, "no config file, using defaults");
          Self::default()
        }
      }
    };
    config.apply_env();
    Ok(config)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  /// Overlay `SHIPYARD_*` variables onto the loaded file.
  pub fn apply_env(&mut self) {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    if let Some(url) = var(ENV_URL) {
      self.server.url = url;
    }
    if let Some(user) = var(ENV_USER) {
      self.server.user = Some(user);
    }
    if let Some(password) = var(ENV_PASSWORD) {
      self.server.password = Some(password);
    }
    if let Some(token) = var(ENV_ACCESS_TOKEN) {
      self.server.access_token = Some(token);
    }
    if let Some(url) = var(ENV_DIST_URL) {
      let mut dist = self.distribution.clone().unwrap_or_else(|| ServerConfig {
        user: self.server.user.clone(),
        password: self.server.password.clone(),
        access_token: self.server.access_token.clone(),
        ..ServerConfig::default()
      });
      dist.url = url;
      self.distribution = Some(dist);
    }
  }

  /// Check everything a repository operation relies on.
  pub fn validate(&self) -> Result<(), ConfigError> {
    self.server.validate()?;
    if let Some(dist) = &self.distribution {
      dist.validate()?;
    }
    if self.deploy.threads == 0 {
      return Err(ConfigError::ZeroThreads);
    }
    Ok(())
  }

  /// The distribution service settings, required for bundle operations.
  pub fn distribution_server(&self) -> Result<&ServerConfig, ConfigError> {
    let dist = self.distribution.as_ref().ok_or(ConfigError::MissingServerUrl)?;
    dist.validate()?;
    Ok(dist)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::tempdir;

  const SAMPLE: &str = r#"
[server]
url = "https://repo.example.com/artifactory"
user = "ci"
max_retries = 5

[deploy]
repository = "libs-release-local"
pattern = "build/*.jar => release/"
threads = 4

[env]
capture = true
"#;

  #[test]
  fn parses_sections_with_defaults() {
    let config = Config::parse(SAMPLE).unwrap();
    assert_eq!(config.server.url, "https://repo.example.com/artifactory");
    assert_eq!(config.server.max_retries, 5);
    assert_eq!(config.server.timeout_secs, 300);
    assert_eq!(config.deploy.threads, 4);
    assert!(config.env.capture);
    assert!(config.env.exclude.contains("*password*"));
    assert_eq!(config.docker.image_ttl_secs, 12 * 60 * 60);
    assert!(config.distribution.is_none());
  }

  #[test]
  fn unknown_keys_are_rejected() {
    assert!(Config::parse("[server]\nurll = \"x\"").is_err());
  }

  #[test]
  fn validate_requires_server_url() {
    let config = Config::default();
    assert!(matches!(config.validate(), Err(ConfigError::MissingServerUrl)));
  }

  #[test]
  fn validate_rejects_bad_urls_and_zero_threads() {
    let mut config = Config::parse(SAMPLE).unwrap();
    config.server.url = "ftp://host".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));

    config.server.url = "http://host".to_string();
    config.deploy.threads = 0;
    assert!(matches!(config.validate(), Err(ConfigError::ZeroThreads)));
  }

  #[test]
  fn explicit_missing_file_is_an_error() {
    let temp = tempdir().unwrap();
    let result = Config::load(Some(&temp.path().join("nope.toml")));
    assert!(matches!(result, Err(ConfigError::Read { .. })));
  }

  #[test]
  #[serial]
  fn env_overrides_file_values() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, SAMPLE).unwrap();

    temp_env::with_vars(
      [
        (ENV_URL, Some("http://override:8081/artifactory")),
        (ENV_ACCESS_TOKEN, Some("tok")),
        (ENV_DIST_URL, Some("http://dist:8082")),
        (ENV_USER, None),
        (ENV_PASSWORD, None),
      ],
      || {
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.url, "http://override:8081/artifactory");
        assert_eq!(config.server.access_token.as_deref(), Some("tok"));
        assert_eq!(config.server.user.as_deref(), Some("ci"));
        let dist = config.distribution_server().unwrap();
        assert_eq!(dist.url, "http://dist:8082");
        assert_eq!(dist.access_token.as_deref(), Some("tok"));
      },
    );
  }

  #[test]
  #[serial]
  #[cfg(not(windows))]
  fn missing_default_file_yields_defaults() {
    let temp = tempdir().unwrap();
    temp_env::with_vars(
      [
        ("XDG_CONFIG_HOME", Some(temp.path().to_str().unwrap())),
        (ENV_URL, None),
        (ENV_DIST_URL, None),
        (ENV_USER, None),
        (ENV_PASSWORD, None),
        (ENV_ACCESS_TOKEN, None),
      ],
      || {
        let config = Config::load(None).unwrap();
        assert_eq!(config, Config::default());
      },
    );
  }
}
