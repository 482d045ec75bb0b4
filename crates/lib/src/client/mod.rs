//! Repository and distribution service clients.
//!
//! The engine talks to the binary repository only through [`RepositoryClient`]
//! and to the distribution service through [`DistributionClient`]. The HTTP
//! implementations live in [`http`].

pub mod http;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::buildinfo::{BuildInfo, BuildRetention};
use crate::deploy::DeployDetail;
use crate::promote::PromotionRequest;
use crate::promote::distribution::{DeleteBundleRequest, DistributionRequest};

pub use http::{Credentials, HttpDistributionClient, HttpRepositoryClient};

/// Errors raised by repository and distribution calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
  /// The remote resource does not exist (HTTP 404).
  #[error("not found: {url}")]
  NotFound { url: String },

  /// Network-level failure (connect, timeout, broken stream).
  #[error("request to {url} failed: {message}")]
  Transport { url: String, message: String },

  /// The service answered with a non-success status.
  #[error("{url} returned HTTP {status}: {body}")]
  Status { url: String, status: u16, body: String },

  /// Local I/O while streaming a body to or from disk.
  #[error("I/O error for {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  /// A request or response body was not valid JSON for its type.
  #[error("invalid JSON for {url}: {message}")]
  Json { url: String, message: String },

  /// The client could not be constructed.
  #[error("client setup failed: {0}")]
  Setup(String),
}

impl ClientError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, ClientError::NotFound { .. })
  }
}

/// Checksum headers reported by the repository for a stored file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteChecksums {
  pub md5: Option<String>,
  pub sha1: Option<String>,
}

/// Result of a repository-wide pattern search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSearchResult {
  /// Base URI of the repository that holds `files`.
  pub repo_uri: String,
  #[serde(default)]
  pub source_pattern: String,
  /// File paths relative to `repo_uri`.
  #[serde(default)]
  pub files: Vec<String>,
}

/// Query for the artifacts another build recorded under a set of patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPatternRequest {
  pub build_name: String,
  pub build_number: String,
  #[serde(default)]
  pub transitive: bool,
  pub patterns: Vec<PatternEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
  pub pattern: String,
}

/// Artifacts of a referenced build, grouped per requested pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPatternArtifacts {
  pub build_name: String,
  pub build_number: String,
  #[serde(default)]
  pub started: Option<String>,
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub pattern_results: Vec<PatternResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternResult {
  #[serde(default)]
  pub pattern_artifacts: Vec<PatternArtifact>,
}

/// One artifact of a referenced build. `uri` is `repo/path/to/file`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternArtifact {
  pub uri: String,
  #[serde(default)]
  pub size: u64,
  #[serde(default)]
  pub last_modified: Option<String>,
  #[serde(default)]
  pub sha1: Option<String>,
  #[serde(default)]
  pub md5: Option<String>,
}

/// Severity-tagged message in a promotion or distribution response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
  pub level: String,
  pub message: String,
}

/// Status code and messages of a promotion or distribution call.
///
/// Non-success statuses are returned as values so the caller can apply its own
/// acceptance rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceResponse {
  pub status: u16,
  pub messages: Vec<ServiceMessage>,
  pub body: String,
}

#[derive(Deserialize)]
struct MessagesBody {
  #[serde(default)]
  messages: Vec<ServiceMessage>,
}

impl ServiceResponse {
  /// Build a response from a raw body, extracting `messages` when present.
  pub fn from_body(status: u16, body: String) -> Self {
    let messages = serde_json::from_str::<MessagesBody>(&body)
      .map(|b| b.messages)
      .unwrap_or_default();
    Self { status, messages, body }
  }
}

/// Operations the engine needs from the binary repository service.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
  /// Root URL of the service, without a trailing slash.
  fn base_url(&self) -> &str;

  /// Upload one file with its checksums and properties.
  async fn upload(&self, detail: &DeployDetail) -> Result<(), ClientError>;

  /// Stream `url` into `dest`, returning the number of bytes written.
  ///
  /// A 404 yields [`ClientError::NotFound`]. `dest` may be left partially
  /// written on failure; cleanup is the caller's job.
  async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, ClientError>;

  /// Checksum headers for `url` without fetching the body.
  async fn checksums(&self, url: &str) -> Result<RemoteChecksums, ClientError>;

  /// Repository-wide search for `repo:path/pattern`.
  async fn search_pattern(&self, pattern: &str) -> Result<PatternSearchResult, ClientError>;

  /// Artifacts recorded by other builds under the requested patterns.
  async fn build_pattern_artifacts(
    &self,
    requests: &[BuildPatternRequest],
  ) -> Result<Vec<BuildPatternArtifacts>, ClientError>;

  /// Store a build-info manifest.
  async fn publish_build_info(&self, build_info: &BuildInfo) -> Result<(), ClientError>;

  /// Discard old builds of `build_name` according to `retention`.
  async fn apply_retention(&self, build_name: &str, retention: &BuildRetention) -> Result<(), ClientError>;

  /// Promote a published build.
  async fn promote(
    &self,
    build_name: &str,
    build_number: &str,
    request: &PromotionRequest,
  ) -> Result<ServiceResponse, ClientError>;
}

/// Operations against the release-bundle distribution service.
#[async_trait]
pub trait DistributionClient: Send + Sync {
  async fn distribute(
    &self,
    bundle: &str,
    version: &str,
    request: &DistributionRequest,
  ) -> Result<ServiceResponse, ClientError>;

  async fn delete_bundle(
    &self,
    bundle: &str,
    version: &str,
    request: &DeleteBundleRequest,
  ) -> Result<ServiceResponse, ClientError>;
}

/// Join URL fragments with single slashes.
pub fn join_url(base: &str, path: &str) -> String {
  format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
