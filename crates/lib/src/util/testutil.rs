//! Test doubles shared by the crate's unit tests.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use md5::{Digest, Md5};

use crate::buildinfo::{BuildInfo, BuildRetention};
use crate::client::{
  BuildPatternArtifacts, BuildPatternRequest, ClientError, DistributionClient, PatternSearchResult, RemoteChecksums,
  RepositoryClient, ServiceResponse,
};
use crate::deploy::{DeployDetail, Properties};
use crate::promote::PromotionRequest;
use crate::promote::distribution::{DeleteBundleRequest, DistributionRequest};
use crate::util::hash::sha1_bytes;

#[derive(Default)]
struct FakeState {
  uploaded: Vec<String>,
  stored: BTreeSet<String>,
  upload_properties: HashMap<String, Properties>,
  failing_uploads: HashSet<String>,
  files: HashMap<String, Vec<u8>>,
  failing_downloads: HashSet<String>,
  downloads: usize,
  checksum_calls: usize,
  searches: HashMap<String, PatternSearchResult>,
  search_calls: usize,
  build_patterns: Vec<BuildPatternArtifacts>,
  published: Vec<BuildInfo>,
  promotion_responses: VecDeque<ServiceResponse>,
  promotion_dry_runs: Vec<bool>,
  distribution_responses: VecDeque<ServiceResponse>,
  distribution_dry_runs: Vec<bool>,
  calls: Vec<String>,
}

/// Repository double backed by in-memory maps. Base URL is `http://fake`.
#[derive(Default)]
pub struct FakeRepository {
  state: Mutex<FakeState>,
}

impl FakeRepository {
  fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
    self.state.lock().unwrap()
  }

  /// `repo/path` of every successful upload, in call order.
  pub fn uploaded_paths(&self) -> Vec<String> {
    self.state().uploaded.clone()
  }

  /// Properties sent with the last upload of `artifact_path`.
  pub fn uploaded_properties(&self, artifact_path: &str) -> Option<Properties> {
    self.state().upload_properties.get(artifact_path).cloned()
  }

  /// Distinct files held by the repository.
  pub fn stored_artifact_count(&self) -> usize {
    self.state().stored.len()
  }

  pub fn fail_upload(&self, artifact_path: &str) {
    self.state().failing_uploads.insert(artifact_path.to_string());
  }

  pub fn add_file(&self, url: &str, content: &[u8]) {
    self.state().files.insert(url.to_string(), content.to_vec());
  }

  /// Downloads of `url` write a partial file and then fail in transport.
  pub fn fail_download(&self, url: &str) {
    self.state().failing_downloads.insert(url.to_string());
  }

  pub fn download_count(&self) -> usize {
    self.state().downloads
  }

  pub fn checksum_count(&self) -> usize {
    self.state().checksum_calls
  }

  pub fn add_search_result(&self, pattern: &str, result: PatternSearchResult) {
    self.state().searches.insert(pattern.to_string(), result);
  }

  pub fn search_count(&self) -> usize {
    self.state().search_calls
  }

  pub fn set_build_pattern_artifacts(&self, artifacts: Vec<BuildPatternArtifacts>) {
    self.state().build_patterns = artifacts;
  }

  pub fn published_builds(&self) -> Vec<BuildInfo> {
    self.state().published.clone()
  }

  pub fn push_promotion_response(&self, response: ServiceResponse) {
    self.state().promotion_responses.push_back(response);
  }

  pub fn promotion_dry_runs(&self) -> Vec<bool> {
    self.state().promotion_dry_runs.clone()
  }

  pub fn push_distribution_response(&self, response: ServiceResponse) {
    self.state().distribution_responses.push_back(response);
  }

  pub fn distribution_dry_runs(&self) -> Vec<bool> {
    self.state().distribution_dry_runs.clone()
  }

  /// Build-info publications and retention runs, in call order.
  pub fn calls(&self) -> Vec<String> {
    self.state().calls.clone()
  }
}

fn ok_response() -> ServiceResponse {
  ServiceResponse::from_body(200, "{}".to_string())
}

#[async_trait]
impl RepositoryClient for FakeRepository {
  fn base_url(&self) -> &str {
    "http://fake"
  }

  async fn upload(&self, detail: &DeployDetail) -> Result<(), ClientError> {
    let mut state = self.state();
    let key = format!("{}/{}", detail.target_repository, detail.artifact_path);
    if state.failing_uploads.contains(&detail.artifact_path) {
      return Err(ClientError::Status {
        url: format!("http://fake/{key}"),
        status: 500,
        body: "upload rejected".to_string(),
      });
    }
    state
      .upload_properties
      .insert(detail.artifact_path.clone(), detail.properties.clone());
    state.stored.insert(key.clone());
    state.uploaded.push(key);
    Ok(())
  }

  async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, ClientError> {
    let (content, fail) = {
      let mut state = self.state();
      state.downloads += 1;
      let content = state.files.get(url).cloned().ok_or_else(|| ClientError::NotFound { url: url.to_string() })?;
      (content, state.failing_downloads.contains(url))
    };
    let io_err = |source| ClientError::Io {
      path: dest.display().to_string(),
      source,
    };
    if let Some(parent) = dest.parent() {
      std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    if fail {
      std::fs::write(dest, &content[..content.len() / 2]).map_err(io_err)?;
      return Err(ClientError::Transport {
        url: url.to_string(),
        message: "connection reset".to_string(),
      });
    }
    std::fs::write(dest, &content).map_err(io_err)?;
    Ok(content.len() as u64)
  }

  async fn checksums(&self, url: &str) -> Result<RemoteChecksums, ClientError> {
    let mut state = self.state();
    state.checksum_calls += 1;
    let content = state.files.get(url).ok_or_else(|| ClientError::NotFound { url: url.to_string() })?;
    Ok(RemoteChecksums {
      md5: Some(hex::encode(Md5::digest(content))),
      sha1: Some(sha1_bytes(content)),
    })
  }

  async fn search_pattern(&self, pattern: &str) -> Result<PatternSearchResult, ClientError> {
    let mut state = self.state();
    state.search_calls += 1;
    state.searches.get(pattern).cloned().ok_or_else(|| ClientError::NotFound {
      url: format!("http://fake/search?pattern={pattern}"),
    })
  }

  async fn build_pattern_artifacts(
    &self,
    _requests: &[BuildPatternRequest],
  ) -> Result<Vec<BuildPatternArtifacts>, ClientError> {
    Ok(self.state().build_patterns.clone())
  }

  async fn publish_build_info(&self, build_info: &BuildInfo) -> Result<(), ClientError> {
    let mut state = self.state();
    state.calls.push(format!("publish {}/{}", build_info.name, build_info.number));
    state.published.push(build_info.clone());
    Ok(())
  }

  async fn apply_retention(&self, build_name: &str, _retention: &BuildRetention) -> Result<(), ClientError> {
    self.state().calls.push(format!("retention {build_name}"));
    Ok(())
  }

  async fn promote(
    &self,
    _build_name: &str,
    _build_number: &str,
    request: &PromotionRequest,
  ) -> Result<ServiceResponse, ClientError> {
    let mut state = self.state();
    state.promotion_dry_runs.push(request.dry_run);
    Ok(state.promotion_responses.pop_front().unwrap_or_else(ok_response))
  }
}

#[async_trait]
impl DistributionClient for FakeRepository {
  async fn distribute(
    &self,
    _bundle: &str,
    _version: &str,
    request: &DistributionRequest,
  ) -> Result<ServiceResponse, ClientError> {
    let mut state = self.state();
    state.distribution_dry_runs.push(request.dry_run);
    Ok(state.distribution_responses.pop_front().unwrap_or_else(ok_response))
  }

  async fn delete_bundle(
    &self,
    _bundle: &str,
    _version: &str,
    request: &DeleteBundleRequest,
  ) -> Result<ServiceResponse, ClientError> {
    let mut state = self.state();
    state.distribution_dry_runs.push(request.dry_run);
    Ok(state.distribution_responses.pop_front().unwrap_or_else(ok_response))
  }
}

