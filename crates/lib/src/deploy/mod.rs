//! Artifact deployment.
//!
//! - [`detail`]: turning resolved files into [`DeployDetail`]s
//! - [`ArtifactDeployer`]: uploading a detail set and recording what the
//!   repository acknowledged
//!
//! Uploads run in repository-key order when single-threaded. With more than one
//! thread they fan out over a bounded worker pool and complete in any order;
//! the returned artifact list is always in key order.

pub mod detail;

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

pub use detail::{BuildProperties, DeployDetail, DeployDetailBuilder, DetailError, Properties, parse_matrix_params};

use crate::buildinfo::{Artifact, DeployableArtifact};
use crate::client::{ClientError, RepositoryClient};

/// Errors that abort a deploy batch.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
  #[error("failed to upload {repository}/{path}: {source}")]
  Upload {
    repository: String,
    path: String,
    #[source]
    source: ClientError,
  },

  #[error("upload worker failed: {0}")]
  Worker(String),
}

/// Artifact type derived from the file extension.
pub fn artifact_type(file_name: &str) -> String {
  match file_name.rsplit_once('.') {
    Some((stem, ext)) if !stem.is_empty() => ext.to_string(),
    _ => String::new(),
  }
}

impl From<&DeployDetail> for Artifact {
  fn from(detail: &DeployDetail) -> Self {
    let name = detail.file_name().to_string();
    Artifact {
      artifact_type: artifact_type(&name),
      name,
      md5: Some(detail.md5.clone()),
      sha1: Some(detail.sha1.clone()),
      sha256: Some(detail.sha256.clone()).filter(|s| !s.is_empty()),
      path: Some(format!("{}/{}", detail.target_repository, detail.artifact_path)),
    }
  }
}

impl From<&DeployDetail> for DeployableArtifact {
  fn from(detail: &DeployDetail) -> Self {
    DeployableArtifact {
      local_path: detail.source_file.to_string_lossy().into_owned(),
      remote_path: detail.artifact_path.clone(),
      target_repository: detail.target_repository.clone(),
      md5: detail.md5.clone(),
      sha1: detail.sha1.clone(),
    }
  }
}

/// Uploads deploy details through a [`RepositoryClient`].
#[derive(Clone)]
pub struct ArtifactDeployer {
  client: Arc<dyn RepositoryClient>,
  threads: usize,
}

impl ArtifactDeployer {
  pub fn new(client: Arc<dyn RepositoryClient>) -> Self {
    Self { client, threads: 1 }
  }

  /// Number of parallel uploads (values below 1 mean 1).
  pub fn with_threads(mut self, threads: usize) -> Self {
    self.threads = threads.max(1);
    self
  }

  /// Upload every detail and return the acknowledged artifacts in key order.
  ///
  /// The first failed upload aborts the batch. Files already acknowledged stay
  /// in the repository.
  pub async fn deploy(&self, details: &BTreeSet<DeployDetail>) -> Result<Vec<Artifact>, DeployError> {
    info!(count = details.len(), threads = self.threads, "deploying artifacts");
    if self.threads <= 1 {
      self.deploy_sequential(details).await
    } else {
      self.deploy_parallel(details).await
    }
  }

  async fn deploy_sequential(&self, details: &BTreeSet<DeployDetail>) -> Result<Vec<Artifact>, DeployError> {
    let mut artifacts = Vec::with_capacity(details.len());
    for detail in details {
      upload_one(self.client.as_ref(), detail).await?;
      artifacts.push(Artifact::from(detail));
    }
    Ok(artifacts)
  }

  async fn deploy_parallel(&self, details: &BTreeSet<DeployDetail>) -> Result<Vec<Artifact>, DeployError> {
    let semaphore = Arc::new(Semaphore::new(self.threads));
    let mut join_set = JoinSet::new();

    for (index, detail) in details.iter().enumerate() {
      let detail = detail.clone();
      let client = self.client.clone();
      let semaphore = semaphore.clone();

      join_set.spawn(async move {
        let _permit = semaphore
          .acquire_owned()
          .await
          .map_err(|e| DeployError::Worker(e.to_string()))?;
        upload_one(client.as_ref(), &detail).await?;
        Ok::<_, DeployError>((index, Artifact::from(&detail)))
      });
    }

    let mut done = Vec::with_capacity(details.len());
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok(Ok(entry)) => done.push(entry),
        Ok(Err(e)) => {
          join_set.abort_all();
          return Err(e);
        }
        Err(e) => {
          join_set.abort_all();
          return Err(DeployError::Worker(e.to_string()));
        }
      }
    }

    done.sort_by_key(|(index, _)| *index);
    Ok(done.into_iter().map(|(_, artifact)| artifact).collect())
  }
}

async fn upload_one(client: &dyn RepositoryClient, detail: &DeployDetail) -> Result<(), DeployError> {
  debug!(repo = %detail.target_repository, path = %detail.artifact_path, "uploading artifact");
  client.upload(detail).await.map_err(|source| DeployError::Upload {
    repository: detail.target_repository.clone(),
    path: detail.artifact_path.clone(),
    source,
  })?;
  info!(repo = %detail.target_repository, path = %detail.artifact_path, "deployed artifact");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::FakeRepository;
  use std::path::PathBuf;

  fn detail(repo: &str, path: &str) -> DeployDetail {
    DeployDetail {
      source_file: PathBuf::from(format!("/ws/{path}")),
      artifact_path: path.to_string(),
      target_repository: repo.to_string(),
      md5: format!("md5-{path}"),
      sha1: format!("sha1-{path}"),
      sha256: String::new(),
      properties: Properties::new(),
    }
  }

  fn details() -> BTreeSet<DeployDetail> {
    ["release/c.zip", "release/a.jar", "release/b.jar"]
      .into_iter()
      .map(|p| detail("libs", p))
      .collect()
  }

  #[test]
  fn artifact_type_from_extension() {
    assert_eq!(artifact_type("a.jar"), "jar");
    assert_eq!(artifact_type("app.tar.gz"), "gz");
    assert_eq!(artifact_type("README"), "");
    assert_eq!(artifact_type(".hidden"), "");
  }

  #[tokio::test]
  async fn sequential_deploy_in_key_order() {
    let repo = Arc::new(FakeRepository::default());
    let artifacts = ArtifactDeployer::new(repo.clone()).deploy(&details()).await.unwrap();

    let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["a.jar", "b.jar", "c.zip"]);
    assert_eq!(artifacts[0].artifact_type, "jar");
    assert_eq!(artifacts[0].path.as_deref(), Some("libs/release/a.jar"));
    assert_eq!(
      repo.uploaded_paths(),
      vec!["libs/release/a.jar", "libs/release/b.jar", "libs/release/c.zip"]
    );
  }

  #[tokio::test]
  async fn parallel_deploy_returns_all_in_key_order() {
    let repo = Arc::new(FakeRepository::default());
    let artifacts = ArtifactDeployer::new(repo.clone())
      .with_threads(3)
      .deploy(&details())
      .await
      .unwrap();

    let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["a.jar", "b.jar", "c.zip"]);
    assert_eq!(repo.uploaded_paths().len(), 3);
  }

  #[tokio::test]
  async fn upload_failure_aborts_batch() {
    let repo = Arc::new(FakeRepository::default());
    repo.fail_upload("release/b.jar");

    let err = ArtifactDeployer::new(repo.clone()).deploy(&details()).await.unwrap_err();
    assert!(matches!(err, DeployError::Upload { ref path, .. } if path == "release/b.jar"));
    assert_eq!(repo.uploaded_paths(), vec!["libs/release/a.jar"]);
  }

  #[tokio::test]
  async fn redeploying_same_set_keeps_cardinality() {
    let repo = Arc::new(FakeRepository::default());
    let deployer = ArtifactDeployer::new(repo.clone());
    deployer.deploy(&details()).await.unwrap();
    deployer.deploy(&details()).await.unwrap();
    assert_eq!(repo.stored_artifact_count(), 3);
  }
}
