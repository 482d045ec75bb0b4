//! Download primitive shared by published and build dependency resolution.
//!
//! Per artifact:
//! 1. With dependency recording on, read the remote checksum headers first and
//!    skip the transfer when the local file already has the same md5 and sha1.
//! 2. Stream the file to `workspace/target/path`.
//! 3. A 404 removes the partial file and logs a warning; the batch continues.
//!    Any other failure removes the partial file and aborts the batch.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info, warn};

use super::{DownloadableArtifact, ResolveError};
use crate::buildinfo::Dependency;
use crate::client::{RemoteChecksums, RepositoryClient};
use crate::deploy::artifact_type;
use crate::util::hash::{FileChecksums, file_checksums};

/// Fetches [`DownloadableArtifact`]s into a workspace.
#[derive(Clone)]
pub struct Downloader {
  client: Arc<dyn RepositoryClient>,
  workspace: PathBuf,
  flat: bool,
  include_dependencies: bool,
}

impl Downloader {
  pub fn new(client: Arc<dyn RepositoryClient>, workspace: PathBuf) -> Self {
    Self {
      client,
      workspace,
      flat: false,
      include_dependencies: false,
    }
  }

  /// Write every file directly into its target directory.
  pub fn with_flat(mut self, flat: bool) -> Self {
    self.flat = flat;
    self
  }

  pub fn with_dependencies(mut self, include: bool) -> Self {
    self.include_dependencies = include;
    self
  }

  /// Download a batch, returning the dependency records (empty unless
  /// dependency recording is on).
  pub async fn download(&self, artifacts: &[DownloadableArtifact]) -> Result<Vec<Dependency>, ResolveError> {
    let mut seen = BTreeSet::new();
    let mut dependencies = Vec::new();
    for artifact in artifacts {
      let relative = artifact.relative_file_path(self.flat)?;
      if !seen.insert((artifact.download_url(), relative.clone())) {
        continue;
      }
      if let Some(dependency) = self.download_one(artifact, &relative).await? {
        dependencies.push(dependency);
      }
    }
    Ok(dependencies)
  }

  async fn download_one(
    &self,
    artifact: &DownloadableArtifact,
    relative: &str,
  ) -> Result<Option<Dependency>, ResolveError> {
    let url = artifact.download_url();
    let dest = self.workspace.join(relative);

    let mut remote = RemoteChecksums::default();
    if self.include_dependencies {
      remote = match self.client.checksums(&url).await {
        Ok(sums) => sums,
        Err(e) if e.is_not_found() => {
          warn!(url = %url, "remote dependency not found, skipping");
          remove_partial(&dest).await?;
          return Ok(None);
        }
        Err(source) => return Err(ResolveError::Download { url, source }),
      };
      if let Some(local) = local_checksums(&dest).await? {
        if local.matches(remote.md5.as_deref(), remote.sha1.as_deref()) {
          info!(path = ?dest, "file already up to date, skipping download");
          return Ok(Some(dependency_record(relative, &remote, &local)));
        }
        info!(path = ?dest, "overriding existing file with different content");
      }
    }

    debug!(url = %url, dest = ?dest, "downloading dependency");
    match self.client.download_to(&url, &dest).await {
      Ok(bytes) => info!(url = %url, path = %relative, bytes, "downloaded dependency"),
      Err(e) if e.is_not_found() => {
        remove_partial(&dest).await?;
        warn!(url = %url, "remote dependency not found, skipping");
        return Ok(None);
      }
      Err(source) => {
        remove_partial(&dest).await?;
        return Err(ResolveError::Download { url, source });
      }
    }

    if !self.include_dependencies {
      return Ok(None);
    }
    let local = local_checksums(&dest).await?.unwrap_or_default();
    Ok(Some(dependency_record(relative, &remote, &local)))
  }
}

/// Dependency keyed by its workspace-relative path. Remote checksums win;
/// locally computed ones fill the gaps.
fn dependency_record(relative: &str, remote: &RemoteChecksums, local: &FileChecksums) -> Dependency {
  let non_empty = |value: &str| Some(value.to_string()).filter(|v| !v.is_empty());
  let file_name = relative.rsplit('/').next().unwrap_or(relative);
  Dependency {
    id: relative.to_string(),
    dependency_type: artifact_type(file_name),
    md5: remote.md5.clone().or_else(|| non_empty(&local.md5)),
    sha1: remote.sha1.clone().or_else(|| non_empty(&local.sha1)),
    sha256: non_empty(&local.sha256),
  }
}

/// Checksums of an existing regular file, `None` when absent.
async fn local_checksums(path: &Path) -> Result<Option<FileChecksums>, ResolveError> {
  match fs::metadata(path).await {
    Ok(meta) if meta.is_file() => {}
    Ok(_) => return Ok(None),
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => {
      return Err(ResolveError::Io {
        path: path.to_path_buf(),
        source,
      });
    }
  }
  let owned = path.to_path_buf();
  let sums = tokio::task::spawn_blocking(move || file_checksums(&owned))
    .await
    .map_err(|e| ResolveError::Worker(e.to_string()))??;
  Ok(Some(sums))
}

async fn remove_partial(path: &Path) -> Result<(), ResolveError> {
  match fs::remove_file(path).await {
    Ok(()) => {
      debug!(path = ?path, "removed partial download");
      Ok(())
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(source) => Err(ResolveError::Io {
      path: path.to_path_buf(),
      source,
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::FakeRepository;
  use tempfile::tempdir;
  use tracing_test::traced_test;

  fn artifact(path: &str) -> DownloadableArtifact {
    DownloadableArtifact {
      repo_url: "http://fake/libs".to_string(),
      relative_target_dir: "deps".to_string(),
      remote_file_path: path.to_string(),
      local_path: path.to_string(),
      matrix_params: String::new(),
    }
  }

  #[tokio::test]
  #[traced_test]
  async fn not_found_leaves_no_file_and_continues() {
    let temp = tempdir().unwrap();
    let repo = Arc::new(FakeRepository::default());
    repo.add_file("http://fake/libs/b.jar", b"bbb");
    std::fs::create_dir_all(temp.path().join("deps")).unwrap();
    std::fs::write(temp.path().join("deps/a.jar"), "stale partial").unwrap();

    let deps = Downloader::new(repo.clone(), temp.path().to_path_buf())
      .with_dependencies(true)
      .download(&[artifact("a.jar"), artifact("b.jar")])
      .await
      .unwrap();

    assert!(!temp.path().join("deps/a.jar").exists());
    assert!(temp.path().join("deps/b.jar").is_file());
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].id, "deps/b.jar");
    assert_eq!(deps[0].dependency_type, "jar");
    assert!(logs_contain("remote dependency not found"));
  }

  #[tokio::test]
  async fn escaping_remote_path_is_never_written() {
    let temp = tempdir().unwrap();
    let workspace = temp.path().join("ws");
    let repo = Arc::new(FakeRepository::default());
    repo.add_file("http://fake/libs/../../x.jar", b"x");

    let err = Downloader::new(repo.clone(), workspace)
      .download(&[artifact("../../x.jar")])
      .await
      .unwrap_err();

    assert!(matches!(err, ResolveError::UnsafePath(_)));
    assert_eq!(repo.download_count(), 0);
    assert!(!temp.path().join("x.jar").exists());
  }

  #[tokio::test]
  async fn transport_failure_removes_partial_and_aborts() {
    let temp = tempdir().unwrap();
    let repo = Arc::new(FakeRepository::default());
    repo.add_file("http://fake/libs/a.jar", b"aaa");
    repo.fail_download("http://fake/libs/a.jar");

    let err = Downloader::new(repo.clone(), temp.path().to_path_buf())
      .download(&[artifact("a.jar")])
      .await
      .unwrap_err();

    assert!(matches!(err, ResolveError::Download { .. }));
    assert!(!temp.path().join("deps/a.jar").exists());
  }

  #[tokio::test]
  async fn matching_local_file_is_not_downloaded_again() {
    let temp = tempdir().unwrap();
    let repo = Arc::new(FakeRepository::default());
    repo.add_file("http://fake/libs/a.jar", b"aaa");
    let downloader = Downloader::new(repo.clone(), temp.path().to_path_buf()).with_dependencies(true);

    let first = downloader.download(&[artifact("a.jar")]).await.unwrap();
    let second = downloader.download(&[artifact("a.jar")]).await.unwrap();

    assert_eq!(repo.download_count(), 1);
    assert_eq!(first, second);
    assert_eq!(first[0].sha1.as_deref(), Some(crate::util::hash::sha1_bytes(b"aaa").as_str()));
  }

  #[tokio::test]
  async fn changed_local_file_is_overwritten() {
    let temp = tempdir().unwrap();
    let repo = Arc::new(FakeRepository::default());
    repo.add_file("http://fake/libs/a.jar", b"fresh");
    std::fs::create_dir_all(temp.path().join("deps")).unwrap();
    std::fs::write(temp.path().join("deps/a.jar"), "old").unwrap();

    Downloader::new(repo.clone(), temp.path().to_path_buf())
      .with_dependencies(true)
      .download(&[artifact("a.jar")])
      .await
      .unwrap();

    assert_eq!(std::fs::read(temp.path().join("deps/a.jar")).unwrap(), b"fresh");
    assert_eq!(repo.download_count(), 1);
  }

  #[tokio::test]
  async fn flat_mode_drops_remote_directories() {
    let temp = tempdir().unwrap();
    let repo = Arc::new(FakeRepository::default());
    repo.add_file("http://fake/libs/com/acme/a.jar", b"aaa");

    Downloader::new(repo.clone(), temp.path().to_path_buf())
      .with_flat(true)
      .download(&[artifact("com/acme/a.jar")])
      .await
      .unwrap();

    assert!(temp.path().join("deps/a.jar").is_file());
    assert!(!temp.path().join("deps/com").exists());
  }

  #[tokio::test]
  async fn without_dependency_recording_no_records_or_head_calls() {
    let temp = tempdir().unwrap();
    let repo = Arc::new(FakeRepository::default());
    repo.add_file("http://fake/libs/a.jar", b"aaa");

    let deps = Downloader::new(repo.clone(), temp.path().to_path_buf())
      .download(&[artifact("a.jar")])
      .await
      .unwrap();
    assert!(deps.is_empty());
    assert_eq!(repo.checksum_count(), 0);
  }
}
