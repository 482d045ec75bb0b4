//! On-disk storage for in-progress build-info manifests.
//!
//! Separate invocations (upload, download, env capture) accumulate into one
//! manifest per build before it is published.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/builds/
//! └── <encoded name>/
//!     ├── <encoded number>.json    # BuildInfo
//!     └── <encoded number>.lock    # held while the manifest is modified
//! ```
//!
//! Names and numbers are percent-encoded so that distinct builds never share
//! a file and no component can be `.` or `..`.

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::path::PathBuf;

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::debug;

use super::lock::{BuildLock, BuildLockError};
use super::types::BuildInfo;
use crate::paths::builds_dir;

/// Errors from the build-info store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("build {0} must not be empty")]
  EmptyKey(&'static str),

  #[error("failed to create directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize build-info: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error(transparent)]
  Lock(#[from] BuildLockError),
}

/// Keeps one JSON file per `(name, number)`.
#[derive(Debug, Clone)]
pub struct BuildInfoStore {
  base_path: PathBuf,
}

/// Percent-encodes everything but `[A-Za-z0-9_-]` and non-leading dots.
fn file_component(field: &'static str, value: &str) -> Result<String, StoreError> {
  if value.is_empty() {
    return Err(StoreError::EmptyKey(field));
  }
  let mut encoded = String::with_capacity(value.len());
  for (i, byte) in value.bytes().enumerate() {
    let keep = byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || (byte == b'.' && i > 0);
    if keep {
      encoded.push(byte as char);
    } else {
      let _ = write!(encoded, "%{byte:02X}");
    }
  }
  Ok(encoded)
}

impl BuildInfoStore {
  pub fn new(base_path: PathBuf) -> Self {
    Self { base_path }
  }

  /// Store under the platform data directory.
  pub fn default_store() -> Self {
    Self::new(builds_dir())
  }

  pub fn base_path(&self) -> &PathBuf {
    &self.base_path
  }

  fn build_path(&self, name: &str, number: &str, extension: &str) -> Result<PathBuf, StoreError> {
    Ok(
      self
        .base_path
        .join(file_component("name", name)?)
        .join(format!("{}.{extension}", file_component("number", number)?)),
    )
  }

  /// Take the exclusive lock for one build, blocking while another process
  /// or thread holds it.
  ///
  /// [`update`](Self::update) locks on its own; callers that load, run a long
  /// operation and then save or remove hold this guard across all of it.
  /// [`load`](Self::load), [`save`](Self::save) and [`remove`](Self::remove)
  /// never lock.
  pub fn lock(&self, name: &str, number: &str) -> Result<BuildLock, StoreError> {
    Ok(BuildLock::acquire(&self.build_path(name, number, "lock")?)?)
  }

  /// Load a stored build-info, if any.
  pub fn load(&self, name: &str, number: &str) -> Result<Option<BuildInfo>, StoreError> {
    let path = self.build_path(name, number, "json")?;
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => return Err(StoreError::Read { path, source }),
    };
    let info = serde_json::from_str(&content).map_err(|source| StoreError::Parse { path, source })?;
    Ok(Some(info))
  }

  /// Load a stored build-info or start a new one now.
  pub fn load_or_new(&self, name: &str, number: &str) -> Result<BuildInfo, StoreError> {
    Ok(
      self
        .load(name, number)?
        .unwrap_or_else(|| BuildInfo::new(name, number, Utc::now())),
    )
  }

  /// Save a build-info.
  ///
  /// Each writer gets its own temp file in the target directory, which is
  /// then renamed over the manifest.
  pub fn save(&self, info: &BuildInfo) -> Result<(), StoreError> {
    let path = self.build_path(&info.name, &info.number, "json")?;
    let Some(dir) = path.parent() else {
      return Ok(());
    };
    fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
      path: dir.to_path_buf(),
      source,
    })?;

    let content = serde_json::to_string_pretty(info).map_err(StoreError::Serialize)?;
    let write_err = |source: io::Error| StoreError::Write {
      path: path.clone(),
      source,
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
    temp.write_all(content.as_bytes()).map_err(write_err)?;
    temp.persist(&path).map_err(|e| write_err(e.error))?;
    debug!(path = ?path, "saved build-info");
    Ok(())
  }

  /// Load, modify and save under the build's lock.
  pub fn update<F>(&self, name: &str, number: &str, f: F) -> Result<BuildInfo, StoreError>
  where
    F: FnOnce(&mut BuildInfo),
  {
    let _lock = self.lock(name, number)?;
    let mut info = self.load_or_new(name, number)?;
    f(&mut info);
    self.save(&info)?;
    Ok(info)
  }

  /// Remove a stored build-info. Missing files are not an error.
  pub fn remove(&self, name: &str, number: &str) -> Result<(), StoreError> {
    let path = self.build_path(name, number, "json")?;
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StoreError::Write { path, source }),
    }
  }
}
