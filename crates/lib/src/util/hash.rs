//! Content checksums for artifacts and downloaded dependencies.
//!
//! This module provides:
//! - `ChecksumAlgorithm`: the digest algorithms the repository service understands
//! - `calculate_checksums()`: single-pass multi-digest hashing of a file
//! - `file_checksums()`: the md5/sha1/sha256 triple used for uploads and comparisons
//! - `sha1_bytes()`: hashing of in-memory content
//!
//! Digests are lowercase hex. Identical content always yields identical digests.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Digest algorithms supported by the checksum calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
  Md5,
  Sha1,
  Sha256,
}

impl ChecksumAlgorithm {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChecksumAlgorithm::Md5 => "md5",
      ChecksumAlgorithm::Sha1 => "sha1",
      ChecksumAlgorithm::Sha256 => "sha256",
    }
  }
}

impl std::fmt::Display for ChecksumAlgorithm {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ChecksumAlgorithm {
  type Err = ChecksumError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().replace('-', "").as_str() {
      "md5" => Ok(ChecksumAlgorithm::Md5),
      "sha1" => Ok(ChecksumAlgorithm::Sha1),
      "sha256" => Ok(ChecksumAlgorithm::Sha256),
      _ => Err(ChecksumError::UnsupportedAlgorithm(s.to_string())),
    }
  }
}

/// Errors raised while computing checksums.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
  /// The requested algorithm is not available. Fatal for that file only.
  #[error("unsupported checksum algorithm: {0}")]
  UnsupportedAlgorithm(String),

  /// The file could not be opened or read.
  #[error("failed to read file {path}: {source}")]
  ReadFile {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// The checksum triple recorded for every artifact and dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileChecksums {
  pub md5: String,
  pub sha1: String,
  pub sha256: String,
}

impl FileChecksums {
  /// Whether both md5 and sha1 are present and equal to the given values.
  pub fn matches(&self, md5: Option<&str>, sha1: Option<&str>) -> bool {
    match (md5, sha1) {
      (Some(md5), Some(sha1)) if !md5.is_empty() && !sha1.is_empty() => {
        self.md5.eq_ignore_ascii_case(md5) && self.sha1.eq_ignore_ascii_case(sha1)
      }
      _ => false,
    }
  }
}

enum Hasher {
  Md5(Md5),
  Sha1(Sha1),
  Sha256(Sha256),
}

impl Hasher {
  fn new(algorithm: ChecksumAlgorithm) -> Self {
    match algorithm {
      ChecksumAlgorithm::Md5 => Hasher::Md5(Md5::new()),
      ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
      ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
    }
  }

  fn update(&mut self, data: &[u8]) {
    match self {
      Hasher::Md5(h) => h.update(data),
      Hasher::Sha1(h) => h.update(data),
      Hasher::Sha256(h) => h.update(data),
    }
  }

  fn finalize_hex(self) -> String {
    match self {
      Hasher::Md5(h) => hex::encode(h.finalize()),
      Hasher::Sha1(h) => hex::encode(h.finalize()),
      Hasher::Sha256(h) => hex::encode(h.finalize()),
    }
  }
}

/// Compute the requested digests of a file in a single read pass.
///
/// Algorithm names are parsed before the file is opened, so an unsupported
/// name fails without touching the filesystem.
pub fn calculate_checksums(
  path: &Path,
  algorithms: &[&str],
) -> Result<BTreeMap<ChecksumAlgorithm, String>, ChecksumError> {
  let parsed = algorithms
    .iter()
    .map(|name| name.parse::<ChecksumAlgorithm>())
    .collect::<Result<Vec<_>, _>>()?;

  let mut hashers: Vec<(ChecksumAlgorithm, Hasher)> = Vec::with_capacity(parsed.len());
  for algorithm in parsed {
    if !hashers.iter().any(|(a, _)| *a == algorithm) {
      hashers.push((algorithm, Hasher::new(algorithm)));
    }
  }

  let read_err = |source| ChecksumError::ReadFile {
    path: path.to_path_buf(),
    source,
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    for (_, hasher) in hashers.iter_mut() {
      hasher.update(&buffer[..bytes_read]);
    }
  }

  Ok(
    hashers
      .into_iter()
      .map(|(algorithm, hasher)| (algorithm, hasher.finalize_hex()))
      .collect(),
  )
}

/// Compute md5, sha1 and sha256 of a file.
pub fn file_checksums(path: &Path) -> Result<FileChecksums, ChecksumError> {
  let mut digests = calculate_checksums(path, &["md5", "sha1", "sha256"])?;
  Ok(FileChecksums {
    md5: digests.remove(&ChecksumAlgorithm::Md5).unwrap_or_default(),
    sha1: digests.remove(&ChecksumAlgorithm::Sha1).unwrap_or_default(),
    sha256: digests.remove(&ChecksumAlgorithm::Sha256).unwrap_or_default(),
  })
}

/// Hash arbitrary bytes with SHA-1.
pub fn sha1_bytes(data: &[u8]) -> String {
  let mut hasher = Sha1::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}
