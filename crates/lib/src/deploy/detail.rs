//! Deploy details: one resolved file ready to upload.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::consts::{
  PROP_BUILD_NAME, PROP_BUILD_NUMBER, PROP_BUILD_PARENT_NAME, PROP_BUILD_PARENT_NUMBER, PROP_BUILD_TIMESTAMP,
  PROP_VCS_REVISION,
};
use crate::pattern::ResolvedFile;
use crate::util::expand::expand_vars;
use crate::util::hash::{ChecksumAlgorithm, ChecksumError, calculate_checksums};

/// Property map attached to uploads. A key may carry several values.
pub type Properties = BTreeMap<String, Vec<String>>;

/// One file plus its destination, checksums and properties.
///
/// Identity is `(target_repository, artifact_path)`: two details with the same
/// key compare equal and collapse in a set.
#[derive(Debug, Clone)]
pub struct DeployDetail {
  pub source_file: PathBuf,
  /// Repository-relative path, never containing `//`.
  pub artifact_path: String,
  pub target_repository: String,
  pub md5: String,
  pub sha1: String,
  pub sha256: String,
  pub properties: Properties,
}

impl DeployDetail {
  fn key(&self) -> (&str, &str) {
    (&self.target_repository, &self.artifact_path)
  }

  /// File name part of the artifact path.
  pub fn file_name(&self) -> &str {
    self.artifact_path.rsplit('/').next().unwrap_or(&self.artifact_path)
  }
}

impl PartialEq for DeployDetail {
  fn eq(&self, other: &Self) -> bool {
    self.key() == other.key()
  }
}

impl Eq for DeployDetail {}

impl Hash for DeployDetail {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key().hash(state);
  }
}

impl PartialOrd for DeployDetail {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for DeployDetail {
  fn cmp(&self, other: &Self) -> Ordering {
    self.key().cmp(&other.key())
  }
}

/// Join target and relative path fragments with single `/` separators.
pub fn join_artifact_path(target: &str, relative: &str) -> String {
  let mut path = format!("{}/{}", target.replace('\\', "/"), relative.replace('\\', "/"));
  while path.contains("//") {
    path = path.replace("//", "/");
  }
  path.trim_start_matches('/').to_string()
}

/// Build-level properties stamped on every upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildProperties {
  pub build_name: String,
  pub build_number: String,
  /// Build start, epoch millis.
  pub timestamp: i64,
  pub vcs_revision: Option<String>,
  pub parent_name: Option<String>,
  pub parent_number: Option<String>,
}

impl BuildProperties {
  pub fn to_properties(&self) -> Properties {
    let mut props = Properties::new();
    props.insert(PROP_BUILD_NAME.to_string(), vec![self.build_name.clone()]);
    props.insert(PROP_BUILD_NUMBER.to_string(), vec![self.build_number.clone()]);
    props.insert(PROP_BUILD_TIMESTAMP.to_string(), vec![self.timestamp.to_string()]);
    if let Some(rev) = self.vcs_revision.as_ref().filter(|r| !r.is_empty()) {
      props.insert(PROP_VCS_REVISION.to_string(), vec![rev.clone()]);
    }
    if let (Some(name), Some(number)) = (&self.parent_name, &self.parent_number) {
      props.insert(PROP_BUILD_PARENT_NAME.to_string(), vec![name.clone()]);
      props.insert(PROP_BUILD_PARENT_NUMBER.to_string(), vec![number.clone()]);
    }
    props
  }
}

/// Parse `key=value` pairs separated by `;` or whitespace.
///
/// Values are expanded against `env`. Entries without `=` or with an empty
/// key are ignored.
pub fn parse_matrix_params(text: &str, env: &BTreeMap<String, String>) -> Properties {
  let mut props = Properties::new();
  for entry in text.split(|c: char| c == ';' || c.is_whitespace()) {
    let Some((key, value)) = entry.split_once('=') else {
      continue;
    };
    if key.is_empty() {
      continue;
    }
    props.entry(key.to_string()).or_default().push(expand_vars(value, env));
  }
  props
}

/// Merge `extra` into `base`, appending values.
pub fn merge_properties(base: &mut Properties, extra: &Properties) {
  for (key, values) in extra {
    let entry = base.entry(key.clone()).or_default();
    for value in values {
      if !entry.contains(value) {
        entry.push(value.clone());
      }
    }
  }
}

/// Errors that abort deploy-detail building.
#[derive(Debug, thiserror::Error)]
pub enum DetailError {
  #[error(transparent)]
  Checksum(#[from] ChecksumError),
}

/// Builds [`DeployDetail`]s for resolved files.
#[derive(Debug, Clone)]
pub struct DeployDetailBuilder {
  repository: String,
  properties: Properties,
  algorithms: Vec<String>,
}

impl DeployDetailBuilder {
  pub fn new(repository: impl Into<String>, properties: Properties) -> Self {
    Self {
      repository: repository.into(),
      properties,
      algorithms: vec!["md5".to_string(), "sha1".to_string(), "sha256".to_string()],
    }
  }

  /// Override the digest algorithms (md5 and sha1 are still required).
  pub fn with_algorithms(mut self, algorithms: &[&str]) -> Self {
    self.algorithms = algorithms.iter().map(|a| a.to_string()).collect();
    self
  }

  /// Build the detail set.
  ///
  /// A file whose checksums cannot be computed with the configured algorithms
  /// is skipped with a warning. An unreadable file aborts the whole step.
  pub fn build(&self, files: &[ResolvedFile]) -> Result<BTreeSet<DeployDetail>, DetailError> {
    let algorithms: Vec<&str> = self.algorithms.iter().map(String::as_str).collect();
    let mut details = BTreeSet::new();

    for file in files {
      let mut sums = match calculate_checksums(&file.file, &algorithms) {
        Ok(sums) => sums,
        Err(ChecksumError::UnsupportedAlgorithm(name)) => {
          warn!(file = ?file.file, algorithm = %name, "skipping file, checksum algorithm unavailable");
          continue;
        }
        Err(e) => return Err(e.into()),
      };
      let (Some(md5), Some(sha1)) = (sums.remove(&ChecksumAlgorithm::Md5), sums.remove(&ChecksumAlgorithm::Sha1))
      else {
        warn!(file = ?file.file, "skipping file, md5 and sha1 are required");
        continue;
      };

      let artifact_path = join_artifact_path(&file.target_path, &file.relative_path);
      debug!(file = ?file.file, path = %artifact_path, "prepared deploy detail");
      details.insert(DeployDetail {
        source_file: file.file.clone(),
        artifact_path,
        target_repository: self.repository.clone(),
        md5,
        sha1,
        sha256: sums.remove(&ChecksumAlgorithm::Sha256).unwrap_or_default(),
        properties: self.properties.clone(),
      });
    }

    Ok(details)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pattern::{parse_pattern_pairs, resolve};
  use std::fs;
  use tempfile::tempdir;
  use tracing_test::traced_test;

  fn build_props() -> BuildProperties {
    BuildProperties {
      build_name: "demo".to_string(),
      build_number: "42".to_string(),
      timestamp: 1_714_557_600_000,
      vcs_revision: Some("abc123".to_string()),
      ..Default::default()
    }
  }

  #[test]
  fn join_collapses_doubled_separators() {
    assert_eq!(join_artifact_path("release/", "a.jar"), "release/a.jar");
    assert_eq!(join_artifact_path("/release//x/", "/y/a.jar"), "release/x/y/a.jar");
    assert_eq!(join_artifact_path("", "a.jar"), "a.jar");
  }

  #[test]
  fn standard_properties() {
    let props = build_props().to_properties();
    assert_eq!(props["build.name"], vec!["demo"]);
    assert_eq!(props["build.number"], vec!["42"]);
    assert_eq!(props["build.timestamp"], vec!["1714557600000"]);
    assert_eq!(props["vcs.revision"], vec!["abc123"]);
    assert!(!props.contains_key("build.parentName"));
  }

  #[test]
  fn parent_properties_need_both_parts() {
    let mut build = build_props();
    build.parent_name = Some("upstream".to_string());
    assert!(!build.to_properties().contains_key("build.parentName"));
    build.parent_number = Some("9".to_string());
    let props = build.to_properties();
    assert_eq!(props["build.parentName"], vec!["upstream"]);
    assert_eq!(props["build.parentNumber"], vec!["9"]);
  }

  #[test]
  fn matrix_params_split_and_expand() {
    let env = BTreeMap::from([("BRANCH".to_string(), "main".to_string())]);
    let props = parse_matrix_params("team=core;=orphan;branch=${BRANCH} os=linux;os=mac;junk", &env);
    assert_eq!(props["team"], vec!["core"]);
    assert_eq!(props["branch"], vec!["main"]);
    assert_eq!(props["os"], vec!["linux", "mac"]);
    assert_eq!(props.len(), 3);
  }

  #[test]
  fn builds_details_for_scenario() {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join("build")).unwrap();
    fs::write(temp.path().join("build/a.jar"), "a").unwrap();
    fs::write(temp.path().join("build/b.jar"), "b").unwrap();

    let files = resolve(temp.path(), &parse_pattern_pairs("build/*.jar => release/")).unwrap();
    let details = DeployDetailBuilder::new("libs-release", build_props().to_properties())
      .build(&files)
      .unwrap();

    let paths: Vec<_> = details.iter().map(|d| d.artifact_path.as_str()).collect();
    assert_eq!(paths, vec!["release/a.jar", "release/b.jar"]);
    for detail in &details {
      assert!(!detail.md5.is_empty());
      assert!(!detail.sha1.is_empty());
      assert!(detail.properties.contains_key("build.name"));
      assert!(detail.properties.contains_key("build.number"));
      assert!(detail.properties.contains_key("build.timestamp"));
    }
  }

  #[test]
  fn double_globbing_collapses() {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join("build")).unwrap();
    fs::write(temp.path().join("build/a.jar"), "a").unwrap();

    let files = resolve(
      temp.path(),
      &parse_pattern_pairs("build/*.jar => release/\nbuild/a.* => release"),
    )
    .unwrap();
    assert_eq!(files.len(), 2);
    let builder = DeployDetailBuilder::new("libs", Properties::new());
    let first = builder.build(&files).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(builder.build(&files).unwrap(), first);
  }

  #[test]
  #[traced_test]
  fn unsupported_algorithm_skips_file() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.jar"), "a").unwrap();
    let files = resolve(temp.path(), &parse_pattern_pairs("*.jar => x")).unwrap();

    let details = DeployDetailBuilder::new("libs", Properties::new())
      .with_algorithms(&["md5", "sha1", "whirlpool"])
      .build(&files)
      .unwrap();
    assert!(details.is_empty());
    assert!(logs_contain("checksum algorithm unavailable"));
  }

  #[test]
  fn missing_file_aborts() {
    let files = vec![ResolvedFile {
      target_path: "x".to_string(),
      relative_path: "gone.jar".to_string(),
      file: PathBuf::from("/does/not/exist/gone.jar"),
    }];
    let result = DeployDetailBuilder::new("libs", Properties::new()).build(&files);
    assert!(matches!(result, Err(DetailError::Checksum(ChecksumError::ReadFile { .. }))));
  }
}
