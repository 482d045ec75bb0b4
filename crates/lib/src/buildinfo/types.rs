//! Build-info manifest types.
//!
//! Field names serialize in camelCase, matching the repository service's
//! build-info JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Manifest schema version sent with every build-info.
pub const BUILD_INFO_VERSION: &str = "1.0.1";

/// Timestamp format used by the repository service (`2024-05-01T10:00:00.000+0000`).
pub const STARTED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

mod started_format {
  use chrono::{DateTime, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  use super::STARTED_FORMAT;

  pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.format(STARTED_FORMAT).to_string())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_str(&raw, STARTED_FORMAT)
      .or_else(|_| DateTime::parse_from_rfc3339(&raw))
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(serde::de::Error::custom)
  }
}

/// Replace path separators in a build name the way the repository UI expects.
pub fn sanitize_build_name(name: &str) -> String {
  name.replace('/', " :: ").replace("%2F", " :: ")
}

/// Module id used when the caller does not name one.
pub fn default_module_id(build_name: &str, build_number: &str) -> String {
  format!("{}:{}", sanitize_build_name(build_name), build_number)
}

/// A deployed file as recorded in a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
  pub name: String,
  #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
  pub artifact_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub md5: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sha1: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sha256: Option<String>,
  /// Repository path the artifact was stored at.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
}

/// A consumed file as recorded in a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
  pub id: String,
  #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
  pub dependency_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub md5: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sha1: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sha256: Option<String>,
}

/// A named group of artifacts and dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
  pub id: String,
  #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
  pub module_type: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub properties: BTreeMap<String, String>,
  #[serde(default)]
  pub artifacts: Vec<Artifact>,
  #[serde(default)]
  pub dependencies: Vec<Dependency>,
}

impl Module {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      ..Default::default()
    }
  }

  /// Merge another module's content into this one. Exact duplicates are dropped.
  pub fn append(&mut self, other: Module) {
    for artifact in other.artifacts {
      if !self.artifacts.contains(&artifact) {
        self.artifacts.push(artifact);
      }
    }
    for dependency in other.dependencies {
      if !self.dependencies.contains(&dependency) {
        self.dependencies.push(dependency);
      }
    }
    self.properties.extend(other.properties);
    if self.module_type.is_none() {
      self.module_type = other.module_type;
    }
  }
}

/// Another build whose artifacts this build consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDependency {
  pub name: String,
  pub number: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vcs {
  pub revision: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub branch: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

/// A file that was prepared for upload but not uploaded yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployableArtifact {
  pub local_path: String,
  pub remote_path: String,
  pub target_repository: String,
  pub md5: String,
  pub sha1: String,
}

/// How many past builds the repository keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRetention {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_builds: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_days: Option<u32>,
  #[serde(default)]
  pub delete_build_artifacts: bool,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub builds_exempt_from_discard: Vec<String>,
  #[serde(rename = "async", default)]
  pub run_async: bool,
}

/// Wire body of a retention call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRequest {
  pub count: i64,
  pub delete_build_artifacts: bool,
  pub build_numbers_not_to_be_discarded: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub minimum_build_date: Option<String>,
}

/// Keys accepted by [`BuildRetention::from_args`].
pub const RETENTION_ARGS: &[&str] = &["maxDays", "maxBuilds", "deleteBuildArtifacts", "doNotDiscardBuilds", "async"];

impl BuildRetention {
  /// Whether the policy would discard anything.
  pub fn is_active(&self) -> bool {
    self.max_builds.is_some() || self.max_days.is_some()
  }

  /// Build a policy from a dynamic argument map.
  ///
  /// Unknown keys are rejected before anything is sent.
  pub fn from_args(args: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
    let mut retention = BuildRetention::default();
    for (key, value) in args {
      let value = value.trim();
      match key.as_str() {
        "maxDays" => retention.max_days = Some(parse_arg(key, value)?),
        "maxBuilds" => retention.max_builds = Some(parse_arg(key, value)?),
        "deleteBuildArtifacts" => retention.delete_build_artifacts = parse_arg(key, value)?,
        "async" => retention.run_async = parse_arg(key, value)?,
        "doNotDiscardBuilds" => {
          retention.builds_exempt_from_discard = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        }
        _ => {
          return Err(ConfigError::DisallowedArgument {
            key: key.clone(),
            allowed: RETENTION_ARGS.join(", "),
          });
        }
      }
    }
    Ok(retention)
  }

  /// The request body for a retention call issued at `now`.
  pub fn to_request(&self, now: DateTime<Utc>) -> RetentionRequest {
    RetentionRequest {
      count: self.max_builds.map(i64::from).unwrap_or(-1),
      delete_build_artifacts: self.delete_build_artifacts,
      build_numbers_not_to_be_discarded: self.builds_exempt_from_discard.clone(),
      minimum_build_date: self
        .max_days
        .map(|days| (now - ChronoDuration::days(i64::from(days))).format(STARTED_FORMAT).to_string()),
    }
  }
}

fn parse_arg<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidArgument {
    key: key.to_string(),
    value: value.to_string(),
  })
}

/// The manifest of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
  pub version: String,
  pub name: String,
  pub number: String,
  #[serde(with = "started_format")]
  pub started: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_number: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub vcs: Vec<Vcs>,
  #[serde(default)]
  pub modules: Vec<Module>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub build_dependencies: Vec<BuildDependency>,
  /// Captured and filtered environment, already prefixed.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub properties: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub build_retention: Option<BuildRetention>,
  /// Upload candidates; dropped from the published manifest.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub deployable_artifacts: Vec<DeployableArtifact>,
}

impl BuildInfo {
  pub fn new(name: impl Into<String>, number: impl Into<String>, started: DateTime<Utc>) -> Self {
    Self {
      version: BUILD_INFO_VERSION.to_string(),
      name: name.into(),
      number: number.into(),
      started,
      url: None,
      parent_name: None,
      parent_number: None,
      vcs: Vec::new(),
      modules: Vec::new(),
      build_dependencies: Vec::new(),
      properties: BTreeMap::new(),
      build_retention: None,
      deployable_artifacts: Vec::new(),
    }
  }

  /// Build start as epoch millis, the value of the `build.timestamp` property.
  pub fn timestamp_millis(&self) -> i64 {
    self.started.timestamp_millis()
  }

  pub fn default_module_id(&self) -> String {
    default_module_id(&self.name, &self.number)
  }

  pub fn module(&self, id: &str) -> Option<&Module> {
    self.modules.iter().find(|m| m.id == id)
  }

  /// Add a module, appending into an existing module with the same id.
  pub fn add_module(&mut self, module: Module) {
    match self.modules.iter_mut().find(|m| m.id == module.id) {
      Some(existing) => existing.append(module),
      None => self.modules.push(module),
    }
  }

  /// Record deployed artifacts under `module_id` (default module when `None`).
  pub fn append_artifacts(&mut self, artifacts: Vec<Artifact>, module_id: Option<&str>) {
    let id = module_id.map(str::to_string).unwrap_or_else(|| self.default_module_id());
    self.add_module(Module {
      artifacts,
      ..Module::new(id)
    });
  }

  /// Record resolved dependencies under `module_id` (default module when `None`).
  pub fn append_dependencies(&mut self, dependencies: Vec<Dependency>, module_id: Option<&str>) {
    let id = module_id.map(str::to_string).unwrap_or_else(|| self.default_module_id());
    self.add_module(Module {
      dependencies,
      ..Module::new(id)
    });
  }

  pub fn add_build_dependencies(&mut self, dependencies: Vec<BuildDependency>) {
    for dependency in dependencies {
      if !self.build_dependencies.contains(&dependency) {
        self.build_dependencies.push(dependency);
      }
    }
  }

  /// An empty manifest for the same build, keeping its identity, start time,
  /// parent and VCS entries. Work done outside the store lock collects here
  /// and is merged back with [`append`](Self::append).
  pub fn empty_like(&self) -> BuildInfo {
    BuildInfo {
      url: self.url.clone(),
      parent_name: self.parent_name.clone(),
      parent_number: self.parent_number.clone(),
      vcs: self.vcs.clone(),
      ..BuildInfo::new(self.name.clone(), self.number.clone(), self.started)
    }
  }

  /// Merge another build-info for the same build into this one.
  pub fn append(&mut self, other: BuildInfo) {
    for module in other.modules {
      self.add_module(module);
    }
    self.add_build_dependencies(other.build_dependencies);
    self.properties.extend(other.properties);
    // Incoming entries move to the end; the last entry is the current revision.
    for vcs in other.vcs {
      self.vcs.retain(|v| v != &vcs);
      self.vcs.push(vcs);
    }
    self.deployable_artifacts.extend(other.deployable_artifacts);
    if self.build_retention.is_none() {
      self.build_retention = other.build_retention;
    }
  }

  /// The manifest as sent to the repository service.
  pub fn for_publication(&self) -> BuildInfo {
    let mut published = self.clone();
    published.deployable_artifacts.clear();
    published
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn started() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
  }

  fn artifact(name: &str) -> Artifact {
    Artifact {
      name: name.to_string(),
      artifact_type: "jar".to_string(),
      sha1: Some(format!("sha1-{name}")),
      ..Default::default()
    }
  }

  #[test]
  fn default_module_id_sanitizes_folders() {
    assert_eq!(default_module_id("team/app", "7"), "team :: app:7");
    assert_eq!(default_module_id("app%2Fweb", "1"), "app :: web:1");
  }

  #[test]
  fn adding_same_module_id_appends() {
    let mut info = BuildInfo::new("demo", "1", started());
    info.append_artifacts(vec![artifact("a.jar")], None);
    info.append_artifacts(vec![artifact("b.jar")], None);
    info.append_artifacts(vec![artifact("a.jar")], None);

    assert_eq!(info.modules.len(), 1);
    assert_eq!(info.modules[0].id, "demo:1");
    assert_eq!(info.modules[0].artifacts.len(), 2);
  }

  #[test]
  fn explicit_module_ids_stay_separate() {
    let mut info = BuildInfo::new("demo", "1", started());
    info.append_artifacts(vec![artifact("a.jar")], Some("core"));
    info.append_dependencies(
      vec![Dependency {
        id: "lib.jar".to_string(),
        ..Default::default()
      }],
      Some("web"),
    );
    assert_eq!(info.modules.len(), 2);
    assert_eq!(info.module("web").unwrap().dependencies.len(), 1);
  }

  #[test]
  fn append_merges_build_infos() {
    let mut first = BuildInfo::new("demo", "1", started());
    first.append_artifacts(vec![artifact("a.jar")], None);
    let mut second = BuildInfo::new("demo", "1", started());
    second.append_artifacts(vec![artifact("b.jar")], None);
    second.add_build_dependencies(vec![BuildDependency {
      name: "upstream".to_string(),
      number: "3".to_string(),
      ..Default::default()
    }]);
    second.properties.insert("buildInfo.env.CI".to_string(), "true".to_string());

    first.append(second);
    assert_eq!(first.modules[0].artifacts.len(), 2);
    assert_eq!(first.build_dependencies.len(), 1);
    assert_eq!(first.properties["buildInfo.env.CI"], "true");
  }

  fn vcs(revision: &str) -> Vcs {
    Vcs {
      revision: revision.to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn empty_like_keeps_identity_and_latest_revision_wins() {
    let mut stored = BuildInfo::new("demo", "1", started());
    stored.parent_name = Some("upstream".to_string());
    stored.vcs = vec![vcs("r1"), vcs("r2")];
    stored.append_artifacts(vec![artifact("a.jar")], None);

    let mut delta = stored.empty_like();
    assert!(delta.modules.is_empty());
    assert_eq!(delta.started, stored.started);
    assert_eq!(delta.parent_name.as_deref(), Some("upstream"));

    delta.vcs.push(vcs("r1"));
    delta.append_artifacts(vec![artifact("b.jar")], None);
    stored.append(delta);

    let revisions: Vec<_> = stored.vcs.iter().map(|v| v.revision.as_str()).collect();
    assert_eq!(revisions, ["r2", "r1"]);
    assert_eq!(stored.modules[0].artifacts.len(), 2);
  }

  #[test]
  fn started_uses_service_format() {
    let info = BuildInfo::new("demo", "1", started());
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["started"], "2024-05-01T10:00:00.000+0000");
    let back: BuildInfo = serde_json::from_value(json).unwrap();
    assert_eq!(back.started, info.started);
    assert_eq!(info.timestamp_millis(), 1_714_557_600_000);
  }

  #[test]
  fn publication_drops_deployable_artifacts() {
    let mut info = BuildInfo::new("demo", "1", started());
    info.deployable_artifacts.push(DeployableArtifact::default());
    let json = serde_json::to_value(info.for_publication()).unwrap();
    assert!(json.get("deployableArtifacts").is_none());
  }

  #[test]
  fn retention_from_args() {
    let args = BTreeMap::from([
      ("maxBuilds".to_string(), "10".to_string()),
      ("maxDays".to_string(), "30".to_string()),
      ("deleteBuildArtifacts".to_string(), "true".to_string()),
      ("doNotDiscardBuilds".to_string(), "3, 5".to_string()),
      ("async".to_string(), "false".to_string()),
    ]);
    let retention = BuildRetention::from_args(&args).unwrap();
    assert_eq!(retention.max_builds, Some(10));
    assert_eq!(retention.max_days, Some(30));
    assert!(retention.delete_build_artifacts);
    assert_eq!(retention.builds_exempt_from_discard, vec!["3", "5"]);
    assert!(!retention.run_async);
  }

  #[test]
  fn retention_rejects_unknown_keys() {
    let args = BTreeMap::from([("maxBuild".to_string(), "10".to_string())]);
    let err = BuildRetention::from_args(&args).unwrap_err();
    assert!(matches!(err, ConfigError::DisallowedArgument { key, .. } if key == "maxBuild"));

    let args = BTreeMap::from([("maxDays".to_string(), "soon".to_string())]);
    assert!(matches!(
      BuildRetention::from_args(&args),
      Err(ConfigError::InvalidArgument { .. })
    ));
  }

  #[test]
  fn retention_request_body() {
    let retention = BuildRetention {
      max_days: Some(1),
      builds_exempt_from_discard: vec!["4".to_string()],
      ..Default::default()
    };
    let request = retention.to_request(started());
    assert_eq!(request.count, -1);
    assert_eq!(request.minimum_build_date.as_deref(), Some("2024-04-30T10:00:00.000+0000"));
    assert_eq!(request.build_numbers_not_to_be_discarded, vec!["4"]);
  }
}
