//! Captured container images and their conversion to build-info modules.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::buildinfo::{Artifact, Module};
use crate::consts::{PROP_DOCKER_CAPTURED_IMAGE, PROP_DOCKER_IMAGE_ID};
use crate::deploy::Properties;
use crate::util::hash::sha1_bytes;

const FOREIGN_LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

/// Errors from reading a captured image manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
  #[error("manifest is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error("schema v1 manifests are not supported")]
  SchemaV1,

  #[error("manifest has no {0}")]
  MissingField(&'static str),
}

/// An image pushed or pulled during a build, waiting to be folded into the
/// build-info that `build_info_id` correlates with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerImage {
  pub image_id: String,
  pub image_tag: String,
  pub target_repository: String,
  /// Correlation key, not unique.
  pub build_info_id: String,
  #[serde(default)]
  pub manifest: Option<String>,
  /// Node the image was captured on.
  #[serde(default)]
  pub agent_name: String,
  /// Extra module properties, such as the parent image.
  #[serde(default)]
  pub module_properties: BTreeMap<String, String>,
  /// Properties for the pushed layers.
  #[serde(default)]
  pub artifact_properties: Properties,
  pub created_at: DateTime<Utc>,
}

impl DockerImage {
  pub fn new(
    image_id: impl Into<String>,
    image_tag: impl Into<String>,
    target_repository: impl Into<String>,
    build_info_id: impl Into<String>,
    created_at: DateTime<Utc>,
  ) -> Self {
    Self {
      image_id: image_id.into(),
      image_tag: image_tag.into(),
      target_repository: target_repository.into(),
      build_info_id: build_info_id.into(),
      manifest: None,
      agent_name: String::new(),
      module_properties: BTreeMap::new(),
      artifact_properties: Properties::new(),
      created_at,
    }
  }

  pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
    self.manifest = Some(manifest.into());
    self
  }

  /// Whether a non-blank manifest has been captured.
  pub fn has_manifest(&self) -> bool {
    self.manifest.as_deref().is_some_and(|m| !m.trim().is_empty())
  }

  pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    match (now - self.created_at).to_std() {
      Ok(age) => age > ttl,
      Err(_) => false,
    }
  }

  /// Module id: the tag without its registry host.
  pub fn module_id(&self) -> &str {
    match self.image_tag.split_once('/') {
      Some((_, rest)) => rest,
      None => &self.image_tag,
    }
  }

  /// Fold the image into a build-info module.
  ///
  /// Without a captured manifest only the id and properties are set.
  pub fn to_module(&self) -> Result<Module, ManifestError> {
    let mut module = Module::new(self.module_id());
    module.module_type = Some("docker".to_string());
    module
      .properties
      .insert(PROP_DOCKER_IMAGE_ID.to_string(), sha_value(&self.image_id).to_string());
    module
      .properties
      .insert(PROP_DOCKER_CAPTURED_IMAGE.to_string(), self.image_tag.clone());
    module.properties.extend(self.module_properties.clone());

    let Some(manifest) = self.manifest.as_deref().filter(|m| !m.trim().is_empty()) else {
      return Ok(module);
    };
    for digest in layer_digests(manifest)? {
      let (algorithm, value) = (sha_version(&digest), sha_value(&digest));
      let mut artifact = Artifact {
        name: digest_to_file_name(&digest),
        ..Default::default()
      };
      match algorithm {
        "sha1" => artifact.sha1 = Some(value.to_string()),
        "sha256" => artifact.sha256 = Some(value.to_string()),
        _ => {}
      }
      module.artifacts.push(artifact);
    }
    Ok(module)
  }
}

/// Part of a digest after the algorithm prefix.
pub fn sha_value(digest: &str) -> &str {
  digest.split_once(':').map(|(_, v)| v).unwrap_or(digest)
}

/// Algorithm prefix of a digest, empty when absent.
pub fn sha_version(digest: &str) -> &str {
  digest.split_once(':').map(|(a, _)| a).unwrap_or("")
}

/// Repository file name a layer digest is stored under.
pub fn digest_to_file_name(digest: &str) -> String {
  if digest.starts_with("sha1") {
    return "manifest.json".to_string();
  }
  format!("{}__{}", sha_version(digest), sha_value(digest))
}

fn parse_v2(manifest: &str) -> Result<Value, ManifestError> {
  let tree: Value = serde_json::from_str(manifest)?;
  let version = tree
    .get("schemaVersion")
    .and_then(Value::as_i64)
    .ok_or(ManifestError::MissingField("schemaVersion"))?;
  if version == 1 {
    return Err(ManifestError::SchemaV1);
  }
  Ok(tree)
}

fn config_digest_of(tree: &Value) -> Result<String, ManifestError> {
  tree
    .get("config")
    .ok_or(ManifestError::MissingField("config"))?
    .get("digest")
    .and_then(Value::as_str)
    .map(str::to_string)
    .ok_or(ManifestError::MissingField("config digest"))
}

/// Layer digests of a schema v2 manifest.
///
/// Foreign layers are skipped. The config digest and `sha1:` of the manifest
/// text itself are appended.
pub fn layer_digests(manifest: &str) -> Result<Vec<String>, ManifestError> {
  let tree = parse_v2(manifest)?;
  let layers = tree
    .get("layers")
    .and_then(Value::as_array)
    .ok_or(ManifestError::MissingField("layers"))?;

  let mut digests = Vec::with_capacity(layers.len() + 2);
  for layer in layers {
    if layer.get("mediaType").and_then(Value::as_str) == Some(FOREIGN_LAYER_MEDIA_TYPE) {
      continue;
    }
    let digest = layer
      .get("digest")
      .and_then(Value::as_str)
      .ok_or(ManifestError::MissingField("layer digest"))?;
    digests.push(digest.to_string());
  }
  digests.push(config_digest_of(&tree)?);
  digests.push(format!("sha1:{}", sha1_bytes(manifest.as_bytes())));
  Ok(digests)
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  pub(crate) const MANIFEST: &str = r#"{
    "schemaVersion": 2,
    "config": {"digest": "sha256:cfg"},
    "layers": [
      {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": "sha256:l1"},
      {"mediaType": "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip", "digest": "sha256:win"},
      {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": "sha256:l2"}
    ]
  }"#;

  fn image() -> DockerImage {
    DockerImage::new("sha256:abc", "registry.local:5000/team/app:1.0", "docker-local", "42", Utc::now())
  }

  #[test]
  fn layer_digests_skip_foreign_and_append_config_and_manifest() {
    let digests = layer_digests(MANIFEST).unwrap();
    assert_eq!(digests[..3].to_vec(), vec!["sha256:l1", "sha256:l2", "sha256:cfg"]);
    assert_eq!(digests[3], format!("sha1:{}", sha1_bytes(MANIFEST.as_bytes())));
  }

  #[test]
  fn schema_v1_is_rejected() {
    let v1 = r#"{"schemaVersion": 1, "fsLayers": []}"#;
    assert!(matches!(layer_digests(v1), Err(ManifestError::SchemaV1)));
    assert!(matches!(layer_digests("{}"), Err(ManifestError::MissingField("schemaVersion"))));
  }

  #[test]
  fn digest_file_names() {
    assert_eq!(digest_to_file_name("sha256:abc"), "sha256__abc");
    assert_eq!(digest_to_file_name("sha1:abc"), "manifest.json");
  }

  #[test]
  fn module_id_strips_registry_host() {
    assert_eq!(image().module_id(), "team/app:1.0");
    let local = DockerImage::new("sha256:abc", "app:1.0", "r", "1", Utc::now());
    assert_eq!(local.module_id(), "app:1.0");
  }

  #[test]
  fn module_from_captured_image() {
    let mut image = image().with_manifest(MANIFEST);
    image
      .module_properties
      .insert("docker.image.parent".to_string(), "base".to_string());
    let module = image.to_module().unwrap();

    assert_eq!(module.id, "team/app:1.0");
    assert_eq!(module.properties["docker.image.id"], "abc");
    assert_eq!(module.properties["docker.captured.image"], "registry.local:5000/team/app:1.0");
    assert_eq!(module.properties["docker.image.parent"], "base");
    let names: Vec<_> = module.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["sha256__l1", "sha256__l2", "sha256__cfg", "manifest.json"]);
    assert_eq!(module.artifacts[0].sha256.as_deref(), Some("l1"));
    assert!(module.artifacts[3].sha1.is_some());
  }

  #[test]
  fn expiry_uses_ttl() {
    let now = Utc::now();
    let image = DockerImage::new("i", "t", "r", "1", now - chrono::Duration::hours(13));
    assert!(image.is_expired(now, Duration::from_secs(12 * 3600)));
    assert!(!image.is_expired(now, Duration::from_secs(14 * 3600)));
  }
}
