//! Assembling and publishing a build-info.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use super::env::{VariableFilter, capture_variables};
use super::types::{Artifact, BuildDependency, BuildInfo, BuildRetention, DeployableArtifact, Dependency};
use crate::client::{ClientError, RepositoryClient};
use crate::docker::{DockerImage, images_to_modules};

/// Folds the outputs of a build's phases into one [`BuildInfo`].
///
/// Variables matching the deny list are stripped from the properties when the
/// manifest is composed, whether or not environment capture is enabled.
#[derive(Debug, Clone)]
pub struct BuildInfoComposer {
  info: BuildInfo,
  filter: VariableFilter,
  capture_env: bool,
}

impl BuildInfoComposer {
  pub fn new(info: BuildInfo) -> Self {
    Self {
      info,
      filter: VariableFilter::default(),
      capture_env: false,
    }
  }

  /// Set the variable filter and whether environment capture is enabled.
  pub fn with_env_filter(mut self, filter: VariableFilter, capture: bool) -> Self {
    self.filter = filter;
    self.capture_env = capture;
    self
  }

  pub fn with_retention(mut self, retention: BuildRetention) -> Self {
    self.info.build_retention = Some(retention);
    self
  }

  pub fn info(&self) -> &BuildInfo {
    &self.info
  }

  pub fn add_artifacts(&mut self, artifacts: Vec<Artifact>, module_id: Option<&str>) {
    if !artifacts.is_empty() {
      self.info.append_artifacts(artifacts, module_id);
    }
  }

  pub fn add_dependencies(&mut self, dependencies: Vec<Dependency>, module_id: Option<&str>) {
    if !dependencies.is_empty() {
      self.info.append_dependencies(dependencies, module_id);
    }
  }

  pub fn add_build_dependencies(&mut self, dependencies: Vec<BuildDependency>) {
    self.info.add_build_dependencies(dependencies);
  }

  pub fn add_deployable(&mut self, deployable: Vec<DeployableArtifact>) {
    self.info.deployable_artifacts.extend(deployable);
  }

  /// One module per claimed image.
  /// Add one module per image tag, returning how many distinct modules the
  /// images produced. Images sharing a tag merge into one module.
  pub fn add_docker_images(&mut self, images: &[DockerImage]) -> usize {
    let mut ids = BTreeSet::new();
    for module in images_to_modules(images) {
      ids.insert(module.id.clone());
      self.info.add_module(module);
    }
    ids.len()
  }

  /// Record environment variables and host facts. A no-op unless capture is
  /// enabled.
  pub fn capture_env<I>(&mut self, vars: I) -> usize
  where
    I: IntoIterator<Item = (String, String)>,
  {
    if !self.capture_env {
      return 0;
    }
    let captured = capture_variables(&self.filter, vars);
    let count = captured.len();
    self.info.properties.extend(captured);
    count
  }

  /// Merge properties gathered elsewhere (for example a stored partial build).
  pub fn add_properties(&mut self, properties: BTreeMap<String, String>) {
    self.info.properties.extend(properties);
  }

  /// The finished manifest.
  pub fn compose(mut self) -> BuildInfo {
    self.filter.scrub_properties(&mut self.info.properties);
    self.info
  }
}

/// Publish a build-info, then apply its retention policy if one is attached.
pub async fn publish(client: &dyn RepositoryClient, info: &BuildInfo) -> Result<(), ClientError> {
  info!(
    build = %info.name,
    number = %info.number,
    modules = info.modules.len(),
    "publishing build-info"
  );
  client.publish_build_info(info).await?;

  match &info.build_retention {
    Some(retention) if retention.is_active() => {
      info!(
        build = %info.name,
        max_builds = ?retention.max_builds,
        max_days = ?retention.max_days,
        run_async = retention.run_async,
        "applying build retention"
      );
      client.apply_retention(&info.name, retention).await?;
    }
    Some(_) => warn!(build = %info.name, "retention policy has no limits, skipping"),
    None => {}
  }
  Ok(())
}
