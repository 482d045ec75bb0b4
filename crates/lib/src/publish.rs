//! End-to-end publishing of one build.
//!
//! ```text
//! patterns ─▶ resolved files ─▶ deploy details ─▶ uploads ─┐
//! resolve patterns ─▶ downloads ─▶ dependencies ───────────┼─▶ build-info ─▶ publish (+ retention)
//! agents ─▶ claimed images ─▶ docker modules ──────────────┘
//! ```
//!
//! Each step can also run on its own; the CLI uses them to accumulate a
//! stored build-info across invocations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::buildinfo::{
  BuildInfo, BuildInfoComposer, BuildRetention, DeployableArtifact, StoreError, VariableFilter, publish,
};
use crate::client::{ClientError, RepositoryClient};
use crate::config::ConfigError;
use crate::configurator::DeployConfigurator;
use crate::deploy::detail::merge_properties;
use crate::deploy::{
  ArtifactDeployer, BuildProperties, DeployDetailBuilder, DeployError, DetailError, parse_matrix_params,
};
use crate::docker::AgentFleet;
use crate::pattern::{PatternError, parse_pattern_pairs, resolve};
use crate::resolve::{DependencyResolver, ResolveError};

/// Any failure that aborts the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Pattern(#[from] PatternError),

  #[error(transparent)]
  Detail(#[from] DetailError),

  #[error(transparent)]
  Deploy(#[from] DeployError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Client(#[from] ClientError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// What a pipeline run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
  pub build_name: String,
  pub build_number: String,
  /// Artifacts uploaded.
  pub artifacts: usize,
  /// Artifacts recorded for the build tool to upload.
  pub deployable: usize,
  pub dependencies: usize,
  pub build_dependencies: usize,
  pub docker_modules: usize,
  pub modules: usize,
  pub retention_applied: bool,
}

/// Deploy property set for a build-info.
pub fn build_properties(info: &BuildInfo) -> BuildProperties {
  BuildProperties {
    build_name: info.name.clone(),
    build_number: info.number.clone(),
    timestamp: info.timestamp_millis(),
    vcs_revision: info.vcs.last().map(|v| v.revision.clone()),
    parent_name: info.parent_name.clone(),
    parent_number: info.parent_number.clone(),
  }
}

/// Runs the publishing pipeline against one repository.
#[derive(Clone)]
pub struct BuildPublisher {
  client: Arc<dyn RepositoryClient>,
  workspace: PathBuf,
  threads: usize,
  module_id: Option<String>,
  env: BTreeMap<String, String>,
  filter: VariableFilter,
  capture_env: bool,
  resolve_pattern: Option<String>,
  flat: bool,
  fleet: Option<AgentFleet>,
  build_info_id: Option<String>,
  retention: Option<BuildRetention>,
}

impl BuildPublisher {
  pub fn new(client: Arc<dyn RepositoryClient>, workspace: PathBuf) -> Self {
    Self {
      client,
      workspace,
      threads: 1,
      module_id: None,
      env: BTreeMap::new(),
      filter: VariableFilter::default(),
      capture_env: false,
      resolve_pattern: None,
      flat: false,
      fleet: None,
      build_info_id: None,
      retention: None,
    }
  }

  pub fn with_threads(mut self, threads: usize) -> Self {
    self.threads = threads.max(1);
    self
  }

  /// Record artifacts and dependencies under this module instead of the
  /// build's default module.
  pub fn with_module_id(mut self, module_id: Option<String>) -> Self {
    self.module_id = module_id.filter(|m| !m.is_empty());
    self
  }

  /// Variables for `${VAR}` expansion, and for capture when enabled.
  pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
    self.env = env;
    self
  }

  pub fn with_env_capture(mut self, filter: VariableFilter, capture: bool) -> Self {
    self.filter = filter;
    self.capture_env = capture;
    self
  }

  pub fn with_resolve(mut self, pattern: Option<String>, flat: bool) -> Self {
    self.resolve_pattern = pattern.filter(|p| !p.trim().is_empty());
    self.flat = flat;
    self
  }

  /// Collect container images correlated by `build_info_id` from `fleet`.
  pub fn with_docker(mut self, fleet: AgentFleet, build_info_id: impl Into<String>) -> Self {
    self.fleet = Some(fleet);
    self.build_info_id = Some(build_info_id.into());
    self
  }

  pub fn with_retention(mut self, retention: Option<BuildRetention>) -> Self {
    self.retention = retention;
    self
  }

  /// Resolve, checksum and upload the configurator's pattern block, recording
  /// the result in `info`.
  ///
  /// With an overriding deployer nothing is uploaded; the details become
  /// deployable artifacts.
  pub async fn deploy(
    &self,
    info: &mut BuildInfo,
    configurator: &dyn DeployConfigurator,
  ) -> Result<PublishSummary, PublishError> {
    let repository = configurator.repository_key();
    if repository.trim().is_empty() {
      return Err(ConfigError::MissingArgument("repository".to_string()).into());
    }
    let pairs = parse_pattern_pairs(&crate::util::expand::expand_vars(configurator.deploy_pattern(), &self.env));
    if pairs.is_empty() {
      return Err(ConfigError::MissingArgument("pattern".to_string()).into());
    }

    let files = resolve(&self.workspace, &pairs)?;
    let mut properties = build_properties(info).to_properties();
    merge_properties(&mut properties, &parse_matrix_params(configurator.matrix_params(), &self.env));
    let details = DeployDetailBuilder::new(repository, properties).build(&files)?;

    let mut summary = self.summary_for(info);
    if configurator.is_overriding_deployer() {
      let deployable: Vec<DeployableArtifact> = details.iter().map(DeployableArtifact::from).collect();
      summary.deployable = deployable.len();
      info!(count = summary.deployable, "recorded deployable artifacts");
      info.deployable_artifacts.extend(deployable);
      return Ok(summary);
    }

    let artifacts = ArtifactDeployer::new(self.client.clone())
      .with_threads(self.threads)
      .deploy(&details)
      .await?;
    summary.artifacts = artifacts.len();
    if !artifacts.is_empty() {
      info.append_artifacts(artifacts, self.module_id.as_deref());
    }
    Ok(summary)
  }

  /// Download the resolve pattern's dependencies and record them in `info`.
  pub async fn resolve_dependencies(&self, info: &mut BuildInfo) -> Result<PublishSummary, PublishError> {
    let mut summary = self.summary_for(info);
    let Some(pattern) = &self.resolve_pattern else {
      return Ok(summary);
    };
    let outcome = DependencyResolver::new(self.client.clone(), self.workspace.clone())
      .with_flat(self.flat)
      .with_dependencies(true)
      .retrieve(&crate::util::expand::expand_vars(pattern, &self.env))
      .await?;
    summary.dependencies = outcome.dependencies.len();
    summary.build_dependencies = outcome.build_dependencies.len();
    if !outcome.dependencies.is_empty() {
      info.append_dependencies(outcome.dependencies, self.module_id.as_deref());
    }
    info.add_build_dependencies(outcome.build_dependencies);
    Ok(summary)
  }

  /// Run every step and publish.
  pub async fn run(
    &self,
    mut info: BuildInfo,
    configurator: &dyn DeployConfigurator,
  ) -> Result<(BuildInfo, PublishSummary), PublishError> {
    let resolved = self.resolve_dependencies(&mut info).await?;
    let deployed = self.deploy(&mut info, configurator).await?;

    let images = match (&self.fleet, &self.build_info_id) {
      (Some(fleet), Some(id)) => fleet.collect_from_all_agents(id).await,
      _ => Vec::new(),
    };

    let mut composer = BuildInfoComposer::new(info).with_env_filter(self.filter.clone(), self.capture_env);
    if let Some(retention) = &self.retention {
      composer = composer.with_retention(retention.clone());
    }
    let docker_modules = composer.add_docker_images(&images);
    composer.capture_env(self.env.clone());
    let info = composer.compose();

    self.publish(info, PublishSummary {
      artifacts: deployed.artifacts,
      deployable: deployed.deployable,
      dependencies: resolved.dependencies,
      build_dependencies: resolved.build_dependencies,
      docker_modules,
      ..PublishSummary::default()
    })
    .await
  }

  /// Publish an already composed build-info.
  pub async fn publish(
    &self,
    info: BuildInfo,
    counts: PublishSummary,
  ) -> Result<(BuildInfo, PublishSummary), PublishError> {
    publish(self.client.as_ref(), &info).await?;
    let summary = PublishSummary {
      build_name: info.name.clone(),
      build_number: info.number.clone(),
      modules: info.modules.len(),
      retention_applied: info.build_retention.as_ref().is_some_and(BuildRetention::is_active),
      ..counts
    };
    info!(
      build = %summary.build_name,
      number = %summary.build_number,
      artifacts = summary.artifacts,
      dependencies = summary.dependencies,
      modules = summary.modules,
      "build published"
    );
    Ok((info, summary))
  }

  fn summary_for(&self, info: &BuildInfo) -> PublishSummary {
    PublishSummary {
      build_name: info.name.clone(),
      build_number: info.number.clone(),
      ..PublishSummary::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::buildinfo::Vcs;
  use crate::client::PatternSearchResult;
  use crate::configurator::GenericConfigurator;
  use crate::docker::{AgentHandler, DockerImage, ImageStore, InMemoryImageStore};
  use crate::util::testutil::FakeRepository;
  use chrono::Utc;
  use std::fs;
  use tempfile::{TempDir, tempdir};

  fn workspace() -> TempDir {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join("build")).unwrap();
    fs::write(temp.path().join("build/a.jar"), "a").unwrap();
    fs::write(temp.path().join("build/b.jar"), "b").unwrap();
    temp
  }

  fn info() -> BuildInfo {
    let mut info = BuildInfo::new("app", "7", Utc::now());
    info.vcs.push(Vcs {
      revision: "abc123".to_string(),
      ..Default::default()
    });
    info
  }

  #[tokio::test]
  async fn deploy_uploads_with_build_properties() {
    let temp = workspace();
    let repo = Arc::new(FakeRepository::default());
    let configurator = GenericConfigurator::new("libs", "build/*.jar => release/").with_matrix_params("team=${TEAM}");
    let publisher = BuildPublisher::new(repo.clone(), temp.path().to_path_buf())
      .with_env(BTreeMap::from([("TEAM".to_string(), "core".to_string())]));

    let mut info = info();
    let summary = publisher.deploy(&mut info, &configurator).await.unwrap();

    assert_eq!(summary.artifacts, 2);
    assert_eq!(repo.uploaded_paths(), vec!["libs/release/a.jar", "libs/release/b.jar"]);
    let props = repo.uploaded_properties("release/a.jar").unwrap();
    assert_eq!(props["build.name"], vec!["app"]);
    assert_eq!(props["vcs.revision"], vec!["abc123"]);
    assert_eq!(props["team"], vec!["core"]);
    assert_eq!(info.module("app:7").unwrap().artifacts.len(), 2);
  }

  #[test]
  fn latest_revision_is_stamped() {
    let mut info = info();
    info.vcs.push(Vcs {
      revision: "def456".to_string(),
      ..Default::default()
    });
    assert_eq!(build_properties(&info).vcs_revision.as_deref(), Some("def456"));
  }

  #[tokio::test]
  async fn overriding_deployer_records_instead_of_uploading() {
    let temp = workspace();
    let repo = Arc::new(FakeRepository::default());
    let configurator = GenericConfigurator::new("libs", "build/*.jar => release/").with_override_deployer(true);

    let mut info = info();
    let summary = BuildPublisher::new(repo.clone(), temp.path().to_path_buf())
      .deploy(&mut info, &configurator)
      .await
      .unwrap();

    assert_eq!(summary.deployable, 2);
    assert!(repo.uploaded_paths().is_empty());
    assert_eq!(info.deployable_artifacts[0].remote_path, "release/a.jar");
  }

  #[tokio::test]
  async fn missing_repository_fails_before_any_call() {
    let temp = workspace();
    let repo = Arc::new(FakeRepository::default());
    let err = BuildPublisher::new(repo.clone(), temp.path().to_path_buf())
      .deploy(&mut info(), &GenericConfigurator::new("", "build/*.jar"))
      .await
      .unwrap_err();
    assert!(matches!(err, PublishError::Config(ConfigError::MissingArgument(_))));
    assert!(repo.calls().is_empty());
  }

  #[tokio::test]
  async fn full_run_composes_and_publishes() {
    let temp = workspace();
    let repo = Arc::new(FakeRepository::default());
    repo.add_search_result(
      "deps:com/acme/*.jar",
      PatternSearchResult {
        repo_uri: "http://fake/deps".to_string(),
        source_pattern: String::new(),
        files: vec!["com/acme/lib.jar".to_string()],
      },
    );
    repo.add_file("http://fake/deps/com/acme/lib.jar", b"lib");

    let store = Arc::new(InMemoryImageStore::default());
    store.register(DockerImage::new("sha256:i", "host/web:7", "docker", "b-7", Utc::now()).with_manifest(
      r#"{"schemaVersion":2,"config":{"digest":"sha256:c"},"layers":[]}"#,
    ));
    let fleet = AgentFleet::new(AgentHandler::new("controller", store.clone()));

    let (published, summary) = BuildPublisher::new(repo.clone(), temp.path().to_path_buf())
      .with_resolve(Some("deps:com/acme/*.jar => libs".to_string()), false)
      .with_docker(fleet, "b-7")
      .with_retention(Some(BuildRetention {
        max_builds: Some(10),
        ..Default::default()
      }))
      .run(info(), &GenericConfigurator::new("libs", "build/*.jar => release/"))
      .await
      .unwrap();

    assert_eq!(summary.artifacts, 2);
    assert_eq!(summary.dependencies, 1);
    assert_eq!(summary.docker_modules, 1);
    assert_eq!(summary.modules, 2);
    assert!(summary.retention_applied);
    assert!(store.is_empty());
    assert!(temp.path().join("libs/lib.jar").is_file());
    assert_eq!(repo.published_builds().len(), 1);
    assert_eq!(published.module("app:7").unwrap().dependencies[0].id, "libs/lib.jar");
    assert!(repo.calls().contains(&"retention app".to_string()));
  }
}
