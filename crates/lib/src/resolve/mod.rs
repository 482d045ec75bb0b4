//! Dependency resolution.
//!
//! Resolve patterns take the deploy-pattern shape `source => target`, with two
//! extensions:
//!
//! - `repo:path/*.jar;k=v;k2=v2 => libs`: matrix parameters after the first `;`
//!   are appended to every download URL.
//! - `@name#number:pattern => libs`: a build reference. The pattern is resolved
//!   against the artifacts the named build recorded, not by a live search.
//!
//! Both paths produce [`DownloadableArtifact`]s for the [`download`] primitive.

pub mod download;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use download::Downloader;

use crate::buildinfo::{BuildDependency, Dependency};
use crate::client::{BuildPatternRequest, ClientError, PatternEntry, RepositoryClient, join_url};
use crate::pattern::ant::{AntPattern, normalize_separators};
use crate::pattern::{PatternPair, normalize_target, parse_pattern_pairs};
use crate::util::hash::ChecksumError;

/// Errors from dependency resolution and download.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
  #[error("invalid build reference '{0}', expected @name#number:pattern")]
  InvalidBuildReference(String),

  #[error("pattern search for '{pattern}' failed: {source}")]
  Search {
    pattern: String,
    #[source]
    source: ClientError,
  },

  #[error("failed to download {url}: {source}")]
  Download {
    url: String,
    #[source]
    source: ClientError,
  },

  #[error("I/O error for {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Checksum(#[from] ChecksumError),

  #[error("checksum worker failed: {0}")]
  Worker(String),

  #[error("refusing to write '{0}' outside the target directory")]
  UnsafePath(String),
}

/// Another build named in a resolve pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BuildReference {
  pub name: String,
  pub number: String,
}

/// One parsed resolve line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvePattern {
  /// Search pattern without matrix parameters or build reference.
  pub pattern: String,
  /// Local directory relative to the workspace.
  pub target: String,
  /// `k=v;k2=v2`, empty when absent.
  pub matrix_params: String,
  pub build: Option<BuildReference>,
}

impl ResolvePattern {
  fn from_pair(pair: &PatternPair) -> Result<Self, ResolveError> {
    let source = pair.source.trim();
    let (build, rest) = match source.strip_prefix('@') {
      Some(reference) => {
        let invalid = || ResolveError::InvalidBuildReference(source.to_string());
        let (name, rest) = reference.split_once('#').ok_or_else(invalid)?;
        let (number, pattern) = rest.split_once(':').ok_or_else(invalid)?;
        if name.is_empty() || number.is_empty() || pattern.is_empty() {
          return Err(invalid());
        }
        (
          Some(BuildReference {
            name: name.to_string(),
            number: number.to_string(),
          }),
          pattern,
        )
      }
      None => (None, source),
    };
    let (pattern, matrix_params) = match rest.split_once(';') {
      Some((pattern, params)) => (pattern, params.trim_matches(';')),
      None => (rest, ""),
    };
    Ok(Self {
      pattern: pattern.trim().to_string(),
      target: normalize_target(&pair.target),
      matrix_params: matrix_params.to_string(),
      build,
    })
  }

  /// Path part of the pattern, without a leading `repo:`.
  fn path_pattern(&self) -> &str {
    match self.pattern.split_once(':') {
      Some((_, path)) => path,
      None => &self.pattern,
    }
  }

  /// Local path below the target for a matched remote path.
  ///
  /// Recursive patterns keep the structure below their fixed base directory;
  /// others keep only the file name.
  pub fn local_path(&self, remote_path: &str) -> String {
    let remote_path = normalize_separators(remote_path);
    let file_name = remote_path.rsplit('/').next().unwrap_or(&remote_path).to_string();
    let ant = AntPattern::new(self.path_pattern());
    if !ant.is_recursive() {
      return file_name;
    }
    let base = ant.base_dir();
    if base.is_empty() {
      return remote_path.trim_start_matches('/').to_string();
    }
    match remote_path.trim_start_matches('/').strip_prefix(&base) {
      Some(rest) => rest.trim_start_matches('/').to_string(),
      None => file_name,
    }
  }
}

/// Parse a resolve pattern block (same line rules as deploy patterns).
pub fn parse_resolve_patterns(text: &str) -> Result<Vec<ResolvePattern>, ResolveError> {
  parse_pattern_pairs(text).iter().map(ResolvePattern::from_pair).collect()
}

/// One remote file to fetch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DownloadableArtifact {
  /// URL of the repository holding the file.
  pub repo_url: String,
  /// Target directory relative to the workspace.
  pub relative_target_dir: String,
  /// File path relative to `repo_url`.
  pub remote_file_path: String,
  /// Path below `relative_target_dir` the file is written to.
  pub local_path: String,
  /// `k=v;k2=v2`, empty when absent.
  pub matrix_params: String,
}

impl DownloadableArtifact {
  /// Full URL including matrix parameters.
  pub fn download_url(&self) -> String {
    let url = join_url(&self.repo_url, &self.remote_file_path);
    if self.matrix_params.is_empty() {
      url
    } else {
      format!("{url};{}", self.matrix_params)
    }
  }

  /// Workspace-relative destination. Flat mode drops the directory part.
  ///
  /// Remote paths containing `..` are rejected.
  pub fn relative_file_path(&self, flat: bool) -> Result<String, ResolveError> {
    let local = normalize_separators(&self.local_path);
    if local.split('/').any(|segment| segment == "..") {
      return Err(ResolveError::UnsafePath(self.local_path.clone()));
    }
    let local = if flat {
      local.rsplit('/').next().unwrap_or(&local).to_string()
    } else {
      local
    };
    Ok(crate::deploy::detail::join_artifact_path(&self.relative_target_dir, &local))
  }
}

/// Everything one resolve run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOutcome {
  pub dependencies: Vec<Dependency>,
  pub build_dependencies: Vec<BuildDependency>,
}

/// Turns resolve patterns into downloaded files.
#[derive(Clone)]
pub struct DependencyResolver {
  client: Arc<dyn RepositoryClient>,
  downloader: Downloader,
}

impl DependencyResolver {
  pub fn new(client: Arc<dyn RepositoryClient>, workspace: PathBuf) -> Self {
    Self {
      downloader: Downloader::new(client.clone(), workspace),
      client,
    }
  }

  pub fn with_flat(mut self, flat: bool) -> Self {
    self.downloader = self.downloader.with_flat(flat);
    self
  }

  /// Record downloaded files as build-info dependencies.
  pub fn with_dependencies(mut self, include: bool) -> Self {
    self.downloader = self.downloader.with_dependencies(include);
    self
  }

  /// Resolve and download everything a pattern block names.
  pub async fn retrieve(&self, text: &str) -> Result<ResolveOutcome, ResolveError> {
    let patterns = parse_resolve_patterns(text)?;
    let (published, referenced): (Vec<_>, Vec<_>) = patterns.into_iter().partition(|p| p.build.is_none());

    let mut artifacts = self.resolve_published(&published).await?;
    let (build_artifacts, build_dependencies) = self.resolve_builds(&referenced).await?;
    artifacts.extend(build_artifacts);

    let dependencies = self.downloader.download(&artifacts).await?;
    info!(
      dependencies = dependencies.len(),
      builds = build_dependencies.len(),
      "resolved dependencies"
    );
    Ok(ResolveOutcome {
      dependencies,
      build_dependencies,
    })
  }

  /// Match published patterns with a repository-wide search.
  pub async fn resolve_published(
    &self,
    patterns: &[ResolvePattern],
  ) -> Result<Vec<DownloadableArtifact>, ResolveError> {
    let mut artifacts = Vec::new();
    for pattern in patterns.iter().filter(|p| p.build.is_none()) {
      debug!(pattern = %pattern.pattern, "searching repository");
      let result = match self.client.search_pattern(&pattern.pattern).await {
        Ok(result) => result,
        Err(e) if e.is_not_found() => {
          warn!(pattern = %pattern.pattern, "pattern search found no repository");
          continue;
        }
        Err(source) => {
          return Err(ResolveError::Search {
            pattern: pattern.pattern.clone(),
            source,
          });
        }
      };
      if result.files.is_empty() {
        warn!(pattern = %pattern.pattern, "no artifacts matched pattern");
      }
      for file in &result.files {
        artifacts.push(DownloadableArtifact {
          repo_url: result.repo_uri.clone(),
          relative_target_dir: pattern.target.clone(),
          remote_file_path: file.clone(),
          local_path: pattern.local_path(file),
          matrix_params: pattern.matrix_params.clone(),
        });
      }
    }
    Ok(artifacts)
  }

  /// Match build-reference patterns against the referenced builds' artifacts.
  pub async fn resolve_builds(
    &self,
    patterns: &[ResolvePattern],
  ) -> Result<(Vec<DownloadableArtifact>, Vec<BuildDependency>), ResolveError> {
    let mut grouped: BTreeMap<BuildReference, Vec<&ResolvePattern>> = BTreeMap::new();
    for pattern in patterns {
      if let Some(build) = &pattern.build {
        grouped.entry(build.clone()).or_default().push(pattern);
      }
    }
    if grouped.is_empty() {
      return Ok((Vec::new(), Vec::new()));
    }

    let groups: Vec<(BuildReference, Vec<&ResolvePattern>)> = grouped.into_iter().collect();
    let requests: Vec<BuildPatternRequest> = groups
      .iter()
      .map(|(build, patterns)| BuildPatternRequest {
        build_name: build.name.clone(),
        build_number: build.number.clone(),
        transitive: false,
        patterns: patterns
          .iter()
          .map(|p| PatternEntry {
            pattern: p.pattern.clone(),
          })
          .collect(),
      })
      .collect();

    let results = self
      .client
      .build_pattern_artifacts(&requests)
      .await
      .map_err(|source| ResolveError::Search {
        pattern: requests
          .iter()
          .map(|r| format!("@{}#{}", r.build_name, r.build_number))
          .collect::<Vec<_>>()
          .join(","),
        source,
      })?;

    let mut artifacts = Vec::new();
    let mut build_dependencies = Vec::new();
    for ((build, patterns), result) in groups.iter().zip(results) {
      build_dependencies.push(BuildDependency {
        name: result.build_name.clone(),
        number: result.build_number.clone(),
        started: result.started.clone(),
        url: result.url.clone(),
      });
      let mut matched = 0usize;
      for (pattern, pattern_result) in patterns.iter().zip(&result.pattern_results) {
        for found in &pattern_result.pattern_artifacts {
          let Some((repo, path)) = found.uri.trim_start_matches('/').split_once('/') else {
            warn!(uri = %found.uri, "skipping build artifact without repository path");
            continue;
          };
          matched += 1;
          artifacts.push(DownloadableArtifact {
            repo_url: join_url(self.client.base_url(), repo),
            relative_target_dir: pattern.target.clone(),
            remote_file_path: path.to_string(),
            local_path: pattern.local_path(path),
            matrix_params: pattern.matrix_params.clone(),
          });
        }
      }
      if matched == 0 {
        warn!(build = %build.name, number = %build.number, "no artifacts matched build patterns");
      }
    }
    Ok((artifacts, build_dependencies))
  }
}
