//! Pattern-based artifact resolution.
//!
//! Expands `source => target` pattern pairs into concrete files found in a
//! workspace. See [`ant`] for the matching rules.

pub mod ant;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

pub use ant::{AntPattern, normalize_separators};

/// Errors raised while scanning the workspace.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
  #[error("failed to scan {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

/// One `source => target` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternPair {
  pub source: String,
  pub target: String,
}

impl PatternPair {
  pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      target: target.into(),
    }
  }
}

/// A workspace file matched by a pattern pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedFile {
  /// Target path from the pattern pair, normalized (no leading `/`).
  pub target_path: String,
  /// Path below the target that the file lands on.
  ///
  /// The file name for plain patterns; the path below the pattern's fixed base
  /// directory for `**` patterns.
  pub relative_path: String,
  pub file: PathBuf,
}

/// Parse a multi-line pattern list.
///
/// Commas and CRLF are treated as line breaks. Lines without `=>` get an empty
/// target. Blank lines are skipped.
pub fn parse_pattern_pairs(text: &str) -> Vec<PatternPair> {
  text
    .replace("\r\n", "\n")
    .replace(',', "\n")
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(|line| match line.split_once("=>") {
      Some((source, target)) => PatternPair::new(normalize_separators(source.trim()), target.trim()),
      None => PatternPair::new(normalize_separators(line), ""),
    })
    .filter(|pair| !pair.source.is_empty())
    .collect()
}

/// Normalize a target path: `/` separators, no leading `/`, no doubled `/`.
pub fn normalize_target(target: &str) -> String {
  let mut out = normalize_separators(target.trim());
  while out.contains("//") {
    out = out.replace("//", "/");
  }
  out.trim_start_matches('/').to_string()
}

fn is_absolute_pattern(source: &str) -> bool {
  let bytes = source.as_bytes();
  source.starts_with('/') || (bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/')
}

/// Resolve every pattern pair against `workspace`.
///
/// Pairs that match nothing produce a warning, not an error. Ordering of the
/// result is not part of the contract.
pub fn resolve(workspace: &Path, pairs: &[PatternPair]) -> Result<Vec<ResolvedFile>, PatternError> {
  let mut resolved = Vec::new();
  for pair in pairs {
    let found = resolve_pair(workspace, pair)?;
    if found.is_empty() {
      warn!(pattern = %pair.source, "no artifacts matched pattern");
    }
    resolved.extend(found);
  }
  Ok(resolved)
}

/// Resolve a single pattern pair.
pub fn resolve_pair(workspace: &Path, pair: &PatternPair) -> Result<Vec<ResolvedFile>, PatternError> {
  let source = normalize_separators(&pair.source);
  let absolute = is_absolute_pattern(&source);
  let pattern = AntPattern::new(&source);
  let base = pattern.base_dir();
  let remainder = pattern.remainder();
  let recursive = pattern.is_recursive();
  let target_path = normalize_target(&pair.target);

  let root = if absolute {
    if source.starts_with('/') {
      PathBuf::from(format!("/{base}"))
    } else {
      PathBuf::from(&base)
    }
  } else if base.is_empty() {
    workspace.to_path_buf()
  } else {
    workspace.join(&base)
  };

  debug!(root = ?root, pattern = %remainder, "scanning for artifacts");
  if !root.is_dir() {
    return Ok(Vec::new());
  }

  let mut found = Vec::new();
  for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
    let entry = entry.map_err(|source| PatternError::Walk {
      path: root.clone(),
      source,
    })?;
    if !entry.file_type().is_file() {
      continue;
    }
    let Ok(rel) = entry.path().strip_prefix(&root) else {
      continue;
    };
    let rel = normalize_separators(&rel.to_string_lossy());
    if !remainder.matches(&rel) {
      continue;
    }
    let relative_path = if recursive {
      rel.clone()
    } else {
      entry.file_name().to_string_lossy().into_owned()
    };
    found.push(ResolvedFile {
      target_path: target_path.clone(),
      relative_path,
      file: entry.path().to_path_buf(),
    });
  }
  Ok(found)
}
