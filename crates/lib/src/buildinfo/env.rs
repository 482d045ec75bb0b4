//! Environment capture and secret filtering.
//!
//! Keys are matched case-insensitively against include/exclude wildcard lists.
//! The default exclude list is always applied. Values that look like known
//! credential formats are redacted regardless of their key.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::EnvConfig;
use crate::consts::{DEFAULT_ENV_EXCLUDES, ENV_PROPERTY_PREFIX};
use crate::pattern::AntPattern;

/// Replacement for redacted values.
pub const REDACTED: &str = "***";

/// Known credential formats: a fixed prefix and a minimum total length.
const SECRET_FORMATS: &[(&str, usize)] = &[
  // API keys
  ("AKCp8", 73),
  // Reference tokens
  ("cmVmdGtuOjAxOj", 64),
  // Access tokens (JWT header of the repository's token service)
  ("eyJ2ZXIiOiIyIiwidHlwIjoiSldUIiwiYWxnIjoiUlMyNTYiLCJraWQiOiJ", 128),
];

/// Whether `value` contains something shaped like a known credential.
///
/// Best-effort only: any whitespace-separated token is checked against the
/// prefix and minimum-length table.
pub fn looks_like_secret(value: &str) -> bool {
  value
    .split(|c: char| c.is_whitespace() || c == '=' || c == ':' || c == '"' || c == '\'')
    .any(|token| {
      SECRET_FORMATS
        .iter()
        .any(|(prefix, min_len)| token.starts_with(prefix) && token.len() >= *min_len)
    })
}

/// Include/exclude filter for variable names.
#[derive(Debug, Clone)]
pub struct VariableFilter {
  include: Vec<AntPattern>,
  exclude: Vec<AntPattern>,
}

impl Default for VariableFilter {
  fn default() -> Self {
    Self::new("*", "")
  }
}

fn split_patterns(list: &str) -> impl Iterator<Item = &str> {
  list.split([',', ';']).map(str::trim).filter(|p| !p.is_empty())
}

impl VariableFilter {
  /// Build a filter from comma-separated pattern lists. The default excludes
  /// are always added to `exclude`.
  pub fn new(include: &str, exclude: &str) -> Self {
    let mut include: Vec<AntPattern> = split_patterns(include)
      .map(|p| AntPattern::with_case(p, false))
      .collect();
    if include.is_empty() {
      include.push(AntPattern::with_case("*", false));
    }
    let exclude = split_patterns(exclude)
      .chain(DEFAULT_ENV_EXCLUDES.iter().copied())
      .map(|p| AntPattern::with_case(p, false))
      .collect();
    Self { include, exclude }
  }

  pub fn from_config(config: &EnvConfig) -> Self {
    Self::new(&config.include, &config.exclude)
  }

  /// Whether a variable name passes the filter.
  pub fn accepts(&self, key: &str) -> bool {
    let included = self.include.iter().any(|p| p.matches(key));
    let excluded = self.exclude.iter().any(|p| p.matches(key));
    included && !excluded
  }

  /// Keep accepted variables, redacting secret-looking values.
  pub fn filter<I, K, V>(&self, vars: I) -> BTreeMap<String, String>
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let mut kept = BTreeMap::new();
    for (key, value) in vars {
      let key = key.into();
      if !self.accepts(&key) {
        debug!(key = %key, "excluding variable");
        continue;
      }
      let value = value.into();
      let value = if looks_like_secret(&value) {
        debug!(key = %key, "redacting secret-looking value");
        REDACTED.to_string()
      } else {
        value
      };
      kept.insert(key, value);
    }
    kept
  }

  /// Re-apply the filter to already-captured build-info properties.
  ///
  /// The `buildInfo.env.` prefix is ignored when matching.
  pub fn scrub_properties(&self, properties: &mut BTreeMap<String, String>) {
    properties.retain(|key, _| {
      let bare = key.strip_prefix(ENV_PROPERTY_PREFIX).unwrap_or(key);
      self.accepts(bare)
    });
    for value in properties.values_mut() {
      if looks_like_secret(value) {
        *value = REDACTED.to_string();
      }
    }
  }
}

/// Host facts recorded next to the environment.
pub fn system_properties() -> BTreeMap<String, String> {
  BTreeMap::from([
    ("os.name".to_string(), std::env::consts::OS.to_string()),
    ("os.arch".to_string(), std::env::consts::ARCH.to_string()),
    ("os.family".to_string(), std::env::consts::FAMILY.to_string()),
  ])
}

/// Filter `vars` and return them as prefixed build-info properties, plus the
/// host facts.
pub fn capture_variables<I>(filter: &VariableFilter, vars: I) -> BTreeMap<String, String>
where
  I: IntoIterator<Item = (String, String)>,
{
  let mut properties: BTreeMap<String, String> = filter
    .filter(vars)
    .into_iter()
    .map(|(key, value)| (format!("{ENV_PROPERTY_PREFIX}{key}"), value))
    .collect();
  properties.extend(filter.filter(system_properties()));
  properties
}

/// Capture the current process environment.
pub fn capture_process_env(filter: &VariableFilter) -> BTreeMap<String, String> {
  capture_variables(filter, std::env::vars())
}
