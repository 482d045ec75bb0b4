//! Release-bundle distribution to edge sites.
//!
//! Same dry-run-then-commit shape as build promotion, with distribution rules
//! as payload.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{PromotionOutcome, run_two_phase};
use crate::client::{ClientError, DistributionClient};
use crate::config::ConfigError;

/// Wildcard accepted by the service for site, city and country.
const ANY: &str = "*";

/// Targeting of one distribution: which edge sites receive the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRule {
  #[serde(default)]
  pub site_name: String,
  #[serde(default)]
  pub city_name: String,
  #[serde(default)]
  pub country_codes: Vec<String>,
}

impl Default for DistributionRule {
  fn default() -> Self {
    Self {
      site_name: ANY.to_string(),
      city_name: ANY.to_string(),
      country_codes: vec![ANY.to_string()],
    }
  }
}

/// A single rule from command-line style targeting. Blank parts match anything.
pub fn distribution_rules(site: Option<&str>, city: Option<&str>, countries: &[String]) -> Vec<DistributionRule> {
  let pick = |value: Option<&str>| {
    value
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .unwrap_or(ANY)
      .to_string()
  };
  let country_codes: Vec<String> = countries
    .iter()
    .map(|c| c.trim().to_string())
    .filter(|c| !c.is_empty())
    .collect();
  vec![DistributionRule {
    site_name: pick(site),
    city_name: pick(city),
    country_codes: if country_codes.is_empty() {
      vec![ANY.to_string()]
    } else {
      country_codes
    },
  }]
}

#[derive(Deserialize)]
struct RulesFile {
  #[serde(rename = "distribution_rules")]
  rules: Vec<DistributionRule>,
}

/// Parse a rules document `{"distribution_rules": [...]}`.
///
/// A rules document and explicit site/city/country targeting are mutually
/// exclusive.
pub fn parse_distribution_rules(json: &str, targeting_given: bool) -> Result<Vec<DistributionRule>, ConfigError> {
  if targeting_given {
    return Err(ConfigError::Conflict(
      "distribution rules cannot be combined with site, city or country".to_string(),
    ));
  }
  let parsed: RulesFile = serde_json::from_str(json).map_err(|e| ConfigError::InvalidArgument {
    key: "distribution_rules".to_string(),
    value: e.to_string(),
  })?;
  Ok(parsed.rules)
}

/// Body of a distribute call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributionRequest {
  pub dry_run: bool,
  pub distribution_rules: Vec<DistributionRule>,
}

impl DistributionRequest {
  pub fn new(rules: Vec<DistributionRule>) -> Self {
    Self {
      dry_run: false,
      distribution_rules: rules,
    }
  }
}

/// What the distribution service does with the source bundle after removing
/// it from the edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OnSuccess {
  #[default]
  Keep,
  Delete,
}

/// Body of a delete-bundle call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteBundleRequest {
  pub dry_run: bool,
  pub distribution_rules: Vec<DistributionRule>,
  pub on_success: OnSuccess,
}

impl DeleteBundleRequest {
  pub fn new(rules: Vec<DistributionRule>, delete_from_distribution: bool) -> Self {
    Self {
      dry_run: false,
      distribution_rules: rules,
      on_success: if delete_from_distribution {
        OnSuccess::Delete
      } else {
        OnSuccess::Keep
      },
    }
  }
}

/// Distribute a release bundle, verifying with a dry run first when
/// `fail_fast` is set.
pub async fn distribute_bundle(
  client: &dyn DistributionClient,
  bundle: &str,
  version: &str,
  request: &DistributionRequest,
  fail_fast: bool,
) -> Result<PromotionOutcome, ClientError> {
  info!(bundle, version, rules = request.distribution_rules.len(), "distributing release bundle");
  run_two_phase(fail_fast, move |dry_run| {
    let mut request = request.clone();
    request.dry_run = dry_run;
    async move { client.distribute(bundle, version, &request).await }
  })
  .await
}

/// Remove a release bundle from its distribution targets.
pub async fn delete_bundle(
  client: &dyn DistributionClient,
  bundle: &str,
  version: &str,
  request: &DeleteBundleRequest,
  fail_fast: bool,
) -> Result<PromotionOutcome, ClientError> {
  info!(bundle, version, on_success = ?request.on_success, "deleting release bundle");
  run_two_phase(fail_fast, move |dry_run| {
    let mut request = request.clone();
    request.dry_run = dry_run;
    async move { client.delete_bundle(bundle, version, &request).await }
  })
  .await
}
