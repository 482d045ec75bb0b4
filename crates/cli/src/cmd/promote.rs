//! `shipyard promote`, `shipyard distribute` and `shipyard delete-bundle`.
//!
//! All three use the dry-run-then-commit protocol unless `--no-fail-fast` is
//! given. A rejected dry run exits non-zero without committing.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::json;

use shipyard_lib::client::HttpDistributionClient;
use shipyard_lib::promote::distribution::{
  DeleteBundleRequest, DistributionRequest, DistributionRule, delete_bundle, distribute_bundle, distribution_rules,
  parse_distribution_rules,
};
use shipyard_lib::promote::{PromotionOutcome, PromotionRequest, promote_build};

use super::{BuildArgs, Session, runtime};
use crate::output::{print_error, print_json, print_success};

#[derive(Debug, Args)]
pub struct PromoteArgs {
  #[command(flatten)]
  pub build: BuildArgs,

  /// Repository to promote into
  #[arg(long)]
  pub target_repo: String,

  /// Only promote artifacts from this repository
  #[arg(long)]
  pub source_repo: Option<String>,

  /// Status recorded on the build
  #[arg(long)]
  pub status: Option<String>,

  #[arg(long)]
  pub comment: Option<String>,

  /// Copy instead of move
  #[arg(long)]
  pub copy: bool,

  /// Promote dependencies as well
  #[arg(long)]
  pub include_dependencies: bool,

  /// Skip the dry run
  #[arg(long)]
  pub no_fail_fast: bool,
}

/// Where a release bundle goes.
#[derive(Debug, Args)]
pub struct TargetingArgs {
  #[arg(long)]
  pub bundle: String,

  #[arg(long = "version", value_name = "VERSION")]
  pub bundle_version: String,

  /// Site name wildcard
  #[arg(long)]
  pub site: Option<String>,

  /// City name wildcard
  #[arg(long)]
  pub city: Option<String>,

  /// Country code (repeatable)
  #[arg(long = "country", value_name = "CODE")]
  pub countries: Vec<String>,

  /// JSON file with a `distribution_rules` array; excludes --site, --city and --country
  #[arg(long)]
  pub rules: Option<PathBuf>,

  /// Skip the dry run
  #[arg(long)]
  pub no_fail_fast: bool,
}

impl TargetingArgs {
  fn rules(&self) -> Result<Vec<DistributionRule>> {
    match &self.rules {
      Some(path) => {
        let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let targeting = self.site.is_some() || self.city.is_some() || !self.countries.is_empty();
        Ok(parse_distribution_rules(&json, targeting)?)
      }
      None => Ok(distribution_rules(self.site.as_deref(), self.city.as_deref(), &self.countries)),
    }
  }
}

#[derive(Debug, Args)]
pub struct DistributeArgs {
  #[command(flatten)]
  pub target: TargetingArgs,
}

#[derive(Debug, Args)]
pub struct DeleteBundleArgs {
  #[command(flatten)]
  pub target: TargetingArgs,

  /// Also delete the bundle from the distribution service once removed from targets
  #[arg(long)]
  pub delete_from_distribution: bool,
}

fn report(outcome: PromotionOutcome, what: &str, session: &Session) -> Result<()> {
  match outcome {
    PromotionOutcome::Success { response } => {
      if session.json {
        print_json(&json!({ "success": true, "status": response.status, "messages": response.messages.len() }))?;
      } else {
        print_success(&format!("{} succeeded", what));
      }
      Ok(())
    }
    PromotionOutcome::Failed { phase, reason } => {
      if session.json {
        print_json(&json!({ "success": false, "phase": phase, "reason": reason }))?;
      } else {
        print_error(&format!("{} failed during {}: {}", what, phase, reason));
      }
      bail!("{} rejected", what)
    }
  }
}

fn distribution_client(session: &Session) -> Result<HttpDistributionClient> {
  let server = session.config.distribution_server()?;
  HttpDistributionClient::new(server).context("Failed to create distribution client")
}

pub fn cmd_promote(args: PromoteArgs, session: &Session) -> Result<()> {
  let (name, number) = args.build.require()?;
  let mut request = PromotionRequest::new(args.target_repo).for_build(name, number);
  request.source_repo = args.source_repo;
  request.status = args.status;
  request.comment = args.comment;
  request.copy = args.copy;
  request.dependencies = args.include_dependencies;
  request.fail_fast = !args.no_fail_fast;

  let client = session.repository_client()?;
  let outcome = runtime()?
    .block_on(promote_build(client.as_ref(), &request))
    .context("Promotion request failed")?;
  report(outcome, "Promotion", session)
}

pub fn cmd_distribute(args: DistributeArgs, session: &Session) -> Result<()> {
  let target = args.target;
  let request = DistributionRequest::new(target.rules()?);
  let client = distribution_client(session)?;
  let outcome = runtime()?
    .block_on(distribute_bundle(
      &client,
      &target.bundle,
      &target.bundle_version,
      &request,
      !target.no_fail_fast,
    ))
    .context("Distribution request failed")?;
  report(outcome, "Distribution", session)
}

pub fn cmd_delete_bundle(args: DeleteBundleArgs, session: &Session) -> Result<()> {
  let target = args.target;
  let request = DeleteBundleRequest::new(target.rules()?, args.delete_from_distribution);
  let client = distribution_client(session)?;
  let outcome = runtime()?
    .block_on(delete_bundle(
      &client,
      &target.bundle,
      &target.bundle_version,
      &request,
      !target.no_fail_fast,
    ))
    .context("Bundle deletion request failed")?;
  report(outcome, "Bundle deletion", session)
}
