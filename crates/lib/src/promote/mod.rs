//! Build promotion with a dry-run-then-commit protocol.
//!
//! With fail-fast enabled, the request is first sent with `dryRun=true`. If the
//! dry run is rejected the committing request is never sent. Without fail-fast
//! the committing request goes out directly.
//!
//! A response is accepted when its status is 200 and it carries no WARNING or
//! ERROR message, except the benign "No items were ..." notice.

pub mod distribution;

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::client::{ClientError, RepositoryClient, ServiceResponse};

/// Prefix of the service message reported when nothing matched. Not a failure.
const NOTHING_MOVED_PREFIX: &str = "No items were";

/// Promotion of a published build between repositories.
///
/// Build name and number travel in the URL, not in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRequest {
  #[serde(skip)]
  pub build_name: String,
  #[serde(skip)]
  pub build_number: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub comment: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_repo: Option<String>,
  pub target_repo: String,
  /// Copy instead of move.
  pub copy: bool,
  pub artifacts: bool,
  pub dependencies: bool,
  pub fail_fast: bool,
  pub dry_run: bool,
}

impl PromotionRequest {
  /// A move of all artifacts to `target_repo`, fail-fast.
  pub fn new(target_repo: impl Into<String>) -> Self {
    Self {
      build_name: String::new(),
      build_number: String::new(),
      status: None,
      comment: None,
      source_repo: None,
      target_repo: target_repo.into(),
      copy: false,
      artifacts: true,
      dependencies: false,
      fail_fast: true,
      dry_run: false,
    }
  }

  pub fn for_build(mut self, name: impl Into<String>, number: impl Into<String>) -> Self {
    self.build_name = name.into();
    self.build_number = number.into();
    self
  }
}

/// Which request of the protocol produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionPhase {
  DryRun,
  Commit,
}

impl std::fmt::Display for PromotionPhase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PromotionPhase::DryRun => f.write_str("dry run"),
      PromotionPhase::Commit => f.write_str("commit"),
    }
  }
}

/// Terminal state of a promotion or distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
  Success { response: ServiceResponse },
  Failed { phase: PromotionPhase, reason: String },
}

impl PromotionOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, PromotionOutcome::Success { .. })
  }
}

/// Accept or reject a service response.
pub fn check_response(response: &ServiceResponse) -> Result<(), String> {
  if response.status != 200 {
    return Err(format!("HTTP {}: {}", response.status, response.body.trim()));
  }
  for message in &response.messages {
    let level = message.level.to_ascii_uppercase();
    if (level == "WARNING" || level == "ERROR") && !message.message.starts_with(NOTHING_MOVED_PREFIX) {
      return Err(format!("received {}: {}", level, message.message));
    }
  }
  Ok(())
}

/// Drive the two-phase protocol. `call(dry_run)` issues one request.
///
/// Transport errors propagate as `Err`; rejected responses end in
/// [`PromotionOutcome::Failed`].
pub async fn run_two_phase<F, Fut>(fail_fast: bool, call: F) -> Result<PromotionOutcome, ClientError>
where
  F: Fn(bool) -> Fut,
  Fut: Future<Output = Result<ServiceResponse, ClientError>>,
{
  if fail_fast {
    info!("issuing dry run");
    let response = call(true).await?;
    if let Err(reason) = check_response(&response) {
      error!(reason = %reason, "dry run rejected, nothing was changed");
      return Ok(PromotionOutcome::Failed {
        phase: PromotionPhase::DryRun,
        reason,
      });
    }
  }

  info!("issuing committing request");
  let response = call(false).await?;
  match check_response(&response) {
    Ok(()) => Ok(PromotionOutcome::Success { response }),
    Err(reason) => {
      error!(reason = %reason, "request rejected");
      Ok(PromotionOutcome::Failed {
        phase: PromotionPhase::Commit,
        reason,
      })
    }
  }
}

/// Promote a published build.
pub async fn promote_build(
  client: &dyn RepositoryClient,
  request: &PromotionRequest,
) -> Result<PromotionOutcome, ClientError> {
  info!(
    build = %request.build_name,
    number = %request.build_number,
    target = %request.target_repo,
    copy = request.copy,
    fail_fast = request.fail_fast,
    "promoting build"
  );
  run_two_phase(request.fail_fast, move |dry_run| {
    let mut request = request.clone();
    request.dry_run = dry_run;
    async move { client.promote(&request.build_name, &request.build_number, &request).await }
  })
  .await
}
