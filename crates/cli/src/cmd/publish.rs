//! `shipyard publish`: compose the stored build-info and publish it.

use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;

use shipyard_lib::buildinfo::{BuildInfo, BuildInfoComposer, BuildRetention, VariableFilter};
use shipyard_lib::publish::{BuildPublisher, PublishSummary};

use super::{BuildArgs, Session, runtime, workspace_or_cwd};
use crate::output::{format_elapsed, print_info, print_json, print_stat, print_success};

#[derive(Debug, Args)]
pub struct PublishArgs {
  #[command(flatten)]
  pub build: BuildArgs,

  /// Keep at most this many builds
  #[arg(long)]
  pub max_builds: Option<u32>,

  /// Discard builds older than this many days
  #[arg(long)]
  pub max_days: Option<u32>,

  /// Also delete the artifacts of discarded builds
  #[arg(long)]
  pub delete_artifacts: bool,

  /// Build number never to discard (repeatable)
  #[arg(long = "exempt", value_name = "NUMBER")]
  pub exempt: Vec<String>,

  /// Let the server apply retention in the background
  #[arg(long)]
  pub async_retention: bool,
}

impl PublishArgs {
  fn retention(&self) -> Option<BuildRetention> {
    if self.max_builds.is_none() && self.max_days.is_none() {
      return None;
    }
    Some(BuildRetention {
      max_builds: self.max_builds,
      max_days: self.max_days,
      delete_build_artifacts: self.delete_artifacts,
      builds_exempt_from_discard: self.exempt.clone(),
      run_async: self.async_retention,
    })
  }
}

fn counts(info: &BuildInfo) -> PublishSummary {
  PublishSummary {
    artifacts: info.modules.iter().map(|m| m.artifacts.len()).sum(),
    dependencies: info.modules.iter().map(|m| m.dependencies.len()).sum(),
    build_dependencies: info.build_dependencies.len(),
    deployable: info.deployable_artifacts.len(),
    ..PublishSummary::default()
  }
}

pub fn cmd_publish(args: PublishArgs, session: &Session) -> Result<()> {
  let start = Instant::now();
  let (name, number) = args.build.require()?;
  let store = session.store();
  let _lock = store.lock(name, number)?;
  let Some(info) = store.load(name, number)? else {
    bail!("no build-info recorded for {} #{}; run upload, download or env first", name, number);
  };

  let filter = VariableFilter::from_config(&session.config.env);
  let mut composer = BuildInfoComposer::new(info).with_env_filter(filter, false);
  if let Some(retention) = args.retention() {
    composer = composer.with_retention(retention);
  }
  let info = composer.compose();
  let counts = counts(&info);

  let publisher = BuildPublisher::new(session.repository_client()?, workspace_or_cwd(None)?);
  let (_, summary) = runtime()?
    .block_on(publisher.publish(info, counts))
    .context("Publish failed")?;
  store.remove(name, number)?;

  if session.json {
    print_json(&summary)?;
  } else {
    print_success(&format!("Published {} #{}", name, number));
    print_stat("Modules", &summary.modules.to_string());
    print_stat("Artifacts", &summary.artifacts.to_string());
    print_stat("Dependencies", &summary.dependencies.to_string());
    if summary.retention_applied {
      print_info("Build retention applied");
    }
    print_stat("Duration", &format_elapsed(start.elapsed()));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser)]
  struct Harness {
    #[command(flatten)]
    args: PublishArgs,
  }

  #[test]
  fn retention_needs_a_limit() {
    let harness = Harness::parse_from(["t", "--build-name", "a", "--build-number", "1", "--delete-artifacts"]);
    assert!(harness.args.retention().is_none());

    let harness = Harness::parse_from([
      "t",
      "--build-name",
      "a",
      "--build-number",
      "1",
      "--max-builds",
      "3",
      "--exempt",
      "7",
      "--exempt",
      "9",
    ]);
    let retention = harness.args.retention().unwrap();
    assert_eq!(retention.max_builds, Some(3));
    assert_eq!(retention.builds_exempt_from_discard, vec!["7", "9"]);
  }
}
