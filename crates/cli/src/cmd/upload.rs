//! `shipyard upload`: deploy workspace files and record them in the stored
//! build-info.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use shipyard_lib::buildinfo::Vcs;
use shipyard_lib::configurator::GenericConfigurator;
use shipyard_lib::publish::BuildPublisher;

use super::{BuildArgs, Session, process_env, runtime, workspace_or_cwd};
use crate::output::{format_elapsed, print_json, print_stat, print_success};

#[derive(Debug, Args)]
pub struct UploadArgs {
  #[command(flatten)]
  pub build: BuildArgs,

  /// Target repository (defaults to [deploy].repository)
  #[arg(long)]
  pub repo: Option<String>,

  /// `source => target` pattern, one per line (defaults to [deploy].pattern)
  #[arg(long)]
  pub pattern: Option<String>,

  /// Extra properties for every upload, e.g. "k=v;k2=v2"
  #[arg(long)]
  pub props: Option<String>,

  /// Parallel uploads
  #[arg(long)]
  pub threads: Option<usize>,

  /// Directory patterns are resolved against
  #[arg(long)]
  pub workspace: Option<PathBuf>,

  /// VCS revision stamped on uploads
  #[arg(long)]
  pub vcs_revision: Option<String>,

  /// Module to record the artifacts under
  #[arg(long)]
  pub module: Option<String>,
}

pub fn cmd_upload(args: UploadArgs, session: &Session) -> Result<()> {
  let start = Instant::now();
  let (name, number) = args.build.require()?;

  let deploy = &session.config.deploy;
  let mut configurator = GenericConfigurator::from_config(deploy);
  if args.repo.is_some() || args.pattern.is_some() || args.props.is_some() {
    configurator = GenericConfigurator::new(
      args.repo.unwrap_or_else(|| deploy.repository.clone()),
      args.pattern.unwrap_or_else(|| deploy.pattern.clone()),
    )
    .with_matrix_params(args.props.unwrap_or_else(|| deploy.matrix_params.clone()))
    .with_override_deployer(deploy.override_deployer);
  }
  configurator.validate()?;

  let threads = args.threads.unwrap_or(deploy.threads);
  let publisher = BuildPublisher::new(session.repository_client()?, workspace_or_cwd(args.workspace)?)
    .with_threads(threads)
    .with_module_id(args.module)
    .with_env(process_env());

  let store = session.store();
  // Persist the start time first so every stage stamps the same timestamp.
  let stored = store.update(name, number, |_| {})?;
  let mut info = stored.empty_like();
  if let Some(revision) = args.vcs_revision {
    info.vcs.retain(|v| v.revision != revision);
    info.vcs.push(Vcs {
      revision,
      ..Default::default()
    });
  }
  debug!(build = name, number, threads, "starting upload");

  let summary = runtime()?
    .block_on(publisher.deploy(&mut info, &configurator))
    .context("Upload failed")?;
  store.update(name, number, |stored| stored.append(info))?;

  if session.json {
    print_json(&summary)?;
  } else {
    print_success(&format!("Uploaded artifacts for {} #{}", name, number));
    print_stat("Artifacts", &summary.artifacts.to_string());
    if summary.deployable > 0 {
      print_stat("Deployable", &summary.deployable.to_string());
    }
    print_stat("Duration", &format_elapsed(start.elapsed()));
  }
  Ok(())
}
