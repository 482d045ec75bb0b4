//! `shipyard download`: fetch dependencies into the workspace.
//!
//! With build coordinates the files are also recorded as dependencies of the
//! stored build-info.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;

use shipyard_lib::publish::BuildPublisher;
use shipyard_lib::resolve::DependencyResolver;

use super::{BuildArgs, Session, process_env, runtime, workspace_or_cwd};
use crate::output::{format_elapsed, print_json, print_stat, print_success};

#[derive(Debug, Args)]
pub struct DownloadArgs {
  #[command(flatten)]
  pub build: BuildArgs,

  /// `repo:path/pattern => target` lines; `@name#number:pattern` selects
  /// another build's artifacts (defaults to [resolve].pattern)
  #[arg(long)]
  pub pattern: Option<String>,

  /// Drop remote directory structure
  #[arg(long)]
  pub flat: bool,

  /// Directory downloads land in
  #[arg(long)]
  pub workspace: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct DownloadSummary {
  dependencies: usize,
  build_dependencies: usize,
  recorded: bool,
}

pub fn cmd_download(args: DownloadArgs, session: &Session) -> Result<()> {
  let start = Instant::now();
  let resolve = &session.config.resolve;
  let pattern = args.pattern.unwrap_or_else(|| resolve.pattern.clone());
  if pattern.trim().is_empty() {
    bail!("no resolve pattern given (use --pattern or [resolve].pattern)");
  }
  let flat = args.flat || resolve.flat;
  let workspace = workspace_or_cwd(args.workspace)?;
  let client = session.repository_client()?;
  let rt = runtime()?;

  let summary = match args.build.pair() {
    Some((name, number)) => {
      let store = session.store();
      let mut info = store.update(name, number, |_| {})?.empty_like();
      let publisher = BuildPublisher::new(client, workspace)
        .with_resolve(Some(pattern), flat)
        .with_env(process_env());
      let result = rt
        .block_on(publisher.resolve_dependencies(&mut info))
        .context("Download failed")?;
      store.update(name, number, |stored| stored.append(info))?;
      DownloadSummary {
        dependencies: result.dependencies,
        build_dependencies: result.build_dependencies,
        recorded: true,
      }
    }
    None => {
      let outcome = rt
        .block_on(DependencyResolver::new(client, workspace).with_flat(flat).retrieve(&pattern))
        .context("Download failed")?;
      DownloadSummary {
        dependencies: outcome.dependencies.len(),
        build_dependencies: outcome.build_dependencies.len(),
        recorded: false,
      }
    }
  };

  if session.json {
    print_json(&summary)?;
  } else {
    print_success("Download complete");
    if summary.recorded {
      print_stat("Dependencies", &summary.dependencies.to_string());
      print_stat("Build dependencies", &summary.build_dependencies.to_string());
    }
    print_stat("Duration", &format_elapsed(start.elapsed()));
  }
  Ok(())
}
