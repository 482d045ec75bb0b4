//! `shipyard env`: capture the filtered environment into the stored build-info.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use shipyard_lib::buildinfo::VariableFilter;
use shipyard_lib::buildinfo::env::capture_process_env;

use super::{BuildArgs, Session};
use crate::output::{print_json, print_stat, print_success};

#[derive(Debug, Args)]
pub struct EnvArgs {
  #[command(flatten)]
  pub build: BuildArgs,

  /// Comma-separated wildcards of variables to keep (defaults to [env].include)
  #[arg(long)]
  pub include: Option<String>,

  /// Comma-separated wildcards of variables to drop, on top of the built-in
  /// secret patterns (defaults to [env].exclude)
  #[arg(long)]
  pub exclude: Option<String>,
}

pub fn cmd_env(args: EnvArgs, session: &Session) -> Result<()> {
  let (name, number) = args.build.require()?;
  let env = &session.config.env;
  let filter = VariableFilter::new(
    args.include.as_deref().unwrap_or(&env.include),
    args.exclude.as_deref().unwrap_or(&env.exclude),
  );

  let captured = capture_process_env(&filter);
  let count = captured.len();
  session.store().update(name, number, |info| info.properties.extend(captured))?;

  if session.json {
    print_json(&json!({ "build_name": name, "build_number": number, "captured": count }))?;
  } else {
    print_success(&format!("Captured environment for {} #{}", name, number));
    print_stat("Properties", &count.to_string());
  }
  Ok(())
}
