mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shipyard_lib::config::Config;

use cmd::{
  DeleteBundleArgs, DistributeArgs, DownloadArgs, EnvArgs, PromoteArgs, PublishArgs, Session, UploadArgs,
  cmd_delete_bundle, cmd_distribute, cmd_download, cmd_env, cmd_promote, cmd_publish, cmd_upload,
};
use output::print_error;

/// shipyard - publish, record and promote CI build artifacts
#[derive(Parser)]
#[command(name = "shipyard")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Configuration file (default: $XDG_CONFIG_HOME/shipyard/config.toml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Print machine-readable JSON summaries
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Deploy workspace files and record them in the build-info
  Upload(UploadArgs),

  /// Download dependencies into the workspace
  Download(DownloadArgs),

  /// Capture environment variables into the build-info
  Env(EnvArgs),

  /// Publish the recorded build-info
  Publish(PublishArgs),

  /// Promote a published build to another repository
  Promote(PromoteArgs),

  /// Distribute a release bundle to edge sites
  Distribute(DistributeArgs),

  /// Remove a release bundle from edge sites
  DeleteBundle(DeleteBundleArgs),
}

fn init_logging(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<()> {
  let session = Session {
    config: Config::load(cli.config.as_deref())?,
    json: cli.json,
  };

  match cli.command {
    Commands::Upload(args) => cmd_upload(args, &session),
    Commands::Download(args) => cmd_download(args, &session),
    Commands::Env(args) => cmd_env(args, &session),
    Commands::Publish(args) => cmd_publish(args, &session),
    Commands::Promote(args) => cmd_promote(args, &session),
    Commands::Distribute(args) => cmd_distribute(args, &session),
    Commands::DeleteBundle(args) => cmd_delete_bundle(args, &session),
  }
}

fn main() {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  if let Err(e) = run(cli) {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}
