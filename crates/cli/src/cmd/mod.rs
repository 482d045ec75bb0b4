mod download;
mod env;
mod promote;
mod publish;
mod upload;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use shipyard_lib::buildinfo::BuildInfoStore;
use shipyard_lib::client::HttpRepositoryClient;
use shipyard_lib::config::Config;

pub use download::{DownloadArgs, cmd_download};
pub use env::{EnvArgs, cmd_env};
pub use promote::{DeleteBundleArgs, DistributeArgs, PromoteArgs, cmd_delete_bundle, cmd_distribute, cmd_promote};
pub use publish::{PublishArgs, cmd_publish};
pub use upload::{UploadArgs, cmd_upload};

/// State shared by every command.
pub struct Session {
  pub config: Config,
  pub json: bool,
}

impl Session {
  pub fn repository_client(&self) -> Result<Arc<HttpRepositoryClient>> {
    self.config.validate()?;
    let client = HttpRepositoryClient::new(&self.config.server).context("Failed to create repository client")?;
    Ok(Arc::new(client))
  }

  pub fn store(&self) -> BuildInfoStore {
    BuildInfoStore::default_store()
  }
}

/// Build coordinates. Both are required together.
#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
  /// Build name
  #[arg(long, requires = "build_number")]
  pub build_name: Option<String>,

  /// Build number
  #[arg(long, requires = "build_name")]
  pub build_number: Option<String>,
}

impl BuildArgs {
  pub fn pair(&self) -> Option<(&str, &str)> {
    match (&self.build_name, &self.build_number) {
      (Some(name), Some(number)) => Some((name, number)),
      _ => None,
    }
  }

  pub fn require(&self) -> Result<(&str, &str)> {
    self
      .pair()
      .context("--build-name and --build-number are required for this command")
  }
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

pub fn workspace_or_cwd(workspace: Option<PathBuf>) -> Result<PathBuf> {
  match workspace {
    Some(dir) => Ok(dir),
    None => std::env::current_dir().context("Failed to determine current directory"),
  }
}

pub fn process_env() -> BTreeMap<String, String> {
  std::env::vars().collect()
}
