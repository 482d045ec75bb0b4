//! Local image inspection.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Errors from querying the local image store.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
  #[error("failed to run {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("inspecting {reference} failed with exit code {code:?}: {stderr}")]
  Failed {
    reference: String,
    code: Option<i32>,
    stderr: String,
  },
}

/// Reads image metadata from the node's container engine.
#[async_trait]
pub trait ImageInspector: Send + Sync {
  /// Parent image id, `None` for base images.
  async fn parent_id(&self, image_id: &str) -> Result<Option<String>, InspectError>;
}

/// [`ImageInspector`] backed by `docker image inspect`.
#[derive(Debug, Clone)]
pub struct DockerCliInspector {
  program: String,
  host: Option<String>,
}

impl Default for DockerCliInspector {
  fn default() -> Self {
    Self {
      program: "docker".to_string(),
      host: None,
    }
  }
}

impl DockerCliInspector {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      host: None,
    }
  }

  /// Talk to a daemon other than the default one.
  pub fn with_host(mut self, host: Option<String>) -> Self {
    self.host = host.filter(|h| !h.is_empty());
    self
  }

  async fn inspect(&self, reference: &str, format: &str) -> Result<String, InspectError> {
    let mut command = Command::new(&self.program);
    if let Some(host) = &self.host {
      command.arg("--host").arg(host);
    }
    command.args(["image", "inspect", "--format", format, reference]);
    debug!(program = %self.program, reference, format, "inspecting image");

    let output = command.output().await.map_err(|source| InspectError::Spawn {
      program: self.program.clone(),
      source,
    })?;
    if !output.status.success() {
      return Err(InspectError::Failed {
        reference: reference.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }
}

#[async_trait]
impl ImageInspector for DockerCliInspector {
  async fn parent_id(&self, image_id: &str) -> Result<Option<String>, InspectError> {
    let parent = self.inspect(image_id, "{{.Parent}}").await?;
    Ok(Some(parent).filter(|p| !p.is_empty()))
  }
}
