//! Container image capture.
//!
//! - [`image`]: captured images and manifest fold-in
//! - [`registry`]: the per-node image store with TTL expiry
//! - [`agents`]: cross-node register/collect/update-parent fan-out
//! - [`inspect`]: local image metadata lookups

pub mod agents;
pub mod image;
pub mod inspect;
pub mod registry;

use tracing::warn;

pub use agents::{AgentClient, AgentError, AgentFleet, AgentHandler, AgentRequest, AgentResponse, LocalAgentClient};
pub use image::{DockerImage, ManifestError};
pub use inspect::{DockerCliInspector, ImageInspector, InspectError};
pub use registry::{Clock, ImageStore, InMemoryImageStore, ManualClock, SystemClock};

use std::sync::Arc;

use crate::buildinfo::Module;
use crate::config::DockerConfig;

/// A fleet with only this node, its image store built from `[docker]`.
///
/// Remote agents are attached with [`AgentFleet::with_agent`].
pub fn local_fleet(node: impl Into<String>, config: &DockerConfig) -> AgentFleet {
  let store = Arc::new(InMemoryImageStore::new(Arc::new(SystemClock), config.image_ttl()));
  AgentFleet::new(AgentHandler::new(node, store)).with_timeout(config.agent_timeout())
}

/// Convert claimed images to modules, one per image.
///
/// An image whose manifest cannot be read still yields a module with its id
/// and properties; the error is logged.
pub fn images_to_modules(images: &[DockerImage]) -> Vec<Module> {
  images
    .iter()
    .map(|image| match image.to_module() {
      Ok(module) => module,
      Err(e) => {
        warn!(tag = %image.image_tag, error = %e, "could not read image manifest");
        let mut bare = image.clone();
        bare.manifest = None;
        bare.to_module().unwrap_or_else(|_| Module::new(image.module_id()))
      }
    })
    .collect()
}
