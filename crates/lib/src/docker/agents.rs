//! Cross-node image aggregation.
//!
//! Every node runs an [`AgentHandler`] over its own [`ImageStore`]. The
//! controller reaches the others through [`AgentClient`]s and fans each
//! operation out with a per-agent timeout. An agent that fails or times out
//! contributes nothing; the failure is logged and the others carry on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::image::{DockerImage, sha_value};
use super::inspect::ImageInspector;
use super::registry::ImageStore;
use crate::consts::{AGENT_CALL_TIMEOUT, PROP_DOCKER_IMAGE_PARENT};

/// Failures talking to one agent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
  #[error("agent '{node}' is unreachable: {message}")]
  Unreachable { node: String, message: String },

  #[error("agent '{node}' did not answer within {after:?}")]
  Timeout { node: String, after: Duration },

  #[error("agent '{node}' failed: {message}")]
  Remote { node: String, message: String },

  #[error("agent '{node}' sent an unexpected response")]
  UnexpectedResponse { node: String },
}

/// Operations an agent serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AgentRequest {
  Register { image: DockerImage },
  CollectImages { build_info_id: String },
  UpdateParent { build_info_id: String, image_tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AgentResponse {
  Registered,
  Images { images: Vec<DockerImage> },
  ParentUpdated { updated: bool },
}

/// Request/response channel to one node.
#[async_trait]
pub trait AgentClient: Send + Sync {
  fn node_id(&self) -> &str;

  async fn call(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

/// Serves [`AgentRequest`]s against a node's own store.
#[derive(Clone)]
pub struct AgentHandler {
  node: String,
  store: Arc<dyn ImageStore>,
  inspector: Option<Arc<dyn ImageInspector>>,
}

impl AgentHandler {
  pub fn new(node: impl Into<String>, store: Arc<dyn ImageStore>) -> Self {
    Self {
      node: node.into(),
      store,
      inspector: None,
    }
  }

  /// Enable parent lookups through the node's container engine.
  pub fn with_inspector(mut self, inspector: Arc<dyn ImageInspector>) -> Self {
    self.inspector = Some(inspector);
    self
  }

  pub fn node(&self) -> &str {
    &self.node
  }

  pub fn store(&self) -> &Arc<dyn ImageStore> {
    &self.store
  }

  pub async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
    match request {
      AgentRequest::Register { mut image } => {
        image.agent_name = self.node.clone();
        self.store.register(image);
        Ok(AgentResponse::Registered)
      }
      AgentRequest::CollectImages { build_info_id } => {
        let images = self.store.claim_and_remove(&build_info_id);
        debug!(node = %self.node, build_info_id = %build_info_id, count = images.len(), "collected images");
        Ok(AgentResponse::Images { images })
      }
      AgentRequest::UpdateParent {
        build_info_id,
        image_tag,
      } => {
        let updated = self.update_parent(&build_info_id, &image_tag).await?;
        Ok(AgentResponse::ParentUpdated { updated })
      }
    }
  }

  /// Attach the parent image id to every cached image with this tag.
  /// Returns whether this node holds such an image.
  async fn update_parent(&self, build_info_id: &str, image_tag: &str) -> Result<bool, AgentError> {
    let images: Vec<DockerImage> = self
      .store
      .images_for_build(build_info_id)
      .into_iter()
      .filter(|image| image.image_tag == image_tag)
      .collect();
    let Some(first) = images.first() else {
      return Ok(false);
    };

    if let Some(inspector) = &self.inspector {
      let parent = inspector
        .parent_id(&first.image_id)
        .await
        .map_err(|e| AgentError::Remote {
          node: self.node.clone(),
          message: e.to_string(),
        })?;
      if let Some(parent) = parent {
        self
          .store
          .set_module_property(build_info_id, image_tag, PROP_DOCKER_IMAGE_PARENT, sha_value(&parent));
      }
    }
    info!(node = %self.node, tag = %image_tag, "docker build-info captured");
    Ok(true)
  }
}

/// In-process [`AgentClient`] over a handler.
#[derive(Clone)]
pub struct LocalAgentClient {
  handler: AgentHandler,
}

impl LocalAgentClient {
  pub fn new(handler: AgentHandler) -> Self {
    Self { handler }
  }
}

#[async_trait]
impl AgentClient for LocalAgentClient {
  fn node_id(&self) -> &str {
    self.handler.node()
  }

  async fn call(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
    self.handler.handle(request).await
  }
}

/// The controller's view of all nodes.
#[derive(Clone)]
pub struct AgentFleet {
  local: AgentHandler,
  agents: Vec<Arc<dyn AgentClient>>,
  timeout: Duration,
}

impl AgentFleet {
  pub fn new(local: AgentHandler) -> Self {
    Self {
      local,
      agents: Vec::new(),
      timeout: AGENT_CALL_TIMEOUT,
    }
  }

  pub fn with_agent(mut self, agent: Arc<dyn AgentClient>) -> Self {
    self.agents.push(agent);
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn local(&self) -> &AgentHandler {
    &self.local
  }

  /// Claim the images of a build from this node and every agent.
  ///
  /// Never fails: unreachable agents are logged and skipped.
  pub async fn collect_from_all_agents(&self, build_info_id: &str) -> Vec<DockerImage> {
    let mut images = self.local.store().claim_and_remove(build_info_id);
    let request = AgentRequest::CollectImages {
      build_info_id: build_info_id.to_string(),
    };
    for (node, response) in self.broadcast(request).await {
      match response {
        AgentResponse::Images { images: found } => images.extend(found),
        _ => warn!(node = %node, "agent sent an unexpected response, ignoring"),
      }
    }
    info!(build_info_id, count = images.len(), "collected images from all nodes");
    images
  }

  /// Register an image on this node and on every agent.
  ///
  /// Returns the number of nodes that accepted it.
  pub async fn register_on_all_agents(&self, image: DockerImage) -> usize {
    let mut local_image = image.clone();
    local_image.agent_name = self.local.node().to_string();
    self.local.store().register(local_image);
    let accepted = self
      .broadcast(AgentRequest::Register { image })
      .await
      .into_iter()
      .filter(|(_, response)| matches!(response, AgentResponse::Registered))
      .count();
    accepted + 1
  }

  /// Attach the parent image id on every node. Returns whether any node
  /// holds the image.
  pub async fn update_parent_on_all_agents(&self, build_info_id: &str, image_tag: &str) -> bool {
    let request = AgentRequest::UpdateParent {
      build_info_id: build_info_id.to_string(),
      image_tag: image_tag.to_string(),
    };
    let mut updated = match self.local.handle(request.clone()).await {
      Ok(AgentResponse::ParentUpdated { updated }) => updated,
      Ok(_) => false,
      Err(e) => {
        warn!(error = %e, "failed to update image parent locally");
        false
      }
    };
    for (_, response) in self.broadcast(request).await {
      if let AgentResponse::ParentUpdated { updated: true } = response {
        updated = true;
      }
    }
    updated
  }

  /// Send `request` to every agent concurrently. Results come back in agent
  /// order; failed agents are absent.
  async fn broadcast(&self, request: AgentRequest) -> Vec<(String, AgentResponse)> {
    let mut join_set = JoinSet::new();
    for (index, agent) in self.agents.iter().enumerate() {
      let agent = agent.clone();
      let request = request.clone();
      let timeout = self.timeout;
      join_set.spawn(async move {
        let node = agent.node_id().to_string();
        let result = match tokio::time::timeout(timeout, agent.call(request)).await {
          Ok(result) => result,
          Err(_) => Err(AgentError::Timeout {
            node: node.clone(),
            after: timeout,
          }),
        };
        (index, node, result)
      });
    }

    let mut responses = Vec::with_capacity(self.agents.len());
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((index, node, Ok(response))) => responses.push((index, node, response)),
        Ok((_, node, Err(e))) => warn!(node = %node, error = %e, "agent call failed, skipping"),
        Err(e) => warn!(error = %e, "agent call task failed, skipping"),
      }
    }
    responses.sort_by_key(|(index, _, _)| *index);
    responses.into_iter().map(|(_, node, response)| (node, response)).collect()
  }
}
