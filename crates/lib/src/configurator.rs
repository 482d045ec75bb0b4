//! What a build-tool integration tells the engine about deployment.
//!
//! The engine never needs to know which integration it is talking to; each one
//! implements [`DeployConfigurator`].

use crate::config::{ConfigError, DeployConfig};

pub trait DeployConfigurator: Send + Sync {
  /// Repository that receives uploads.
  fn repository_key(&self) -> &str;

  /// `source => target` pattern block.
  fn deploy_pattern(&self) -> &str;

  /// Extra `k=v` properties for every upload, `;` or whitespace separated.
  fn matrix_params(&self) -> &str;

  /// Whether the build tool uploads its own artifacts. The engine then records
  /// the deploy details as deployable artifacts instead of uploading them.
  fn is_overriding_deployer(&self) -> bool;
}

/// Configurator for plain pattern-driven deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericConfigurator {
  repository: String,
  pattern: String,
  matrix_params: String,
  override_deployer: bool,
}

impl GenericConfigurator {
  pub fn new(repository: impl Into<String>, pattern: impl Into<String>) -> Self {
    Self {
      repository: repository.into(),
      pattern: pattern.into(),
      ..Default::default()
    }
  }

  pub fn from_config(config: &DeployConfig) -> Self {
    Self {
      repository: config.repository.clone(),
      pattern: config.pattern.clone(),
      matrix_params: config.matrix_params.clone(),
      override_deployer: config.override_deployer,
    }
  }

  pub fn with_matrix_params(mut self, params: impl Into<String>) -> Self {
    self.matrix_params = params.into();
    self
  }

  pub fn with_override_deployer(mut self, override_deployer: bool) -> Self {
    self.override_deployer = override_deployer;
    self
  }

  /// Fail on an empty repository key or pattern.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.repository.trim().is_empty() {
      return Err(ConfigError::MissingArgument("repository".to_string()));
    }
    if self.pattern.trim().is_empty() {
      return Err(ConfigError::MissingArgument("pattern".to_string()));
    }
    Ok(())
  }
}

impl DeployConfigurator for GenericConfigurator {
  fn repository_key(&self) -> &str {
    &self.repository
  }

  fn deploy_pattern(&self) -> &str {
    &self.pattern
  }

  fn matrix_params(&self) -> &str {
    &self.matrix_params
  }

  fn is_overriding_deployer(&self) -> bool {
    self.override_deployer
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_config_copies_fields() {
    let config = DeployConfig {
      repository: "libs".to_string(),
      pattern: "*.jar => x".to_string(),
      matrix_params: "a=b".to_string(),
      override_deployer: true,
      ..Default::default()
    };
    let configurator = GenericConfigurator::from_config(&config);
    assert_eq!(configurator.repository_key(), "libs");
    assert_eq!(configurator.deploy_pattern(), "*.jar => x");
    assert_eq!(configurator.matrix_params(), "a=b");
    assert!(configurator.is_overriding_deployer());
  }

  #[test]
  fn validate_requires_repository_and_pattern() {
    assert!(matches!(
      GenericConfigurator::new("", "*.jar").validate(),
      Err(ConfigError::MissingArgument(ref arg)) if arg == "repository"
    ));
    assert!(matches!(
      GenericConfigurator::new("libs", " ").validate(),
      Err(ConfigError::MissingArgument(ref arg)) if arg == "pattern"
    ));
    assert!(GenericConfigurator::new("libs", "*.jar").validate().is_ok());
  }
}
