//! Build-info manifests.
//!
//! - [`types`]: the manifest model and retention policy
//! - [`env`]: environment capture and secret filtering
//! - [`store`]: persistence of in-progress manifests between invocations
//! - [`lock`]: the per-build lock guarding store updates
//! - [`compose`]: folding build phases into a manifest and publishing it

pub mod compose;
pub mod env;
pub mod lock;
pub mod store;
pub mod types;

pub use compose::{BuildInfoComposer, publish};
pub use env::VariableFilter;
pub use store::{BuildInfoStore, StoreError};
pub use types::{
  Artifact, BuildDependency, BuildInfo, BuildRetention, DeployableArtifact, Dependency, Module, RetentionRequest,
  Vcs,
};
