//! shipyard-lib: publishing and promotion of CI build artifacts.
//!
//! A build run flows through these pieces:
//! - [`pattern`]: turning `source => target` patterns into workspace files
//! - [`deploy`]: checksummed deploy details and their upload
//! - [`resolve`]: downloading dependencies published by repositories or other builds
//! - [`docker`]: container images captured by build agents
//! - [`buildinfo`]: the build-info manifest, its local store and publication
//! - [`promote`]: two-phase build promotion and release-bundle distribution
//! - [`publish`]: the end-to-end pipeline tying the above together

pub mod buildinfo;
pub mod client;
pub mod config;
pub mod configurator;
pub mod consts;
pub mod deploy;
pub mod docker;
pub mod paths;
pub mod pattern;
pub mod promote;
pub mod publish;
pub mod resolve;
pub mod util;
