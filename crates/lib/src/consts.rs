//! Constants shared across the engine.

use std::time::Duration;

/// Application name, used for config and data directories.
pub const APP_NAME: &str = "shipyard";

/// Deploy property keys attached to every uploaded artifact.
pub const PROP_BUILD_NAME: &str = "build.name";
pub const PROP_BUILD_NUMBER: &str = "build.number";
pub const PROP_BUILD_TIMESTAMP: &str = "build.timestamp";
pub const PROP_BUILD_PARENT_NAME: &str = "build.parentName";
pub const PROP_BUILD_PARENT_NUMBER: &str = "build.parentNumber";
pub const PROP_VCS_REVISION: &str = "vcs.revision";

/// Prefix for captured environment variables in build-info properties.
pub const ENV_PROPERTY_PREFIX: &str = "buildInfo.env.";

/// Environment keys matching any of these are never captured.
pub const DEFAULT_ENV_EXCLUDES: &[&str] = &["*password*", "*secret*", "*key*", "*token*"];

/// Checksum headers understood by the repository service.
pub const HEADER_CHECKSUM_MD5: &str = "X-Checksum-Md5";
pub const HEADER_CHECKSUM_SHA1: &str = "X-Checksum-Sha1";
pub const HEADER_CHECKSUM_SHA256: &str = "X-Checksum-Sha256";

/// Images that were never claimed are purged after this long.
pub const IMAGE_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

/// Per-agent call timeout for cross-node image aggregation.
pub const AGENT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of parallel upload workers.
pub const DEFAULT_DEPLOY_THREADS: usize = 1;

/// Module property keys for captured container images.
pub const PROP_DOCKER_IMAGE_ID: &str = "docker.image.id";
pub const PROP_DOCKER_CAPTURED_IMAGE: &str = "docker.captured.image";
pub const PROP_DOCKER_IMAGE_PARENT: &str = "docker.image.parent";
