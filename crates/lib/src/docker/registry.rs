//! Per-node registry of captured images.
//!
//! Each node (controller or agent) owns one [`ImageStore`]. Builds running on
//! that node register images as they are pushed or pulled. At manifest time the
//! controller claims the images of its build from every node. Unclaimed images
//! are dropped once they outlive the TTL.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::image::DockerImage;
use crate::consts::IMAGE_MAX_AGE;

/// Wall-clock source for image ages.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Thread-safe image collection owned by one node.
pub trait ImageStore: Send + Sync {
  /// Append an image. Duplicates are kept.
  fn register(&self, image: DockerImage);

  /// Atomically remove every image correlated with `build_info_id` and return
  /// those with a captured manifest. Expired images of other builds are
  /// removed in the same pass and not returned.
  fn claim_and_remove(&self, build_info_id: &str) -> Vec<DockerImage>;

  /// Remove expired images, returning how many were dropped.
  fn prune_expired(&self) -> usize;

  /// Images of a build that have a captured manifest, left in place.
  fn images_for_build(&self, build_info_id: &str) -> Vec<DockerImage>;

  /// Attach a manifest to every image of the build with this tag.
  fn capture_manifest(&self, build_info_id: &str, image_tag: &str, manifest: &str) -> usize;

  /// Set a module property on every manifest-bearing image of the build with
  /// this tag. Returns the number of images touched.
  fn set_module_property(&self, build_info_id: &str, image_tag: &str, key: &str, value: &str) -> usize;
}

/// [`ImageStore`] behind a mutex.
pub struct InMemoryImageStore {
  images: Mutex<Vec<DockerImage>>,
  clock: Arc<dyn Clock>,
  ttl: Duration,
}

impl Default for InMemoryImageStore {
  fn default() -> Self {
    Self::new(Arc::new(SystemClock), IMAGE_MAX_AGE)
  }
}

impl InMemoryImageStore {
  pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
    Self {
      images: Mutex::new(Vec::new()),
      clock,
      ttl,
    }
  }

  /// Number of live entries.
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  // A panic while holding the lock leaves the list itself intact.
  fn lock(&self) -> MutexGuard<'_, Vec<DockerImage>> {
    self.images.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl ImageStore for InMemoryImageStore {
  fn register(&self, image: DockerImage) {
    debug!(tag = %image.image_tag, build_info_id = %image.build_info_id, "registered image");
    self.lock().push(image);
  }

  fn claim_and_remove(&self, build_info_id: &str) -> Vec<DockerImage> {
    let now = self.clock.now();
    let mut images = self.lock();
    let mut claimed = Vec::new();
    let mut kept = Vec::with_capacity(images.len());
    for image in images.drain(..) {
      if image.build_info_id == build_info_id {
        if image.has_manifest() {
          claimed.push(image);
        }
      } else if !image.is_expired(now, self.ttl) {
        kept.push(image);
      }
    }
    *images = kept;
    debug!(build_info_id, claimed = claimed.len(), remaining = images.len(), "claimed images");
    claimed
  }

  fn prune_expired(&self) -> usize {
    let now = self.clock.now();
    let mut images = self.lock();
    let before = images.len();
    images.retain(|image| !image.is_expired(now, self.ttl));
    before - images.len()
  }

  fn images_for_build(&self, build_info_id: &str) -> Vec<DockerImage> {
    self
      .lock()
      .iter()
      .filter(|image| image.build_info_id == build_info_id && image.has_manifest())
      .cloned()
      .collect()
  }

  fn capture_manifest(&self, build_info_id: &str, image_tag: &str, manifest: &str) -> usize {
    let mut touched = 0;
    for image in self
      .lock()
      .iter_mut()
      .filter(|image| image.build_info_id == build_info_id && image.image_tag == image_tag)
    {
      image.manifest = Some(manifest.to_string());
      touched += 1;
    }
    touched
  }

  fn set_module_property(&self, build_info_id: &str, image_tag: &str, key: &str, value: &str) -> usize {
    let mut touched = 0;
    for image in self.lock().iter_mut().filter(|image| {
      image.build_info_id == build_info_id && image.image_tag == image_tag && image.has_manifest()
    }) {
      image.module_properties.insert(key.to_string(), value.to_string());
      touched += 1;
    }
    touched
  }
}
