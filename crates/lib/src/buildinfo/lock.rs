//! Per-build file locking for the build-info store.
//!
//! Every read-modify-write of a stored manifest runs while holding an
//! exclusive lock on `<number>.lock` next to it. Acquisition blocks, so
//! parallel pipeline stages for one build run their updates one after another.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub pid: u32,
  pub acquired_at_unix: i64,
}

/// Errors from acquiring a build lock.
#[derive(Debug, thiserror::Error)]
pub enum BuildLockError {
  #[error("failed to create lock directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {path}: {source}")]
  OpenFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to lock {path}: {source}")]
  LockFailed {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// An exclusive lock on one stored build, released on drop.
#[derive(Debug)]
pub struct BuildLock {
  file: File,
  lock_path: PathBuf,
}

impl BuildLock {
  /// Block until the lock at `lock_path` is held exclusively.
  pub fn acquire(lock_path: &Path) -> Result<Self, BuildLockError> {
    if let Some(dir) = lock_path.parent() {
      std::fs::create_dir_all(dir).map_err(|source| BuildLockError::CreateDir {
        path: dir.to_path_buf(),
        source,
      })?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(lock_path)
      .map_err(|source| BuildLockError::OpenFile {
        path: lock_path.to_path_buf(),
        source,
      })?;

    lock_exclusive(&file).map_err(|source| BuildLockError::LockFailed {
      path: lock_path.to_path_buf(),
      source,
    })?;

    // Diagnostics only; a stale or unwritable record does not affect the lock.
    if let Err(e) = write_metadata(&file) {
      debug!(path = ?lock_path, error = %e, "could not record lock metadata");
    }
    debug!(path = ?lock_path, "acquired build lock");

    Ok(Self {
      file,
      lock_path: lock_path.to_path_buf(),
    })
  }

  /// Reads the metadata through the held handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File) -> io::Result<()> {
  let metadata = LockMetadata {
    pid: std::process::id(),
    acquired_at_unix: chrono::Utc::now().timestamp(),
  };
  file.set_len(0)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer(&mut writer, &metadata).map_err(io::Error::other)?;
  writer.flush()
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::LockExclusive).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock_exclusive(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, LOCKFILE_EXCLUSIVE_LOCK, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
