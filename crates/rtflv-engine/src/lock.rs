use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Exclusive lockfile keyed on the output filename.
///
/// Created with exclusive-create semantics next to the output file; the
/// contents are irrelevant. The guard removes the lockfile on drop, which
/// covers success, failure and cancellation alike.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Try to take the lock for `target`. Returns `None` when the lockfile
    /// already exists or cannot be created.
    pub fn acquire(target: &Path) -> Option<FileLock> {
        let path = lock_path(target);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => {
                debug!(path = %path.display(), "acquired lock");
                Some(FileLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(path = %path.display(), "lockfile already exists");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to create lockfile");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove lockfile");
        }
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}
