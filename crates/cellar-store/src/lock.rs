use crate::StoreError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock on a store's lock file.
///
/// Held by the coordinator for its whole lifetime; released on drop.
pub struct StoreLock {
    lock_file: File,
    path: PathBuf,
    created: bool,
}

impl StoreLock {
    /// Take the lock without blocking. `Ok(None)` if someone else holds it.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, StoreError> {
        let unavailable = |source| StoreError::Unavailable {
            path: lock_path.to_path_buf(),
            source,
        };

        let created = !lock_path.exists();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .map_err(unavailable)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path: lock_path.to_path_buf(),
                created,
            })),
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and remove the lock file if this lock created it.
    /// Used when opening fails after the lock was taken.
    pub fn discard(self) {
        let _ = self.lock_file.unlock();
        if self.created {
            if let Err(e) = fs::remove_file(&self.path) {
                debug!("could not remove lock file {}: {e}", self.path.display());
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
