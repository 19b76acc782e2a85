// Whole-directory advisory lock on `<queue_dir>/.lock`, released on drop.
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::core::error::Error;

pub const LOCK_FILE_NAME: &str = ".lock";

/// Held for the duration of one structural queue operation.
pub struct QueueLock {
    path: PathBuf,
    file: File,
}

impl QueueLock {
    /// Blocks until the exclusive lock is held. No timeout: a crashed holder's
    /// lock goes away when the OS closes its descriptor.
    pub fn acquire(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(&path)
            .map_err(|err| Error::system("cannot open lock file", &path, err))?;
        file.lock_exclusive()
            .map_err(|err| Error::system("cannot flock lock file", &path, err))?;
        Ok(Self { path, file })
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!(path = %self.path.display(), error = %err, "cannot release queue lock");
        }
    }
}
