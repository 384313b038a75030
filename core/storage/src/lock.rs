//! Advisory lock guarding a vault directory against concurrent sessions.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use coffer_common::{Error, Result};

/// Name of the lock file inside a vault directory.
pub const LOCK_FILENAME: &str = ".lock";

/// Exclusive advisory lock on a vault directory.
///
/// Held for the lifetime of an open session and released on drop.
#[derive(Debug)]
pub struct VaultLock {
    file: File,
    path: PathBuf,
}

impl VaultLock {
    /// Try to take the lock for the vault at `root` without blocking.
    ///
    /// # Errors
    /// - `Busy` if another session holds the lock
    /// - I/O errors opening the lock file
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired vault lock {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(Error::Busy(format!(
                "Vault at {} is open in another session",
                root.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for VaultLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release vault lock {}: {}", self.path.display(), e);
        }
    }
}
