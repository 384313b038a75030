//! Local filesystem storage provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;
use tokio::fs;
use tracing::{debug, warn};

use crate::provider::{Metadata, StorageProvider};
use coffer_common::{Error, Result, VaultPath};

/// Name prefix of the staging files used for atomic writes.
///
/// A crash between staging and rename leaves such a file next to its target.
pub const TEMP_PREFIX: &str = ".tmp";

/// Local filesystem storage provider.
///
/// Stores vault data in a local directory structure.
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    /// Create a new local provider with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - `InvalidPath` if the root exists but is not a directory
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if root.exists() && !root.is_dir() {
            return Err(Error::InvalidPath(format!(
                "Not a directory: {}",
                root.display()
            )));
        }
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this provider.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a VaultPath to a filesystem path.
    fn to_fs_path(&self, path: &VaultPath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn create_metadata(&self, path: &VaultPath, fs_meta: std::fs::Metadata) -> Metadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        Metadata {
            name: path.name().unwrap_or("/").to_string(),
            size: fs_meta.is_file().then(|| fs_meta.len()),
            is_directory: fs_meta.is_dir(),
            modified,
        }
    }

    async fn stat(&self, path: &VaultPath) -> Result<std::fs::Metadata> {
        match fs::metadata(self.to_fs_path(path)).await {
            Ok(meta) => Ok(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Path not found: {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `data` to `target` through a temp file in `dir`, then rename.
fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| Error::Io(e.error))?;

    // Make the rename itself durable.
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        warn!("Failed to sync directory {}: {}", dir.display(), e);
    }
    Ok(())
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, path: &VaultPath, data: Vec<u8>) -> Result<Metadata> {
        if path.is_root() {
            return Err(Error::InvalidPath("Cannot upload to root".to_string()));
        }
        let fs_path = self.to_fs_path(path);
        let parent = fs_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        if !fs::try_exists(&parent).await? {
            return Err(Error::NotFound("Parent directory not found".to_string()));
        }

        debug!("Writing {} bytes to {}", data.len(), path);
        let target = fs_path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&parent, &target, &data))
            .await
            .map_err(|e| Error::Storage(format!("Upload task failed: {}", e)))??;

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(self.create_metadata(path, fs_meta))
    }

    async fn download(&self, path: &VaultPath) -> Result<Vec<u8>> {
        if self.stat(path).await?.is_dir() {
            return Err(Error::InvalidPath(format!(
                "Cannot download directory: {}",
                path
            )));
        }

        Ok(fs::read(self.to_fs_path(path)).await?)
    }

    async fn exists(&self, path: &VaultPath) -> Result<bool> {
        Ok(fs::try_exists(self.to_fs_path(path)).await?)
    }

    async fn delete(&self, path: &VaultPath) -> Result<()> {
        if self.stat(path).await?.is_dir() {
            return Err(Error::InvalidPath(format!(
                "Cannot delete directory: {}",
                path
            )));
        }

        fs::remove_file(self.to_fs_path(path)).await?;
        Ok(())
    }

    async fn list(&self, path: &VaultPath) -> Result<Vec<Metadata>> {
        if !self.stat(path).await?.is_dir() {
            return Err(Error::InvalidPath(format!("Not a directory: {}", path)));
        }

        let mut results = Vec::new();
        let mut entries = fs::read_dir(self.to_fs_path(path)).await?;

        while let Some(entry) = entries.next_entry().await? {
            // Names that are not valid vault path components are not ours.
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(child) = path.join(&name) else {
                continue;
            };
            let fs_meta = entry.metadata().await?;
            results.push(self.create_metadata(&child, fs_meta));
        }

        Ok(results)
    }

    async fn create_dir(&self, path: &VaultPath) -> Result<Metadata> {
        let fs_path = self.to_fs_path(path);

        if fs::try_exists(&fs_path).await? {
            return Err(Error::AlreadyExists(format!(
                "Path already exists: {}",
                path
            )));
        }

        fs::create_dir_all(&fs_path).await?;

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(self.create_metadata(path, fs_meta))
    }
}
