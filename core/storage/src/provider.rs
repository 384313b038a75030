//! Storage provider trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coffer_common::{Result, VaultPath};

/// Metadata for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Name of the object.
    pub name: String,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
    /// Whether this is a directory.
    pub is_directory: bool,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Storage provider trait for different backends.
///
/// Paths are relative to the provider's root. Implementations must be safe
/// to share between tasks.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Write a complete object, replacing any previous content.
    ///
    /// # Preconditions
    /// - Parent directory must exist
    ///
    /// # Postconditions
    /// - Readers observe either the old content or the new content, never
    ///   a mix of both
    ///
    /// # Errors
    /// - `NotFound` if the parent directory is missing
    /// - I/O errors
    async fn upload(&self, path: &VaultPath, data: Vec<u8>) -> Result<Metadata>;

    /// Read a complete object.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `path`
    /// - `InvalidPath` if `path` is a directory
    async fn download(&self, path: &VaultPath) -> Result<Vec<u8>>;

    /// Check if a path exists.
    async fn exists(&self, path: &VaultPath) -> Result<bool>;

    /// Delete an object.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `path`
    /// - `InvalidPath` if `path` is a directory
    async fn delete(&self, path: &VaultPath) -> Result<()>;

    /// List the direct children of a directory.
    async fn list(&self, path: &VaultPath) -> Result<Vec<Metadata>>;

    /// Create a directory (including parents if needed).
    ///
    /// # Errors
    /// - `AlreadyExists` if `path` already exists
    async fn create_dir(&self, path: &VaultPath) -> Result<Metadata>;
}
