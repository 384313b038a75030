//! In-memory storage provider for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::provider::{Metadata, StorageProvider};
use coffer_common::{Error, Result, VaultPath};

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, metadata: Metadata },
    Directory { metadata: Metadata },
}

impl Entry {
    fn metadata(&self) -> &Metadata {
        match self {
            Entry::File { metadata, .. } | Entry::Directory { metadata } => metadata,
        }
    }
}

/// In-memory storage provider.
///
/// Useful for testing. All data is stored in memory and lost on drop.
pub struct MemoryProvider {
    storage: RwLock<BTreeMap<VaultPath, Entry>>,
}

impl MemoryProvider {
    /// Create a new empty memory provider.
    pub fn new() -> Self {
        let mut storage = BTreeMap::new();
        storage.insert(
            VaultPath::root(),
            Entry::Directory {
                metadata: directory_metadata(&VaultPath::root()),
            },
        );

        Self {
            storage: RwLock::new(storage),
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn directory_metadata(path: &VaultPath) -> Metadata {
    Metadata {
        name: path.name().unwrap_or("/").to_string(),
        size: None,
        is_directory: true,
        modified: Utc::now(),
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(&self, path: &VaultPath, data: Vec<u8>) -> Result<Metadata> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidPath("Cannot upload to root".to_string()))?;
        let mut storage = self.storage.write().await;

        match storage.get(&parent) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => {
                return Err(Error::InvalidPath("Parent is a file".to_string()));
            }
            None => {
                return Err(Error::NotFound("Parent directory not found".to_string()));
            }
        }
        if let Some(Entry::Directory { .. }) = storage.get(path) {
            return Err(Error::InvalidPath(format!("Is a directory: {}", path)));
        }

        let metadata = Metadata {
            name: path.name().unwrap_or("/").to_string(),
            size: Some(data.len() as u64),
            is_directory: false,
            modified: Utc::now(),
        };
        storage.insert(
            path.clone(),
            Entry::File {
                data,
                metadata: metadata.clone(),
            },
        );

        Ok(metadata)
    }

    async fn download(&self, path: &VaultPath) -> Result<Vec<u8>> {
        match self.storage.read().await.get(path) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(Entry::Directory { .. }) => Err(Error::InvalidPath(format!(
                "Cannot download directory: {}",
                path
            ))),
            None => Err(Error::NotFound(format!("Path not found: {}", path))),
        }
    }

    async fn exists(&self, path: &VaultPath) -> Result<bool> {
        Ok(self.storage.read().await.contains_key(path))
    }

    async fn delete(&self, path: &VaultPath) -> Result<()> {
        let mut storage = self.storage.write().await;

        match storage.get(path) {
            Some(Entry::File { .. }) => {
                storage.remove(path);
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(Error::InvalidPath(format!(
                "Cannot delete directory: {}",
                path
            ))),
            None => Err(Error::NotFound(format!("Path not found: {}", path))),
        }
    }

    async fn list(&self, path: &VaultPath) -> Result<Vec<Metadata>> {
        let storage = self.storage.read().await;

        match storage.get(path) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => {
                return Err(Error::InvalidPath(format!("Not a directory: {}", path)));
            }
            None => return Err(Error::NotFound(format!("Path not found: {}", path))),
        }

        Ok(storage
            .iter()
            .filter(|(key, _)| key.parent().as_ref() == Some(path))
            .map(|(_, entry)| entry.metadata().clone())
            .collect())
    }

    async fn create_dir(&self, path: &VaultPath) -> Result<Metadata> {
        let mut storage = self.storage.write().await;

        if storage.contains_key(path) {
            return Err(Error::AlreadyExists(format!(
                "Path already exists: {}",
                path
            )));
        }

        for ancestor in path.ancestors() {
            match storage.get(&ancestor) {
                Some(Entry::Directory { .. }) => {}
                Some(Entry::File { .. }) => {
                    return Err(Error::InvalidPath(format!(
                        "Ancestor is a file: {}",
                        ancestor
                    )));
                }
                None => {
                    let metadata = directory_metadata(&ancestor);
                    storage.insert(ancestor, Entry::Directory { metadata });
                }
            }
        }

        let metadata = directory_metadata(path);
        storage.insert(
            path.clone(),
            Entry::Directory {
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_common::ErrorKind;

    #[tokio::test]
    async fn test_upload_download() {
        let provider = MemoryProvider::new();
        let path = VaultPath::parse("/test.txt").unwrap();
        let data = b"Hello, World!".to_vec();

        provider.upload(&path, data.clone()).await.unwrap();
        assert_eq!(provider.download(&path).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_upload_requires_parent() {
        let provider = MemoryProvider::new();
        let path = VaultPath::parse("/d/blob").unwrap();

        let err = provider.upload(&path, vec![1]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_create_dir_with_parents() {
        let provider = MemoryProvider::new();
        let nested = VaultPath::parse("/a/b/c").unwrap();

        provider.create_dir(&nested).await.unwrap();
        assert!(provider.exists(&VaultPath::parse("/a/b").unwrap()).await.unwrap());

        let err = provider.create_dir(&nested).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_list_direct_children_only() {
        let provider = MemoryProvider::new();
        let dir = VaultPath::parse("/d").unwrap();

        provider.create_dir(&dir).await.unwrap();
        provider.upload(&dir.join("x").unwrap(), vec![1]).await.unwrap();
        provider.create_dir(&dir.join("sub").unwrap()).await.unwrap();
        provider
            .upload(&VaultPath::parse("/d/sub/y").unwrap(), vec![2])
            .await
            .unwrap();

        let mut names: Vec<_> = provider
            .list(&dir)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["sub", "x"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let provider = MemoryProvider::new();
        let path = VaultPath::parse("/gone").unwrap();

        provider.upload(&path, vec![0]).await.unwrap();
        provider.delete(&path).await.unwrap();
        assert!(!provider.exists(&path).await.unwrap());
        assert_eq!(
            provider.delete(&path).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
