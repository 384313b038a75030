//! Vault file operations with encryption/decryption.
//!
//! Every mutation runs as a [`Transaction`]: new blobs are written first,
//! the manifest is replaced as the commit point, and blobs that are no
//! longer referenced are deleted afterwards. A failure before the commit
//! leaves the tree, the aggregates, and the revision untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::session::{blob_path, Transaction, VaultSession};
use crate::tree::{FileEntry, NodeType};
use coffer_common::{Error, Result, VaultPath};
use coffer_crypto::{
    content_digest, decrypt_content, encrypt_content, unwrap_key, wrap_key, DataKey, MasterKey,
};

/// One child in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeType,
    pub size: u64,
}

/// Metadata of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryMetadata {
    pub name: String,
    pub kind: NodeType,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Vault operations handler.
///
/// Provides encrypted file operations on an open session.
pub struct VaultOperations<'a> {
    session: &'a VaultSession,
}

/// Read and authenticate one file's plaintext.
///
/// # Errors
/// - `CorruptVault` if the blob is missing, fails its digest, its data key
///   fails to unwrap, or any chunk fails authentication
pub(crate) async fn decrypt_entry(
    session: &VaultSession,
    master_key: &MasterKey,
    entry: &FileEntry,
) -> Result<Vec<u8>> {
    let blob = match session.provider().download(&blob_path(&entry.blob)?).await {
        Ok(blob) => blob,
        Err(Error::NotFound(_)) => {
            return Err(Error::CorruptVault(format!(
                "Content blob {} is missing",
                entry.blob
            )))
        }
        Err(e) => return Err(e),
    };

    if !content_digest(&blob).matches(&entry.digest) {
        return Err(Error::CorruptVault(format!(
            "Content blob {} failed integrity check",
            entry.blob
        )));
    }

    let data_key = unwrap_key(master_key, &entry.wrapped_key, entry.id.as_bytes())?;
    let plaintext = decrypt_content(&data_key, &blob)
        .map_err(|e| e.into_corrupt("File content failed authentication"))?;

    if plaintext.len() as u64 != entry.size {
        return Err(Error::CorruptVault(format!(
            "Content blob {} has unexpected length",
            entry.blob
        )));
    }
    Ok(plaintext)
}

/// Read a local file, reporting allocation failure as `OutOfMemory`.
async fn read_source(source: &Path) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(source).await?;
    let meta = file.metadata().await?;
    if meta.is_dir() {
        return Err(Error::InvalidPath(format!(
            "Source is a directory: {}",
            source.display()
        )));
    }

    let len = usize::try_from(meta.len()).map_err(|_| {
        Error::OutOfMemory(format!("{} is too large to load", source.display()))
    })?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| {
        Error::OutOfMemory(format!(
            "Cannot allocate {} bytes for {}",
            len,
            source.display()
        ))
    })?;
    file.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Write `data` to `dest` through a temp file in the same directory.
fn persist_output(dest: &Path, data: &[u8]) -> Result<()> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

impl<'a> VaultOperations<'a> {
    /// Create new operations handler for a session.
    pub fn new(session: &'a VaultSession) -> Self {
        Self { session }
    }

    /// Encrypt `content` under a fresh data key and upload it as a new blob.
    async fn upload_blob(&self, master_key: &MasterKey, content: &[u8]) -> Result<FileEntry> {
        let data_key = DataKey::generate();
        let entry_id = Uuid::new_v4().to_string();
        let blob = encrypt_content(&data_key, content, self.session.engine().chunk_size)?;

        let entry = FileEntry {
            wrapped_key: wrap_key(master_key, &data_key, entry_id.as_bytes())?,
            id: entry_id,
            blob: Uuid::new_v4().simple().to_string(),
            size: content.len() as u64,
            digest: content_digest(&blob),
        };

        self.session
            .provider()
            .upload(&blob_path(&entry.blob)?, blob)
            .await?;
        Ok(entry)
    }

    /// Encrypt `content`, upload it as a new blob, and stage the entry.
    async fn stage_file(
        &self,
        tx: &mut Transaction<'_>,
        path: &VaultPath,
        content: &[u8],
    ) -> Result<FileEntry> {
        tx.next.tree.check_insert(path)?;

        let entry = self.upload_blob(&tx.next.master_key, content).await?;
        if let Err(e) = tx.next.tree.insert_file(path, entry.clone()) {
            self.session.discard_blobs(std::slice::from_ref(&entry)).await;
            return Err(e);
        }
        Ok(entry)
    }

    async fn commit_new_file(
        &self,
        tx: Transaction<'_>,
        path: &VaultPath,
        entry: FileEntry,
    ) -> Result<()> {
        match tx.commit().await {
            Ok(revision) => {
                info!(path = %path, size = entry.size, revision, "File added");
                Ok(())
            }
            Err(e) => {
                self.session.discard_blobs(std::slice::from_ref(&entry)).await;
                Err(e)
            }
        }
    }

    /// Add a new file from in-memory content.
    ///
    /// # Errors
    /// - `AlreadyExists` if `path` exists
    /// - `NotFound` if the parent directory is missing
    /// - `InvalidPath` if the parent is a file or `path` is the root
    pub async fn write_new_file(&self, path: &VaultPath, content: &[u8]) -> Result<()> {
        debug!(path = %path, "Adding file");
        let mut tx = self.session.begin().await?;
        let entry = self.stage_file(&mut tx, path, content).await?;
        self.commit_new_file(tx, path, entry).await
    }

    /// Add a file from the local filesystem.
    ///
    /// Entry, aggregates, and revision are committed together or not at all.
    ///
    /// # Errors
    /// - Same as [`Self::write_new_file`]
    /// - `IoError` if the source cannot be read
    /// - `OutOfMemory` if the source cannot be buffered
    pub async fn add_file(&self, source: &Path, path: &VaultPath) -> Result<()> {
        debug!(path = %path, source = %source.display(), "Adding file");
        let mut tx = self.session.begin().await?;
        tx.next.tree.check_insert(path)?;

        let content = read_source(source).await?;
        let entry = self.stage_file(&mut tx, path, &content).await?;
        self.commit_new_file(tx, path, entry).await
    }

    /// Replace the content of an existing file.
    ///
    /// The new content gets a fresh data key and blob; the old blob is
    /// deleted only after the commit.
    ///
    /// # Errors
    /// - `NotFound` if `path` does not exist
    /// - `InvalidPath` if `path` is a directory
    pub async fn update_file(&self, path: &VaultPath, content: &[u8]) -> Result<()> {
        debug!(path = %path, "Updating file");
        let mut tx = self.session.begin().await?;
        tx.next.tree.get_file(path)?;

        let entry = self.upload_blob(&tx.next.master_key, content).await?;
        let previous = match tx.next.tree.replace_file(path, entry.clone()) {
            Ok(previous) => previous,
            Err(e) => {
                self.session.discard_blobs(std::slice::from_ref(&entry)).await;
                return Err(e);
            }
        };

        match tx.commit().await {
            Ok(revision) => {
                info!(path = %path, size = entry.size, revision, "File updated");
                self.session.discard_blobs(&[previous]).await;
                Ok(())
            }
            Err(e) => {
                self.session.discard_blobs(&[entry]).await;
                Err(e)
            }
        }
    }

    /// Replace the content of an existing file from the local filesystem.
    pub async fn update_from(&self, source: &Path, path: &VaultPath) -> Result<()> {
        let content = read_source(source).await?;
        self.update_file(path, &content).await
    }

    /// Read and decrypt file content.
    ///
    /// # Errors
    /// - `NotFound` if `path` does not exist
    /// - `InvalidPath` if `path` is a directory
    /// - `CorruptVault` if the content fails integrity checks
    pub async fn read_file(&self, path: &VaultPath) -> Result<Vec<u8>> {
        let tx = self.session.begin().await?;
        let entry = tx.next.tree.get_file(path)?;
        let content = decrypt_entry(self.session, &tx.next.master_key, entry).await?;

        debug!(path = %path, size = content.len(), "File read");
        Ok(content)
    }

    /// Decrypt a file to the local filesystem.
    ///
    /// The destination is only replaced once the content has been fully
    /// authenticated; on any failure it is left untouched.
    pub async fn extract_file(&self, path: &VaultPath, dest: &Path) -> Result<()> {
        let content = self.read_file(path).await?;

        let target = dest.to_path_buf();
        let size = content.len();
        tokio::task::spawn_blocking(move || persist_output(&target, &content))
            .await
            .map_err(|e| Error::Storage(format!("Extract task failed: {}", e)))??;

        info!(path = %path, dest = %dest.display(), size, "File extracted");
        Ok(())
    }

    /// Create a directory and any missing parents.
    ///
    /// # Errors
    /// - `AlreadyExists` if `path` exists
    /// - `InvalidPath` if an ancestor is a file or `path` is the root
    pub async fn mkdir(&self, path: &VaultPath) -> Result<()> {
        let mut tx = self.session.begin().await?;
        let created = tx.next.tree.create_dir_all(path)?;
        let revision = tx.commit().await?;

        info!(path = %path, created, revision, "Directory created");
        Ok(())
    }

    async fn remove_inner(&self, path: &VaultPath, recursive: bool) -> Result<()> {
        let mut tx = self.session.begin().await?;
        let removed = tx.next.tree.remove(path, recursive)?;
        let revision = tx.commit().await?;

        info!(path = %path, files = removed.len(), revision, "Removed");
        self.session.discard_blobs(&removed).await;
        Ok(())
    }

    /// Remove a file or an empty directory.
    ///
    /// # Errors
    /// - `NotFound` if `path` does not exist
    /// - `NotEmpty` for a directory with children
    /// - `InvalidPath` for the root
    pub async fn remove(&self, path: &VaultPath) -> Result<()> {
        self.remove_inner(path, false).await
    }

    /// Remove a file or a whole directory subtree in one commit.
    pub async fn remove_recursive(&self, path: &VaultPath) -> Result<()> {
        self.remove_inner(path, true).await
    }

    /// List directory contents, ordered by name.
    ///
    /// # Errors
    /// - `NotFound` if `path` does not exist
    /// - `InvalidPath` if `path` is a file
    pub async fn list(&self, path: &VaultPath) -> Result<Vec<DirEntry>> {
        self.session
            .read(|s| {
                Ok(s.tree
                    .list(path)?
                    .into_iter()
                    .map(|node| DirEntry {
                        name: node.name.clone(),
                        kind: node.node_type(),
                        size: node.size(),
                    })
                    .collect())
            })
            .await
    }

    /// Stat a single path.
    ///
    /// # Errors
    /// - `NotFound` if `path` does not exist
    pub async fn metadata(&self, path: &VaultPath) -> Result<EntryMetadata> {
        self.session
            .read(|s| {
                let node = s.tree.get_node(path)?;
                Ok(EntryMetadata {
                    name: node.name.clone(),
                    kind: node.node_type(),
                    size: node.size(),
                    created_at: node.created_at,
                    modified_at: node.modified_at,
                })
            })
            .await
    }

    /// Check if path exists.
    pub async fn exists(&self, path: &VaultPath) -> Result<bool> {
        self.session.read(|s| Ok(s.tree.exists(path))).await
    }
}

/// Serialize a listing as a JSON array.
pub fn listing_to_json(entries: &[DirEntry]) -> Result<String> {
    Ok(serde_json::to_string(entries)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use coffer_common::{ErrorKind, VaultHandle};
    use coffer_crypto::KdfParams;
    use coffer_storage::{MemoryProvider, StorageProvider};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_session() -> (VaultSession, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::new());
        let engine = EngineConfig {
            kdf_params: KdfParams {
                memory_cost: 1024,
                time_cost: 1,
                parallelism: 1,
            },
            chunk_size: 32,
        };
        let session = VaultSession::create(
            VaultHandle::from_raw(1),
            provider.clone(),
            "mem",
            b"test-password",
            engine,
            None,
        )
        .await
        .unwrap();
        (session, provider)
    }

    fn p(path: &str) -> VaultPath {
        VaultPath::parse(path).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read_file() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);

        let content = b"Hello, encrypted world! Spanning several chunks of content.";
        ops.write_new_file(&p("/test.txt"), content).await.unwrap();

        assert_eq!(ops.read_file(&p("/test.txt")).await.unwrap(), content);
        let info = session.info().await.unwrap();
        assert_eq!((info.file_count, info.total_size), (1, content.len() as u64));
        assert_eq!(info.version, 2);
    }

    #[tokio::test]
    async fn test_empty_file_roundtrip() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);

        ops.write_new_file(&p("/empty"), b"").await.unwrap();
        assert!(ops.read_file(&p("/empty")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_existing_fails_without_bumping_version() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);

        ops.write_new_file(&p("/a"), b"1").await.unwrap();
        let err = ops.write_new_file(&p("/a"), b"2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(session.info().await.unwrap().version, 2);
        assert_eq!(ops.read_file(&p("/a")).await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_add_and_extract_local_file() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);
        let temp = TempDir::new().unwrap();

        let source = temp.path().join("source.bin");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &data).unwrap();

        ops.add_file(&source, &p("/source.bin")).await.unwrap();

        let dest = temp.path().join("out.bin");
        ops.extract_file(&p("/source.bin"), &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn test_add_missing_source_is_io_error() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);
        let temp = TempDir::new().unwrap();

        let err = ops
            .add_file(&temp.path().join("nope"), &p("/x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert_eq!(session.info().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_extract_directory_is_invalid_path() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);
        let temp = TempDir::new().unwrap();

        ops.mkdir(&p("/docs")).await.unwrap();
        let err = ops
            .extract_file(&p("/docs"), &temp.path().join("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
    }

    #[tokio::test]
    async fn test_tampered_blob_is_corrupt_and_no_output() {
        let (session, provider) = create_test_session().await;
        let ops = VaultOperations::new(&session);
        let temp = TempDir::new().unwrap();

        ops.write_new_file(&p("/secret"), b"classified").await.unwrap();
        let blob = session
            .read(|s| Ok(s.tree.get_file(&p("/secret"))?.blob.clone()))
            .await
            .unwrap();
        let path = blob_path(&blob).unwrap();
        let mut bytes = provider.download(&path).await.unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        provider.upload(&path, bytes).await.unwrap();

        let dest = temp.path().join("out");
        let err = ops.extract_file(&p("/secret"), &dest).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptVault);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_remove_deletes_blob() {
        let (session, provider) = create_test_session().await;
        let ops = VaultOperations::new(&session);

        ops.write_new_file(&p("/f"), b"data").await.unwrap();
        let blob = session
            .read(|s| Ok(s.tree.get_file(&p("/f"))?.blob.clone()))
            .await
            .unwrap();

        ops.remove(&p("/f")).await.unwrap();
        assert!(!provider.exists(&blob_path(&blob).unwrap()).await.unwrap());
        assert_eq!(ops.read_file(&p("/f")).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_remove_recursive() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);

        ops.mkdir(&p("/a/b")).await.unwrap();
        ops.write_new_file(&p("/a/b/x"), b"12345").await.unwrap();
        ops.write_new_file(&p("/a/y"), b"678").await.unwrap();

        assert_eq!(ops.remove(&p("/a")).await.unwrap_err().kind(), ErrorKind::NotEmpty);
        ops.remove_recursive(&p("/a")).await.unwrap();

        let info = session.info().await.unwrap();
        assert_eq!((info.file_count, info.total_size), (0, 0));
        assert_eq!(ops.list(&p("/a")).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_directory() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);

        ops.mkdir(&p("/dir")).await.unwrap();
        ops.write_new_file(&p("/dir/b.txt"), b"bb").await.unwrap();
        ops.write_new_file(&p("/dir/a.txt"), b"a").await.unwrap();
        ops.mkdir(&p("/dir/sub")).await.unwrap();

        let contents = ops.list(&p("/dir")).await.unwrap();
        assert_eq!(
            contents,
            vec![
                DirEntry { name: "a.txt".into(), kind: NodeType::File, size: 1 },
                DirEntry { name: "b.txt".into(), kind: NodeType::File, size: 2 },
                DirEntry { name: "sub".into(), kind: NodeType::Directory, size: 0 },
            ]
        );

        let json = listing_to_json(&contents).unwrap();
        assert!(json.starts_with(r#"[{"name":"a.txt","kind":"file","size":1}"#));
        assert!(json.contains(r#"{"name":"sub","kind":"directory","size":0}"#));
    }

    #[tokio::test]
    async fn test_update_file_swaps_blob() {
        let (session, provider) = create_test_session().await;
        let ops = VaultOperations::new(&session);
        let data_dir = p("/d");

        ops.write_new_file(&p("/doc"), b"first version").await.unwrap();
        let old_blobs = provider.list(&data_dir).await.unwrap();

        ops.update_file(&p("/doc"), b"v2").await.unwrap();
        assert_eq!(ops.read_file(&p("/doc")).await.unwrap(), b"v2");

        let info = session.info().await.unwrap();
        assert_eq!((info.file_count, info.total_size, info.version), (1, 2, 3));

        let new_blobs = provider.list(&data_dir).await.unwrap();
        assert_eq!(new_blobs.len(), 1);
        assert_ne!(new_blobs[0].name, old_blobs[0].name);
        session.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_file_errors_leave_vault_unchanged() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);

        ops.mkdir(&p("/dir")).await.unwrap();
        let err = ops.update_file(&p("/missing"), b"x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = ops.update_file(&p("/dir"), b"x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
        assert_eq!(session.info().await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_metadata() {
        let (session, _) = create_test_session().await;
        let ops = VaultOperations::new(&session);

        ops.mkdir(&p("/docs")).await.unwrap();
        ops.write_new_file(&p("/docs/a.txt"), b"12345").await.unwrap();

        let file = ops.metadata(&p("/docs/a.txt")).await.unwrap();
        assert_eq!(file.name, "a.txt");
        assert_eq!(file.kind, NodeType::File);
        assert_eq!(file.size, 5);

        let before = file.clone();
        ops.update_file(&p("/docs/a.txt"), b"123").await.unwrap();
        let file = ops.metadata(&p("/docs/a.txt")).await.unwrap();
        assert_eq!(file.size, 3);
        assert!(file.modified_at >= before.modified_at);
        assert_eq!(file.created_at, before.created_at);

        let dir = ops.metadata(&p("/docs")).await.unwrap();
        assert_eq!((dir.kind, dir.size), (NodeType::Directory, 0));

        let err = ops.metadata(&p("/nope")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
