//! Vault session management.
//!
//! A session owns one open vault: its master key, the current committed
//! snapshot of the tree, and the storage lock. Readers take a shared view
//! of the committed snapshot. Mutations are serialized through a writer
//! lock, build the next snapshot on a private copy, and publish it only
//! after the manifest has been durably replaced.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, KeyMaterial, Manifest, DATA_DIRNAME, MANIFEST_FILENAME};
use crate::tree::{FileEntry, VaultTree};
use coffer_common::{Error, Result, VaultHandle, VaultId, VaultPath};
use coffer_crypto::{unwrap_key, wrap_key, MasterKey};
use coffer_storage::{StorageProvider, VaultLock, TEMP_PREFIX};

/// Summary of an open vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultInfo {
    pub vault_id: String,
    pub root_path: String,
    pub file_count: u64,
    pub total_size: u64,
    pub version: u64,
}

/// Result of a full verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Files whose blobs were read and checked.
    pub files_checked: u64,
    /// Plaintext bytes covered by those files.
    pub bytes_checked: u64,
}

/// One committed state of the vault.
#[derive(Clone)]
pub(crate) struct Snapshot {
    pub key: KeyMaterial,
    pub master_key: MasterKey,
    pub tree: VaultTree,
    pub revision: u64,
    pub modified_at: DateTime<Utc>,
}

/// Open vault session.
///
/// The master key lives inside the committed snapshot and is zeroized when
/// the session is closed or dropped.
pub struct VaultSession {
    handle: VaultHandle,
    vault_id: VaultId,
    root_path: String,
    created_at: DateTime<Utc>,
    engine: EngineConfig,
    provider: Arc<dyn StorageProvider>,
    state: RwLock<Option<Snapshot>>,
    writer: Mutex<()>,
    poisoned: AtomicBool,
    lock: Mutex<Option<VaultLock>>,
}

/// A serialized unit of work against a session.
///
/// Holds the writer lock for its lifetime. Dropping it without calling
/// [`Transaction::commit`] leaves the vault unchanged.
pub(crate) struct Transaction<'a> {
    session: &'a VaultSession,
    _guard: MutexGuard<'a, ()>,
    pub next: Snapshot,
}

impl Transaction<'_> {
    /// Persist the next snapshot and publish it.
    ///
    /// Returns the new revision.
    pub async fn commit(self) -> Result<u64> {
        let Transaction {
            session,
            _guard,
            mut next,
        } = self;

        next.revision += 1;
        next.modified_at = Utc::now();
        session.write_manifest(&next).await?;

        let revision = next.revision;
        *session.state.write().await = Some(next);
        debug!(handle = %session.handle, revision, "Committed");
        Ok(revision)
    }
}

fn manifest_path() -> Result<VaultPath> {
    VaultPath::parse(MANIFEST_FILENAME)
}

/// Storage path of a content blob.
pub(crate) fn blob_path(blob: &str) -> Result<VaultPath> {
    VaultPath::parse(DATA_DIRNAME)?.join(blob)
}

impl VaultSession {
    /// Initialize a new vault in `provider`.
    ///
    /// # Postconditions
    /// - Manifest and data directory exist in storage
    /// - Returned session holds the derived master key
    ///
    /// # Errors
    /// - `AlreadyExists` if storage already holds a vault
    /// - `InvalidArgument` for an empty password
    pub async fn create(
        handle: VaultHandle,
        provider: Arc<dyn StorageProvider>,
        root_path: impl Into<String>,
        password: &[u8],
        engine: EngineConfig,
        lock: Option<VaultLock>,
    ) -> Result<Self> {
        let root_path = root_path.into();
        if provider.exists(&manifest_path()?).await? {
            return Err(Error::AlreadyExists(format!(
                "A vault already exists at {}",
                root_path
            )));
        }

        let (key, master_key) = KeyMaterial::generate(password, &engine.kdf_params)?;

        let data_dir = VaultPath::parse(DATA_DIRNAME)?;
        if !provider.exists(&data_dir).await? {
            provider.create_dir(&data_dir).await?;
        }
        let now = Utc::now();
        let session = Self {
            handle,
            vault_id: VaultId::new(Uuid::new_v4().to_string())?,
            root_path,
            created_at: now,
            engine,
            provider,
            state: RwLock::new(None),
            writer: Mutex::new(()),
            poisoned: AtomicBool::new(false),
            lock: Mutex::new(lock),
        };

        let snapshot = Snapshot {
            key,
            master_key,
            tree: VaultTree::new(),
            revision: 1,
            modified_at: now,
        };
        session.write_manifest(&snapshot).await?;
        *session.state.write().await = Some(snapshot);

        info!(handle = %handle, vault_id = %session.vault_id, "Vault created");
        Ok(session)
    }

    /// Open an existing vault in `provider`.
    ///
    /// # Errors
    /// - `NotFound` if storage holds no vault
    /// - `AuthenticationFailed` if the password is wrong
    /// - `CorruptVault` if the manifest or index fail integrity checks
    pub async fn open(
        handle: VaultHandle,
        provider: Arc<dyn StorageProvider>,
        root_path: impl Into<String>,
        password: &[u8],
        engine: EngineConfig,
        lock: Option<VaultLock>,
    ) -> Result<Self> {
        let root_path = root_path.into();
        let path = manifest_path()?;
        if !provider.exists(&path).await? {
            return Err(Error::NotFound(format!("No vault at {}", root_path)));
        }

        let manifest = Manifest::from_bytes(&provider.download(&path).await?)?;
        manifest.check_format()?;

        let master_key = manifest.key.unlock(password)?;
        let tree = manifest.open_tree(&master_key)?;

        let session = Self {
            handle,
            vault_id: manifest.vault_id,
            root_path,
            created_at: manifest.created_at,
            engine,
            provider,
            state: RwLock::new(None),
            writer: Mutex::new(()),
            poisoned: AtomicBool::new(false),
            lock: Mutex::new(lock),
        };
        session.collect_orphans(&tree).await?;

        *session.state.write().await = Some(Snapshot {
            key: manifest.key,
            master_key,
            tree,
            revision: manifest.revision,
            modified_at: manifest.modified_at,
        });

        info!(handle = %handle, vault_id = %session.vault_id, "Vault opened");
        Ok(session)
    }

    /// Get the session handle.
    pub fn handle(&self) -> VaultHandle {
        self.handle
    }

    /// Get the vault ID.
    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    /// Location the vault was opened from.
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Vault creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    /// Get the storage provider.
    pub fn provider(&self) -> Arc<dyn StorageProvider> {
        self.provider.clone()
    }

    /// Whether a key material check has failed on this session.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    fn check_usable(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(Error::CorruptVault(
                "Key material failed verification; close and reopen the vault".to_string(),
            ));
        }
        Ok(())
    }

    /// Run `f` against the committed snapshot.
    pub(crate) async fn read<R>(&self, f: impl FnOnce(&Snapshot) -> Result<R>) -> Result<R> {
        self.check_usable()?;
        let state = self.state.read().await;
        let snapshot = state
            .as_ref()
            .ok_or_else(|| Error::InvalidHandle(self.handle.as_raw()))?;
        f(snapshot)
    }

    /// Start a serialized unit of work.
    ///
    /// Waits for any mutation already in progress on this session.
    pub(crate) async fn begin(&self) -> Result<Transaction<'_>> {
        let guard = self.writer.lock().await;
        let next = self.read(|s| Ok(s.clone())).await?;
        Ok(Transaction {
            session: self,
            _guard: guard,
            next,
        })
    }

    async fn write_manifest(&self, snapshot: &Snapshot) -> Result<()> {
        let manifest = Manifest::seal(
            self.vault_id.clone(),
            self.created_at,
            snapshot.modified_at,
            snapshot.key.clone(),
            snapshot.revision,
            &snapshot.tree,
            &snapshot.master_key,
        )?;
        self.provider
            .upload(&manifest_path()?, manifest.to_bytes()?)
            .await?;
        Ok(())
    }

    /// Delete blobs no longer referenced by a committed tree.
    ///
    /// Failures are logged; a leftover blob is collected on the next open.
    pub(crate) async fn discard_blobs(&self, entries: &[FileEntry]) {
        for entry in entries {
            let result = match blob_path(&entry.blob) {
                Ok(path) => self.provider.delete(&path).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(blob = %entry.blob, "Failed to delete blob: {}", e);
            }
        }
    }

    /// Remove leftovers of interrupted writes: staging files in the vault
    /// root or the data directory, and blobs that `tree` does not reference.
    async fn collect_orphans(&self, tree: &VaultTree) -> Result<()> {
        let data_dir = VaultPath::parse(DATA_DIRNAME)?;
        if !self.provider.exists(&data_dir).await? {
            return Err(Error::CorruptVault("Data directory is missing".to_string()));
        }

        let root = VaultPath::root();
        for meta in self.provider.list(&root).await? {
            if meta.is_directory || !meta.name.starts_with(TEMP_PREFIX) {
                continue;
            }
            debug!(file = %meta.name, "Removing stale staging file");
            if let Err(e) = self.provider.delete(&root.join(&meta.name)?).await {
                warn!(file = %meta.name, "Failed to remove staging file: {}", e);
            }
        }

        let live: HashSet<&str> = tree.files().iter().map(|f| f.blob.as_str()).collect();
        for meta in self.provider.list(&data_dir).await? {
            if meta.is_directory || live.contains(meta.name.as_str()) {
                continue;
            }
            debug!(blob = %meta.name, "Removing orphaned blob");
            if let Err(e) = self.provider.delete(&data_dir.join(&meta.name)?).await {
                warn!(blob = %meta.name, "Failed to remove orphaned blob: {}", e);
            }
        }
        Ok(())
    }

    /// Cheap summary from maintained aggregates.
    pub async fn info(&self) -> Result<VaultInfo> {
        self.read(|s| {
            Ok(VaultInfo {
                vault_id: self.vault_id.to_string(),
                root_path: self.root_path.clone(),
                file_count: s.tree.file_count(),
                total_size: s.tree.total_size(),
                version: s.revision,
            })
        })
        .await
    }

    /// Change the vault password.
    ///
    /// Every data key is re-wrapped under the new master key and committed
    /// together with the new key material in one manifest write. File
    /// contents are not touched.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if `old_password` is wrong
    /// - `InvalidArgument` if `new_password` is empty
    /// - Storage errors, in which case the vault still opens with the old
    ///   password
    pub async fn change_password(&self, old_password: &[u8], new_password: &[u8]) -> Result<()> {
        let mut tx = self.begin().await?;

        // The tag check inside unlock is the authentication; the derived key
        // equals the session's master key.
        tx.next.key.unlock(old_password)?;

        let params = tx.next.key.kdf_params.clone();
        let (new_material, new_key) = KeyMaterial::generate(new_password, &params)?;

        let old_key = &tx.next.master_key;
        let mut rewrapped = 0usize;
        for entry in tx.next.tree.files_mut() {
            let data_key = unwrap_key(old_key, &entry.wrapped_key, entry.id.as_bytes())?;
            entry.wrapped_key = wrap_key(&new_key, &data_key, entry.id.as_bytes())?;
            rewrapped += 1;
        }

        tx.next.key = new_material;
        tx.next.master_key = new_key;
        tx.commit().await?;

        info!(handle = %self.handle, files = rewrapped, "Password changed");
        Ok(())
    }

    /// Full consistency check.
    ///
    /// Recomputes aggregates, re-reads the persisted manifest, checks its key
    /// material against the session's master key, and authenticates every
    /// blob. A key material mismatch poisons the session.
    pub async fn verify(&self) -> Result<VerifyReport> {
        let tx = self.begin().await?;
        let snapshot = &tx.next;

        snapshot.tree.validate()?;

        let manifest = Manifest::from_bytes(&self.provider.download(&manifest_path()?).await?)?;
        manifest.check_format()?;
        if manifest.key != snapshot.key || !manifest.key.matches(&snapshot.master_key)? {
            self.poisoned.store(true, Ordering::Release);
            warn!(handle = %self.handle, "Key material mismatch; session poisoned");
            return Err(Error::CorruptVault(
                "Persisted key material does not match the session".to_string(),
            ));
        }
        if manifest.vault_id != self.vault_id || manifest.revision != snapshot.revision {
            return Err(Error::CorruptVault(format!(
                "Manifest revision {} does not match session revision {}",
                manifest.revision, snapshot.revision
            )));
        }
        manifest.open_tree(&snapshot.master_key)?;

        let mut report = VerifyReport {
            files_checked: 0,
            bytes_checked: 0,
        };
        for entry in snapshot.tree.files() {
            crate::operations::decrypt_entry(self, &snapshot.master_key, entry).await?;
            report.files_checked += 1;
            report.bytes_checked += entry.size;
        }

        info!(handle = %self.handle, files = report.files_checked, "Vault verified");
        Ok(report)
    }

    /// Release the session.
    ///
    /// Waits for an in-flight mutation, drops (and zeroizes) the master
    /// key, and releases the storage lock.
    ///
    /// # Errors
    /// - `InvalidHandle` if the session is already closed
    pub async fn close(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        let snapshot = self
            .state
            .write()
            .await
            .take()
            .ok_or_else(|| Error::InvalidHandle(self.handle.as_raw()))?;
        drop(snapshot);
        self.lock.lock().await.take();

        info!(handle = %self.handle, "Vault closed");
        Ok(())
    }
}
