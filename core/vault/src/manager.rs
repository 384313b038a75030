//! Vault manager: owns every open session and hands out handles.

use dashmap::DashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::{EngineConfig, MANIFEST_FILENAME};
use crate::session::VaultSession;
use coffer_common::{Error, Result, VaultHandle};
use coffer_storage::{LocalProvider, StorageProvider, VaultLock};

/// Registry of open vault sessions.
///
/// Handles are allocated from a counter starting at 1 and are never
/// reused, so a closed handle can never alias a later session.
pub struct VaultManager {
    config: EngineConfig,
    sessions: DashMap<VaultHandle, Arc<VaultSession>>,
    next_handle: AtomicU64,
}

impl VaultManager {
    /// Create a manager with default settings.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a manager with custom settings.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Engine settings used for new sessions.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn allocate_handle(&self) -> VaultHandle {
        VaultHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, session: VaultSession) -> VaultHandle {
        let handle = session.handle();
        self.sessions.insert(handle, Arc::new(session));
        debug!(handle = %handle, open = self.sessions.len(), "Session registered");
        handle
    }

    /// Create a new vault in a local directory.
    ///
    /// # Preconditions
    /// - `path` is a directory or does not exist yet
    ///
    /// # Postconditions
    /// - Vault structure is created and the directory is locked
    /// - Returns a fresh handle
    ///
    /// # Errors
    /// - `AlreadyExists` if the directory already holds a vault
    /// - `InvalidPath` if `path` is a file
    /// - `Busy` if another session holds the directory lock
    pub async fn create(&self, path: &Path, password: &[u8]) -> Result<VaultHandle> {
        let provider = LocalProvider::new(path)?;
        if path.join(MANIFEST_FILENAME).exists() {
            return Err(Error::AlreadyExists(format!(
                "A vault already exists at {}",
                path.display()
            )));
        }
        let lock = VaultLock::acquire(path)?;
        let root_path = canonical_display(path).await;

        let session = VaultSession::create(
            self.allocate_handle(),
            Arc::new(provider),
            root_path,
            password,
            self.config.clone(),
            Some(lock),
        )
        .await?;
        Ok(self.register(session))
    }

    /// Open an existing vault in a local directory.
    ///
    /// # Errors
    /// - `NotFound` if `path` holds no vault
    /// - `AuthenticationFailed` if the password is wrong
    /// - `CorruptVault` if persisted structures fail integrity checks
    /// - `Busy` if another session holds the directory lock
    pub async fn open(&self, path: &Path, password: &[u8]) -> Result<VaultHandle> {
        let is_dir = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.is_dir(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if !is_dir || !tokio::fs::try_exists(path.join(MANIFEST_FILENAME)).await? {
            return Err(Error::NotFound(format!("No vault at {}", path.display())));
        }
        let provider = LocalProvider::new(path)?;
        let lock = VaultLock::acquire(path)?;
        let root_path = canonical_display(path).await;

        let session = VaultSession::open(
            self.allocate_handle(),
            Arc::new(provider),
            root_path,
            password,
            self.config.clone(),
            Some(lock),
        )
        .await?;
        Ok(self.register(session))
    }

    /// Create a vault on an arbitrary provider.
    ///
    /// No cross-session lock is taken; the caller owns exclusivity.
    pub async fn create_with_provider(
        &self,
        provider: Arc<dyn StorageProvider>,
        root_path: &str,
        password: &[u8],
    ) -> Result<VaultHandle> {
        let session = VaultSession::create(
            self.allocate_handle(),
            provider,
            root_path,
            password,
            self.config.clone(),
            None,
        )
        .await?;
        Ok(self.register(session))
    }

    /// Open a vault on an arbitrary provider.
    pub async fn open_with_provider(
        &self,
        provider: Arc<dyn StorageProvider>,
        root_path: &str,
        password: &[u8],
    ) -> Result<VaultHandle> {
        let session = VaultSession::open(
            self.allocate_handle(),
            provider,
            root_path,
            password,
            self.config.clone(),
            None,
        )
        .await?;
        Ok(self.register(session))
    }

    /// Look up an open session.
    ///
    /// # Errors
    /// - `InvalidHandle` for unknown or closed handles
    pub fn get(&self, handle: VaultHandle) -> Result<Arc<VaultSession>> {
        self.sessions
            .get(&handle)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::InvalidHandle(handle.as_raw()))
    }

    /// Close a session and invalidate its handle.
    ///
    /// # Errors
    /// - `InvalidHandle` for unknown or already closed handles
    pub async fn close(&self, handle: VaultHandle) -> Result<()> {
        let (_, session) = self
            .sessions
            .remove(&handle)
            .ok_or_else(|| Error::InvalidHandle(handle.as_raw()))?;
        session.close().await
    }

    /// Number of open sessions.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for VaultManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn canonical_display(path: &Path) -> String {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
