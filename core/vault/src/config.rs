//! Vault configuration and persisted manifest.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tree::VaultTree;
use coffer_common::{Error, Result, VaultId};
use coffer_crypto::{
    decrypt_with_aad, derive_key, encrypt_with_aad, verification_tag, verify_tag, KdfParams,
    MasterKey, Salt, VerificationTag,
};

/// Manifest file name in vault root.
pub const MANIFEST_FILENAME: &str = "vault.manifest";

/// Data directory name in vault root.
pub const DATA_DIRNAME: &str = "d";

/// Default content chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = coffer_crypto::stream::DEFAULT_CHUNK_SIZE;

/// Vault format version for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultVersion {
    pub major: u32,
    pub minor: u32,
}

impl VaultVersion {
    /// Current vault format version.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    /// Check if this version is compatible with the current version.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for VaultVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Engine-wide settings applied to vaults created or opened by a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Argon2id parameters for newly created key material.
    pub kdf_params: KdfParams,
    /// Plaintext bytes per encrypted content chunk.
    pub chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kdf_params: KdfParams::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Persisted key material: everything needed to re-derive and check the
/// master key, and nothing that reveals it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub salt: Salt,
    pub kdf_params: KdfParams,
    pub verification_tag: VerificationTag,
}

impl KeyMaterial {
    /// Generate fresh key material for a password.
    ///
    /// # Postconditions
    /// - Salt is randomly generated
    /// - Returns the derived master key alongside the material
    pub fn generate(password: &[u8], kdf_params: &KdfParams) -> Result<(Self, MasterKey)> {
        let salt = Salt::generate();
        let master_key = derive_key(password, &salt, kdf_params)?;
        let verification_tag = verification_tag(&master_key)?;

        Ok((
            Self {
                salt,
                kdf_params: kdf_params.clone(),
                verification_tag,
            },
            master_key,
        ))
    }

    /// Derive the master key for `password` and check it against the tag.
    ///
    /// # Errors
    /// - `CorruptVault` if the stored KDF parameters are out of range
    /// - `AuthenticationFailed` if the password does not match
    pub fn unlock(&self, password: &[u8]) -> Result<MasterKey> {
        self.kdf_params.validate().map_err(|e| {
            Error::CorruptVault(format!("Stored KDF parameters rejected: {}", e))
        })?;
        let candidate = derive_key(password, &self.salt, &self.kdf_params)?;
        if !verify_tag(&candidate, &self.verification_tag)? {
            return Err(Error::AuthenticationFailed);
        }
        Ok(candidate)
    }

    /// Check that `key` is the master key described by this material.
    pub fn matches(&self, key: &MasterKey) -> Result<bool> {
        verify_tag(key, &self.verification_tag)
    }
}

/// The vault manifest stored at the vault root.
///
/// Rewriting the manifest is the commit point of every mutation: the key
/// material, the revision, and the sealed tree are replaced together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Vault format version.
    pub format: VaultVersion,
    /// Unique vault identifier.
    pub vault_id: VaultId,
    /// Vault creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last commit timestamp.
    pub modified_at: DateTime<Utc>,
    /// Password key material.
    pub key: KeyMaterial,
    /// Commit counter, bumped on every committed mutation.
    pub revision: u64,
    /// Base64 of the tree sealed under the master key.
    pub tree: String,
}

fn tree_aad(vault_id: &VaultId, revision: u64) -> Vec<u8> {
    format!("coffer/tree/v1:{}:{}", vault_id, revision).into_bytes()
}

impl Manifest {
    /// Seal `tree` into a manifest for the given commit.
    pub fn seal(
        vault_id: VaultId,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
        key: KeyMaterial,
        revision: u64,
        tree: &VaultTree,
        master_key: &MasterKey,
    ) -> Result<Self> {
        let plaintext = tree.to_bytes()?;
        let sealed = encrypt_with_aad(
            master_key.as_bytes(),
            &plaintext,
            &tree_aad(&vault_id, revision),
        )?;

        Ok(Self {
            format: VaultVersion::CURRENT,
            vault_id,
            created_at,
            modified_at,
            key,
            revision,
            tree: URL_SAFE_NO_PAD.encode(sealed),
        })
    }

    /// Decrypt and validate the sealed tree.
    ///
    /// # Errors
    /// - `CorruptVault` if the tree fails authentication or does not parse
    pub fn open_tree(&self, master_key: &MasterKey) -> Result<VaultTree> {
        let sealed = URL_SAFE_NO_PAD
            .decode(self.tree.as_bytes())
            .map_err(|e| Error::CorruptVault(format!("Tree encoding invalid: {}", e)))?;

        let plaintext = decrypt_with_aad(
            master_key.as_bytes(),
            &sealed,
            &tree_aad(&self.vault_id, self.revision),
        )
        .map_err(|e| e.into_corrupt("Vault index failed integrity check"))?;

        let tree = VaultTree::from_bytes(&plaintext)
            .map_err(|e| e.into_corrupt("Vault index is malformed"))?;
        tree.validate()?;
        Ok(tree)
    }

    /// Reject manifests written by an incompatible format.
    pub fn check_format(&self) -> Result<()> {
        if !self.format.is_compatible() {
            return Err(Error::CorruptVault(format!(
                "Unsupported vault format {}.{}",
                self.format.major, self.format.minor
            )));
        }
        Ok(())
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize from bytes.
    ///
    /// # Errors
    /// - `CorruptVault` if the bytes are not a manifest
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::CorruptVault(format!("Manifest is malformed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_common::{ErrorKind, VaultPath};

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_vault_version_compatibility() {
        let current = VaultVersion::CURRENT;
        assert!(current.is_compatible());

        let incompatible = VaultVersion { major: 2, minor: 0 };
        assert!(!incompatible.is_compatible());
    }

    #[test]
    fn test_key_material_unlock() {
        let (material, key) = KeyMaterial::generate(b"secure-password", &fast_params()).unwrap();

        let unlocked = material.unlock(b"secure-password").unwrap();
        assert_eq!(unlocked.as_bytes(), key.as_bytes());
        assert!(material.matches(&key).unwrap());

        let err = material.unlock(b"wrong-password").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn test_manifest_seal_and_open() {
        let (material, key) = KeyMaterial::generate(b"pw", &fast_params()).unwrap();
        let mut tree = VaultTree::new();
        tree.create_dir_all(&VaultPath::parse("/docs").unwrap()).unwrap();

        let now = Utc::now();
        let id = VaultId::new("vault-1").unwrap();
        let manifest = Manifest::seal(id, now, now, material, 3, &tree, &key).unwrap();

        let restored = Manifest::from_bytes(&manifest.to_bytes().unwrap()).unwrap();
        restored.check_format().unwrap();
        let opened = restored.open_tree(&key).unwrap();
        assert!(opened.exists(&VaultPath::parse("/docs").unwrap()));
    }

    #[test]
    fn test_manifest_revision_is_authenticated() {
        let (material, key) = KeyMaterial::generate(b"pw", &fast_params()).unwrap();
        let now = Utc::now();
        let id = VaultId::new("vault-1").unwrap();
        let mut manifest =
            Manifest::seal(id, now, now, material, 3, &VaultTree::new(), &key).unwrap();

        manifest.revision = 2;
        let err = manifest.open_tree(&key).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptVault);
    }

    #[test]
    fn test_malformed_manifest_is_corrupt() {
        let err = Manifest::from_bytes(b"{ not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptVault);
    }

    #[test]
    fn test_future_format_rejected() {
        let (material, key) = KeyMaterial::generate(b"pw", &fast_params()).unwrap();
        let now = Utc::now();
        let id = VaultId::new("vault-1").unwrap();
        let mut manifest =
            Manifest::seal(id, now, now, material, 1, &VaultTree::new(), &key).unwrap();
        manifest.format = VaultVersion { major: 9, minor: 0 };

        assert_eq!(
            manifest.check_format().unwrap_err().kind(),
            ErrorKind::CorruptVault
        );
    }
}
