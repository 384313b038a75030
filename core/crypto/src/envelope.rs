//! Envelope encryption of per-file data keys.
//!
//! Each file is encrypted under its own random [`DataKey`]. Only the data
//! key is encrypted ("wrapped") under the [`MasterKey`], so a password
//! change re-wraps a few dozen bytes per file instead of re-encrypting
//! file contents.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::aead::{decrypt_with_aad, encrypt_with_aad, NONCE_SIZE, TAG_SIZE};
use crate::keys::{b64, DataKey, MasterKey, KEY_LENGTH};
use coffer_common::{Error, Result};

/// Serialized size of a wrapped key.
pub const WRAPPED_KEY_SIZE: usize = NONCE_SIZE + KEY_LENGTH + TAG_SIZE;

/// A data key encrypted under a master key: nonce || ciphertext || tag.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey(Vec<u8>);

impl WrappedKey {
    /// Raw wrapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Rebuild from raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrappedKey({} bytes)", self.0.len())
    }
}

impl Serialize for WrappedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        b64::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for WrappedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        b64::deserialize(deserializer).map(Self)
    }
}

/// Wrap a data key under the master key.
///
/// `binding` is authenticated with the wrapped key so it cannot be moved
/// to another entry; callers pass the owning entry's identifier.
pub fn wrap_key(master: &MasterKey, data_key: &DataKey, binding: &[u8]) -> Result<WrappedKey> {
    encrypt_with_aad(master.as_bytes(), data_key.as_bytes(), binding).map(WrappedKey)
}

/// Unwrap a data key.
///
/// # Errors
/// - `CorruptVault` if the wrapping fails its integrity check, which
///   means either damaged storage or a master key that should never have
///   passed authentication
pub fn unwrap_key(master: &MasterKey, wrapped: &WrappedKey, binding: &[u8]) -> Result<DataKey> {
    if wrapped.0.len() != WRAPPED_KEY_SIZE {
        return Err(Error::CorruptVault(format!(
            "Wrapped key has invalid length {}",
            wrapped.0.len()
        )));
    }

    let mut plain = decrypt_with_aad(master.as_bytes(), &wrapped.0, binding)
        .map_err(|_| Error::CorruptVault("Data key failed integrity check".to_string()))?;

    let mut bytes = [0u8; KEY_LENGTH];
    bytes.copy_from_slice(&plain);
    zeroize::Zeroize::zeroize(&mut plain);

    let key = DataKey::from_bytes(bytes);
    zeroize::Zeroize::zeroize(&mut bytes);
    Ok(key)
}
