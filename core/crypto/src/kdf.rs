//! Key derivation using Argon2id, and password verification tags.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::digest::{consts::U32, Mac};
use blake2::Blake2bMac;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;

use crate::keys::{b64, MasterKey, Salt, KEY_LENGTH};
use coffer_common::{Error, Result};

/// Domain string authenticated by the verification tag.
const VERIFICATION_DOMAIN: &[u8] = b"coffer/key-verification/v1";

/// Largest accepted memory cost in KiB (1 GiB).
pub const MAX_MEMORY_COST: u32 = 1024 * 1024;

/// Largest accepted iteration count.
pub const MAX_TIME_COST: u32 = 16;

/// Largest accepted degree of parallelism.
pub const MAX_PARALLELISM: u32 = 16;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Look up a preset by name.
    pub fn from_preset(name: &str) -> Option<Self> {
        match name {
            "interactive" => Some(Self::interactive()),
            "moderate" => Some(Self::moderate()),
            "sensitive" => Some(Self::sensitive()),
            _ => None,
        }
    }

    /// Check the parameters against Argon2's minimums and our ceilings.
    ///
    /// Parameters read from storage must pass this before any derivation.
    ///
    /// # Errors
    /// - `InvalidArgument` if any parameter is out of range
    pub fn validate(&self) -> Result<()> {
        if self.memory_cost > MAX_MEMORY_COST
            || self.time_cost > MAX_TIME_COST
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(Error::InvalidArgument(format!(
                "KDF parameters exceed limits (m={}, t={}, p={})",
                self.memory_cost, self.time_cost, self.parallelism
            )));
        }
        self.to_argon2().map(|_| ())
    }

    fn to_argon2(&self) -> Result<Params> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::InvalidArgument(format!("Invalid KDF parameters: {}", e)))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::moderate()
    }
}

/// Derive a master key from a password and salt using Argon2id.
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if Argon2id parameters are invalid
///
/// # Security
/// - Password is not stored or logged
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::InvalidArgument("Password cannot be empty".to_string()));
    }

    params.validate()?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    let key = MasterKey::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}

/// Value persisted with the vault that proves knowledge of the master key.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationTag([u8; KEY_LENGTH]);

impl VerificationTag {
    /// Raw tag bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for VerificationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerificationTag(..)")
    }
}

impl Serialize for VerificationTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        b64::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for VerificationTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = b64::deserialize(deserializer)?;
        let array: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("verification tag has wrong length"))?;
        Ok(Self(array))
    }
}

/// Compute the verification tag for a master key.
///
/// The tag is a keyed BLAKE2b-256 MAC over a fixed domain string, so it
/// reveals nothing about the key itself.
pub fn verification_tag(key: &MasterKey) -> Result<VerificationTag> {
    let mut mac = <Blake2bMac<U32> as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Crypto(format!("Invalid MAC key: {}", e)))?;
    mac.update(VERIFICATION_DOMAIN);

    let mut tag = [0u8; KEY_LENGTH];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(VerificationTag(tag))
}

/// Check a candidate key against a stored tag in constant time.
pub fn verify_tag(candidate: &MasterKey, expected: &VerificationTag) -> Result<bool> {
    let computed = verification_tag(candidate)?;
    Ok(computed.0.ct_eq(&expected.0).into())
}
