//! Chunked content encryption for file bodies.
//!
//! File content is split into fixed-size chunks, each sealed independently
//! with XChaCha20-Poly1305 under the file's data key. Every chunk
//! authenticates the blob header, its own index, and whether it is the
//! final chunk, so reordering, truncation, and splicing between blobs are
//! all detected.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::aead::{decrypt_with_aad, encrypt_with_aad, NONCE_SIZE, TAG_SIZE};
use crate::keys::{b64, DataKey};
use coffer_common::{Error, Result};

/// Default chunk size for content encryption (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Header size: version (1) + chunk_size (4) + total_chunks (8) + plaintext_len (8).
pub const HEADER_SIZE: usize = 21;

/// Content format version.
pub const STREAM_VERSION: u8 = 1;

const CHUNK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

struct Header {
    chunk_size: u32,
    total_chunks: u64,
    plaintext_len: u64,
}

impl Header {
    fn for_plaintext(len: usize, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_size > u32::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "Invalid chunk size: {}",
                chunk_size
            )));
        }
        // An empty body still carries one (empty) authenticated chunk.
        let total_chunks = len.div_ceil(chunk_size).max(1);
        Ok(Self {
            chunk_size: chunk_size as u32,
            total_chunks: total_chunks as u64,
            plaintext_len: len as u64,
        })
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = STREAM_VERSION;
        out[1..5].copy_from_slice(&self.chunk_size.to_le_bytes());
        out[5..13].copy_from_slice(&self.total_chunks.to_le_bytes());
        out[13..21].copy_from_slice(&self.plaintext_len.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Crypto("Content header truncated".to_string()));
        }
        if bytes[0] != STREAM_VERSION {
            return Err(Error::Crypto(format!(
                "Unsupported content version: {}",
                bytes[0]
            )));
        }

        let mut chunk_size = [0u8; 4];
        chunk_size.copy_from_slice(&bytes[1..5]);
        let mut total_chunks = [0u8; 8];
        total_chunks.copy_from_slice(&bytes[5..13]);
        let mut plaintext_len = [0u8; 8];
        plaintext_len.copy_from_slice(&bytes[13..21]);

        let header = Self {
            chunk_size: u32::from_le_bytes(chunk_size),
            total_chunks: u64::from_le_bytes(total_chunks),
            plaintext_len: u64::from_le_bytes(plaintext_len),
        };
        header.validate(bytes.len())?;
        Ok(header)
    }

    /// Check the header is self-consistent and matches the blob length.
    fn validate(&self, blob_len: usize) -> Result<()> {
        let malformed = || Error::Crypto("Malformed content header".to_string());

        if self.chunk_size == 0 {
            return Err(malformed());
        }
        let chunk_size = u64::from(self.chunk_size);
        let expected_chunks = self.plaintext_len.div_ceil(chunk_size).max(1);
        if expected_chunks != self.total_chunks {
            return Err(malformed());
        }

        let overhead = self
            .total_chunks
            .checked_mul(CHUNK_OVERHEAD as u64)
            .ok_or_else(malformed)?;
        let expected_len = self
            .plaintext_len
            .checked_add(overhead)
            .and_then(|n| n.checked_add(HEADER_SIZE as u64))
            .ok_or_else(malformed)?;
        if expected_len != blob_len as u64 {
            return Err(Error::Crypto(format!(
                "Content length mismatch: expected {} bytes, found {}",
                expected_len, blob_len
            )));
        }
        Ok(())
    }
}

fn chunk_aad(header: &[u8; HEADER_SIZE], index: u64, last: bool) -> [u8; HEADER_SIZE + 9] {
    let mut aad = [0u8; HEADER_SIZE + 9];
    aad[..HEADER_SIZE].copy_from_slice(header);
    aad[HEADER_SIZE..HEADER_SIZE + 8].copy_from_slice(&index.to_le_bytes());
    aad[HEADER_SIZE + 8] = u8::from(last);
    aad
}

/// Encrypt a file body under its data key.
///
/// # Format
/// - Header: version (1) + chunk_size (4) + total_chunks (8) + plaintext_len (8)
/// - Chunks: [nonce + ciphertext + tag] for each chunk
pub fn encrypt_content(key: &DataKey, plaintext: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let header = Header::for_plaintext(plaintext.len(), chunk_size)?;
    let encoded = header.encode();

    let capacity = HEADER_SIZE + plaintext.len() + header.total_chunks as usize * CHUNK_OVERHEAD;
    let mut output = Vec::with_capacity(capacity);
    output.extend_from_slice(&encoded);

    let last_index = header.total_chunks - 1;
    if plaintext.is_empty() {
        output.extend(encrypt_with_aad(
            key.as_bytes(),
            &[],
            &chunk_aad(&encoded, 0, true),
        )?);
    } else {
        for (i, chunk) in plaintext.chunks(chunk_size).enumerate() {
            let index = i as u64;
            let aad = chunk_aad(&encoded, index, index == last_index);
            output.extend(encrypt_with_aad(key.as_bytes(), chunk, &aad)?);
        }
    }

    Ok(output)
}

/// Decrypt and authenticate a file body.
///
/// # Errors
/// - `Crypto` for any malformed header, length mismatch, or chunk that
///   fails authentication; no partial plaintext is returned
pub fn decrypt_content(key: &DataKey, blob: &[u8]) -> Result<Vec<u8>> {
    let header = Header::decode(blob)?;
    let encoded = header.encode();
    let chunk_size = header.chunk_size as usize;

    let mut output = Vec::with_capacity(header.plaintext_len as usize);
    let mut offset = HEADER_SIZE;
    let mut remaining = header.plaintext_len as usize;

    for index in 0..header.total_chunks {
        let last = index + 1 == header.total_chunks;
        let plain_len = if last { remaining } else { chunk_size };
        let end = offset + plain_len + CHUNK_OVERHEAD;

        let aad = chunk_aad(&encoded, index, last);
        let plain = decrypt_with_aad(key.as_bytes(), &blob[offset..end], &aad)
            .map_err(|_| Error::Crypto(format!("Chunk {} failed authentication", index)))?;
        output.extend_from_slice(&plain);

        remaining -= plain_len;
        offset = end;
    }

    Ok(output)
}

/// BLAKE2b-256 digest of a stored content blob.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Constant-time comparison.
    pub fn matches(&self, other: &ContentDigest) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest(")?;
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        b64::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = b64::deserialize(deserializer)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("content digest has wrong length"))?;
        Ok(Self(array))
    }
}

/// Compute the integrity digest of a stored blob.
pub fn content_digest(blob: &[u8]) -> ContentDigest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(blob);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    ContentDigest(out)
}
