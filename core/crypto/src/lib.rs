//! Cryptographic primitives for Coffer.
//!
//! This module provides:
//! - Key derivation using Argon2id, with a keyed verification tag
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Envelope wrapping of per-file data keys under the master key
//! - Chunked content encryption for file bodies
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod stream;

pub use aead::{decrypt_with_aad, encrypt_with_aad};
pub use envelope::{unwrap_key, wrap_key, WrappedKey};
pub use kdf::{derive_key, verification_tag, verify_tag, KdfParams, VerificationTag};
pub use keys::{DataKey, MasterKey, Salt, KEY_LENGTH};
pub use stream::{content_digest, decrypt_content, encrypt_content, ContentDigest};
