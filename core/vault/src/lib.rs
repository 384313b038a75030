//! Vault engine for Coffer.
//!
//! This module provides:
//! - Vault creation, opening, and handle-based session management
//! - Encrypted file and directory operations with atomic commits
//! - Password rotation by re-wrapping per-file data keys
//! - Full verification of persisted state
//!
//! # Architecture
//! The vault module sits between the caller-facing surfaces (C boundary,
//! CLI) and storage providers, handling all encryption/decryption
//! transparently. The manifest at the vault root is the single commit
//! point for every mutation.

pub mod config;
pub mod manager;
pub mod operations;
pub mod session;
pub mod tree;

pub use config::{EngineConfig, KeyMaterial, Manifest, VaultVersion};
pub use manager::VaultManager;
pub use operations::{listing_to_json, DirEntry, EntryMetadata, VaultOperations};
pub use session::{VaultInfo, VaultSession, VerifyReport};
pub use tree::{FileEntry, NodeType, TreeNode, VaultTree};
