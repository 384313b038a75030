//! Storage provider abstraction for Coffer.
//!
//! A vault is a small set of named objects (the manifest and one blob per
//! file) kept in a durable store. The vault engine talks to storage only
//! through [`StorageProvider`], so the commit protocol can be exercised
//! against the local filesystem or an in-memory store alike.
//!
//! # Design Principles
//! - Provider isolation: no vault or crypto logic in providers
//! - Async operations: all I/O operations are async
//! - Atomic replace: `upload` either installs the complete object or leaves
//!   the previous one untouched

pub mod local;
pub mod lock;
pub mod memory;
pub mod provider;

pub use local::{LocalProvider, TEMP_PREFIX};
pub use lock::VaultLock;
pub use memory::MemoryProvider;
pub use provider::{Metadata, StorageProvider};
