//! Common error types for Coffer.

use std::fmt;
use thiserror::Error;

/// Top-level error type for Coffer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Path is malformed, or names the wrong kind of node.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Caller supplied an unusable argument (empty password, bad encoding).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Password did not match the vault's key material.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Persisted structures failed an integrity or structural check.
    #[error("Corrupt vault: {0}")]
    CorruptVault(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage provider failure that did not originate as an `io::Error`.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Handle is unknown, stale, or already closed.
    #[error("Invalid handle: {0}")]
    InvalidHandle(u64),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Directory still has children.
    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// Vault storage is held by another session.
    #[error("Busy: {0}")]
    Busy(String),

    /// Allocation failed.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
}

impl Error {
    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPath(_) => ErrorKind::InvalidPath,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            Error::CorruptVault(_) | Error::Crypto(_) | Error::Serialization(_) => {
                ErrorKind::CorruptVault
            }
            Error::Io(_) | Error::Storage(_) => ErrorKind::IoError,
            Error::InvalidHandle(_) => ErrorKind::InvalidHandle,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::NotEmpty(_) => ErrorKind::NotEmpty,
            Error::Busy(_) => ErrorKind::Busy,
            Error::OutOfMemory(_) => ErrorKind::OutOfMemory,
        }
    }

    /// Re-tag any integrity failure as `CorruptVault` with context.
    ///
    /// Used where a crypto failure can only mean damaged persisted data.
    pub fn into_corrupt(self, context: &str) -> Self {
        match self {
            Error::Crypto(msg) | Error::Serialization(msg) => {
                Error::CorruptVault(format!("{}: {}", context, msg))
            }
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Failure classes visible to callers of the engine.
///
/// The numeric codes are stable and used at the C boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    InvalidPath = 1,
    AuthenticationFailed = 2,
    CorruptVault = 3,
    IoError = 4,
    InvalidHandle = 5,
    AlreadyExists = 6,
    NotFound = 7,
    NotEmpty = 8,
    Busy = 9,
    OutOfMemory = 10,
    InvalidArgument = 11,
}

impl ErrorKind {
    /// Stable integer code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Name of the kind as it appears in messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidPath => "InvalidPath",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",
            ErrorKind::CorruptVault => "CorruptVault",
            ErrorKind::IoError => "IOError",
            ErrorKind::InvalidHandle => "InvalidHandle",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::NotEmpty => "NotEmpty",
            ErrorKind::Busy => "Busy",
            ErrorKind::OutOfMemory => "OutOfMemory",
            ErrorKind::InvalidArgument => "InvalidArgument",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_io_kind() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.kind(), ErrorKind::IoError);
    }

    #[test]
    fn test_crypto_errors_are_corruption() {
        assert_eq!(Error::Crypto("tag".into()).kind(), ErrorKind::CorruptVault);
        assert_eq!(
            Error::Serialization("json".into()).kind(),
            ErrorKind::CorruptVault
        );
    }

    #[test]
    fn test_into_corrupt_keeps_other_kinds() {
        let err = Error::NotFound("x".into()).into_corrupt("blob");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::Crypto("bad tag".into()).into_corrupt("blob");
        assert!(matches!(err, Error::CorruptVault(ref m) if m.starts_with("blob")));
    }

    #[test]
    fn test_kind_codes_are_distinct() {
        let kinds = [
            ErrorKind::InvalidPath,
            ErrorKind::AuthenticationFailed,
            ErrorKind::CorruptVault,
            ErrorKind::IoError,
            ErrorKind::InvalidHandle,
            ErrorKind::AlreadyExists,
            ErrorKind::NotFound,
            ErrorKind::NotEmpty,
            ErrorKind::Busy,
            ErrorKind::OutOfMemory,
            ErrorKind::InvalidArgument,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(codes.iter().all(|c| *c > 0));
    }
}
