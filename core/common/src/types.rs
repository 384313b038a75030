//! Common types used throughout Coffer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultId(String);

impl VaultId {
    /// Create a new VaultId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidArgument(
                "VaultId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of one open vault session.
///
/// Values are handed out once per process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VaultHandle(u64);

impl VaultHandle {
    /// Wrap a raw handle value received from a caller.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value for transport across the C boundary.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VaultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A normalized path within a vault, independent of underlying storage.
///
/// Components are separated by `/`, compared case-sensitively, and never
/// contain `.` or `..` segments. The root is the empty component list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VaultPath {
    components: Vec<String>,
}

impl VaultPath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - `InvalidPath` if any component is empty, `.`, `..`, or contains
    ///   a separator or NUL byte
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into a VaultPath.
    ///
    /// A leading `/` is optional and a single trailing `/` is ignored, so
    /// `"docs/a.txt"`, `"/docs/a.txt"` and `"/docs/a.txt/"` are the same path.
    pub fn parse(path: &str) -> crate::Result<Self> {
        if path.is_empty() {
            return Err(crate::Error::InvalidPath("Path cannot be empty".to_string()));
        }
        if path == "/" {
            return Ok(Self::root());
        }

        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidPath(format!("Malformed path: {:?}", path)));
        }

        let components: Vec<String> = trimmed.split('/').map(String::from).collect();
        Self::from_components(components)
            .map_err(|e| crate::Error::InvalidPath(format!("{:?}: {}", path, e)))
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// All proper ancestors from the top level down, excluding the root.
    ///
    /// For `/a/b/c` this yields `/a`, `/a/b`.
    pub fn ancestors(&self) -> impl Iterator<Item = VaultPath> + '_ {
        let depth = self.components.len().saturating_sub(1);
        (1..=depth).map(move |n| Self {
            components: self.components[..n].to_vec(),
        })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

fn validate_component(comp: &str) -> crate::Result<()> {
    if comp.is_empty() {
        return Err(crate::Error::InvalidPath(
            "Path component cannot be empty".to_string(),
        ));
    }
    if comp == "." || comp == ".." {
        return Err(crate::Error::InvalidPath(format!(
            "Relative segment '{}' is not allowed",
            comp
        )));
    }
    if comp.contains('/') || comp.contains('\\') || comp.contains('\0') {
        return Err(crate::Error::InvalidPath(
            "Path component cannot contain separators or NUL".to_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}
