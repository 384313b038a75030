//! Virtual filesystem tree representation.
//!
//! The vault tree maintains the logical structure of files and directories
//! independent of the underlying storage provider. It is persisted sealed
//! inside the manifest and carries the aggregates reported by `info`, kept
//! up to date on every insert and removal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use coffer_common::{Error, Result, VaultPath};
use coffer_crypto::{ContentDigest, WrappedKey};

/// Type of tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Directory,
}

/// An encrypted file stored in the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry identifier; bound into the wrapping of the data key.
    pub id: String,
    /// Name of the ciphertext blob in the data directory.
    pub blob: String,
    /// Data key wrapped under the master key.
    pub wrapped_key: WrappedKey,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Integrity digest of the stored blob.
    pub digest: ContentDigest,
}

/// Payload of a tree node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    File(FileEntry),
    Directory {
        children: BTreeMap<String, TreeNode>,
    },
}

/// A node in the vault tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    /// Cleartext name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    /// File or directory payload.
    pub kind: NodeKind,
}

impl TreeNode {
    /// Create a new file node.
    pub fn new_file(name: impl Into<String>, entry: FileEntry) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            modified_at: now,
            kind: NodeKind::File(entry),
        }
    }

    /// Create a new directory node.
    pub fn new_directory(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            modified_at: now,
            kind: NodeKind::Directory {
                children: BTreeMap::new(),
            },
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::File(_) => NodeType::File,
            NodeKind::Directory { .. } => NodeType::Directory,
        }
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.node_type() == NodeType::File
    }

    /// Check if this is a directory.
    pub fn is_directory(&self) -> bool {
        self.node_type() == NodeType::Directory
    }

    /// File payload, if this is a file.
    pub fn as_file(&self) -> Option<&FileEntry> {
        match &self.kind {
            NodeKind::File(entry) => Some(entry),
            NodeKind::Directory { .. } => None,
        }
    }

    /// Logical size: file length, or 0 for directories.
    pub fn size(&self) -> u64 {
        self.as_file().map_or(0, |f| f.size)
    }

    fn children(&self) -> Option<&BTreeMap<String, TreeNode>> {
        match &self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File(_) => None,
        }
    }

    fn children_mut(&mut self) -> Option<&mut BTreeMap<String, TreeNode>> {
        match &mut self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File(_) => None,
        }
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a FileEntry>) {
        match &self.kind {
            NodeKind::File(entry) => out.push(entry),
            NodeKind::Directory { children } => {
                for child in children.values() {
                    child.collect_files(out);
                }
            }
        }
    }

    fn collect_files_mut<'a>(&'a mut self, out: &mut Vec<&'a mut FileEntry>) {
        match &mut self.kind {
            NodeKind::File(entry) => out.push(entry),
            NodeKind::Directory { children } => {
                for child in children.values_mut() {
                    child.collect_files_mut(out);
                }
            }
        }
    }

    fn into_files(self, out: &mut Vec<FileEntry>) {
        match self.kind {
            NodeKind::File(entry) => out.push(entry),
            NodeKind::Directory { children } => {
                for child in children.into_values() {
                    child.into_files(out);
                }
            }
        }
    }
}

/// Virtual filesystem tree for the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultTree {
    /// Root node.
    root: TreeNode,
    /// Number of live files.
    file_count: u64,
    /// Sum of live file sizes.
    total_size: u64,
}

impl VaultTree {
    /// Create a new empty tree.
    pub fn new() -> Self {
        Self {
            root: TreeNode::new_directory("/"),
            file_count: 0,
            total_size: 0,
        }
    }

    /// Get the root node.
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Number of files, as maintained by mutations.
    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Total plaintext bytes, as maintained by mutations.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Navigate to a node by path.
    pub fn get_node(&self, path: &VaultPath) -> Result<&TreeNode> {
        let mut current = &self.root;
        for component in path.components() {
            current = current
                .children()
                .and_then(|c| c.get(component))
                .ok_or_else(|| Error::NotFound(format!("Path not found: {}", path)))?;
        }
        Ok(current)
    }

    /// Look up a file entry.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `path`
    /// - `InvalidPath` if `path` is a directory
    pub fn get_file(&self, path: &VaultPath) -> Result<&FileEntry> {
        self.get_node(path)?
            .as_file()
            .ok_or_else(|| Error::InvalidPath(format!("Is a directory: {}", path)))
    }

    /// Check if a path exists.
    pub fn exists(&self, path: &VaultPath) -> bool {
        self.get_node(path).is_ok()
    }

    /// Children of the directory holding `path`.
    ///
    /// # Errors
    /// - `InvalidPath` for the root, or if the parent is a file
    /// - `NotFound` if the parent does not exist
    fn parent_children_mut(&mut self, path: &VaultPath) -> Result<&mut BTreeMap<String, TreeNode>> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidPath("The root cannot be modified".to_string()))?;

        let mut current = &mut self.root;
        for component in parent.components() {
            current = current
                .children_mut()
                .and_then(|c| c.get_mut(component))
                .ok_or_else(|| Error::NotFound(format!("Parent not found: {}", parent)))?;
        }

        current
            .children_mut()
            .ok_or_else(|| Error::InvalidPath(format!("Parent is a file: {}", parent)))
    }

    /// Check that a file could be inserted at `path`.
    pub fn check_insert(&self, path: &VaultPath) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidPath("The root cannot be modified".to_string()))?;

        let node = self
            .get_node(&parent)
            .map_err(|_| Error::NotFound(format!("Parent not found: {}", parent)))?;
        if !node.is_directory() {
            return Err(Error::InvalidPath(format!("Parent is a file: {}", parent)));
        }
        if self.exists(path) {
            return Err(Error::AlreadyExists(format!("Path already exists: {}", path)));
        }
        Ok(())
    }

    /// Insert a new file.
    ///
    /// # Errors
    /// - `AlreadyExists` if anything exists at `path`
    /// - `NotFound`/`InvalidPath` if the parent is missing or a file
    pub fn insert_file(&mut self, path: &VaultPath, entry: FileEntry) -> Result<()> {
        self.check_insert(path)?;
        let name = path
            .name()
            .ok_or_else(|| Error::InvalidPath("The root cannot be modified".to_string()))?;

        let size = entry.size;
        let children = self.parent_children_mut(path)?;
        children.insert(name.to_string(), TreeNode::new_file(name, entry));

        self.file_count += 1;
        self.total_size += size;
        Ok(())
    }

    /// Swap the entry of an existing file, returning the previous one.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `path`
    /// - `InvalidPath` if `path` is a directory
    pub fn replace_file(&mut self, path: &VaultPath, entry: FileEntry) -> Result<FileEntry> {
        self.get_file(path)?;
        let name = path
            .name()
            .ok_or_else(|| Error::InvalidPath("The root is not a file".to_string()))?;

        let node = self
            .parent_children_mut(path)?
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("Path not found: {}", path)))?;
        let new_size = entry.size;
        let previous = match &mut node.kind {
            NodeKind::File(current) => std::mem::replace(current, entry),
            NodeKind::Directory { .. } => {
                return Err(Error::InvalidPath(format!("Is a directory: {}", path)))
            }
        };
        node.modified_at = Utc::now();

        self.total_size = self.total_size - previous.size + new_size;
        Ok(previous)
    }

    /// Create a directory and any missing parents.
    ///
    /// Returns the number of directories created.
    ///
    /// # Errors
    /// - `InvalidPath` for the root or if an ancestor is a file
    /// - `AlreadyExists` if anything exists at `path`
    pub fn create_dir_all(&mut self, path: &VaultPath) -> Result<usize> {
        if path.is_root() {
            return Err(Error::InvalidPath("The root cannot be created".to_string()));
        }
        if self.exists(path) {
            return Err(Error::AlreadyExists(format!("Path already exists: {}", path)));
        }

        let mut created = 0;
        let mut current = &mut self.root;
        for component in path.components() {
            let children = current.children_mut().ok_or_else(|| {
                Error::InvalidPath(format!("An ancestor of {} is a file", path))
            })?;
            current = children.entry(component.clone()).or_insert_with(|| {
                created += 1;
                TreeNode::new_directory(component.clone())
            });
        }
        Ok(created)
    }

    /// Remove a node, returning the file entries it held.
    ///
    /// # Errors
    /// - `InvalidPath` for the root
    /// - `NotFound` if nothing exists at `path`
    /// - `NotEmpty` for a non-empty directory unless `recursive`
    pub fn remove(&mut self, path: &VaultPath, recursive: bool) -> Result<Vec<FileEntry>> {
        let node = self.get_node(path)?;
        if path.is_root() {
            return Err(Error::InvalidPath("The root cannot be removed".to_string()));
        }
        if let Some(children) = node.children() {
            if !children.is_empty() && !recursive {
                return Err(Error::NotEmpty(format!("Directory not empty: {}", path)));
            }
        }

        let name = path
            .name()
            .ok_or_else(|| Error::InvalidPath("The root cannot be removed".to_string()))?;
        let removed = self
            .parent_children_mut(path)?
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("Path not found: {}", path)))?;

        let mut files = Vec::new();
        removed.into_files(&mut files);
        for file in &files {
            self.file_count -= 1;
            self.total_size -= file.size;
        }
        Ok(files)
    }

    /// List contents of a directory, ordered by name.
    pub fn list(&self, path: &VaultPath) -> Result<Vec<&TreeNode>> {
        self.get_node(path)?
            .children()
            .map(|c| c.values().collect())
            .ok_or_else(|| Error::InvalidPath(format!("Not a directory: {}", path)))
    }

    /// All file entries in the tree.
    pub fn files(&self) -> Vec<&FileEntry> {
        let mut out = Vec::new();
        self.root.collect_files(&mut out);
        out
    }

    /// All file entries, mutably.
    pub fn files_mut(&mut self) -> Vec<&mut FileEntry> {
        let mut out = Vec::new();
        self.root.collect_files_mut(&mut out);
        out
    }

    /// Recount files and sizes with a full walk.
    pub fn recompute(&self) -> (u64, u64) {
        self.files()
            .iter()
            .fold((0, 0), |(count, size), f| (count + 1, size + f.size))
    }

    /// Structural checks applied to a tree loaded from storage.
    ///
    /// # Errors
    /// - `CorruptVault` if the root is not a directory, a node's name
    ///   disagrees with its key, or the stored aggregates are wrong
    pub fn validate(&self) -> Result<()> {
        fn check(node: &TreeNode) -> Result<()> {
            if let Some(children) = node.children() {
                for (key, child) in children {
                    if key != &child.name || VaultPath::root().join(key).is_err() {
                        return Err(Error::CorruptVault(format!(
                            "Vault index has an invalid entry name: {:?}",
                            key
                        )));
                    }
                    check(child)?;
                }
            }
            Ok(())
        }

        if !self.root.is_directory() {
            return Err(Error::CorruptVault("Vault index root is a file".to_string()));
        }
        check(&self.root)?;

        if self.recompute() != (self.file_count, self.total_size) {
            return Err(Error::CorruptVault(
                "Vault index aggregates are inconsistent".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Default for VaultTree {
    fn default() -> Self {
        Self::new()
    }
}
