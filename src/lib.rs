//! # cfbf-rs - Compound File Binary Format
//!
//! `cfbf-rs` reads and writes Compound File Binary Format containers (also
//! known as OLE2 structured storage), the format behind legacy `.doc`, `.xls`,
//! `.ppt` and `.msg` files. A container is a small filesystem inside one file:
//!
//! - **Storages** (directories) and **streams** (documents) in a named tree
//! - A block allocation table, extended as the file grows
//! - A mini store that packs documents under 4096 bytes into 64-byte blocks
//! - Loop detection on every chain walk, so corrupt files fail instead of hanging
//!
//! ## Quick Start
//!
//! ```rust
//! use cfbf_rs::{CompoundFile, Result};
//!
//! # fn main() -> Result<()> {
//! let mut file = CompoundFile::create()?;
//!
//! // Write documents (parent storages are created on demand)
//! file.write("ObjectPool/_1/Contents", b"Hello, World!")?;
//!
//! // Read them back
//! assert_eq!(file.read("ObjectPool/_1/Contents")?, b"Hello, World!");
//!
//! // List a storage
//! assert_eq!(file.list("ObjectPool")?, ["_1"]);
//!
//! // Serialize the container
//! let bytes = file.into_bytes()?;
//! assert_eq!(&bytes[..4], &[0xD0, 0xCF, 0x11, 0xE0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Tree API
//!
//! ```rust
//! use cfbf_rs::{Filesystem, Options, Result};
//! use std::io::Read;
//!
//! # fn main() -> Result<()> {
//! let mut fs = Filesystem::create(Options::default())?;
//! let mut root = fs.root();
//! root.create_document("WordDocument", &[0u8; 8192])?;
//! root.create_directory("ObjectPool")?;
//!
//! let mut reader = fs.open_path("WordDocument")?;
//! let mut header = [0u8; 32];
//! reader.read_exact(&mut header)?;
//! # Ok(())
//! # }
//! ```

// Core implementation
pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use core::{
    allocator, config, directory, document, error, filesystem, header, io, property, stream,
    validation,
};

// Re-export core types that users need
pub use crate::core::{
    config::Options,
    directory::{Directory, Document, EntryInfo},
    document::{DocumentReader, DocumentWriter},
    error::{CfbError, Result},
    filesystem::{Filesystem, FilesystemStats, SharedFilesystem},
    header::{BlockSize, MINI_BLOCK_SIZE, MINI_STREAM_CUTOFF},
    property::{PropertyKind, MAX_NAME_LEN},
    validation::EntryName,
};

use crate::core::property::ROOT_ID;
use crate::core::validation::split_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Metadata about a storage or stream, addressed by path
///
/// # Examples
///
/// ```rust
/// use cfbf_rs::CompoundFile;
///
/// # fn main() -> cfbf_rs::Result<()> {
/// let mut file = CompoundFile::create()?;
/// file.write("Macros/VBA/dir", b"...")?;
///
/// for entry in file.list_entries("/")? {
///     if entry.is_dir {
///         println!("[dir]  {}", entry.path);
///     } else {
///         println!("[file] {} ({} bytes)", entry.path, entry.size.unwrap_or(0));
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    /// Full path from the root (e.g., "ObjectPool/_1/Contents")
    pub path: String,

    /// Just the name (e.g., "Contents")
    pub name: String,

    /// Parent storage path; empty for entries directly under the root
    pub parent: String,

    /// True for storages
    pub is_dir: bool,

    /// Stream size in bytes (None for storages)
    pub size: Option<u64>,

    /// Creation timestamp as Unix epoch seconds
    pub created: Option<i64>,

    /// Last modification timestamp as Unix epoch seconds
    pub modified: Option<i64>,

    /// Storage class id, hex encoded (None when all zero)
    pub clsid: Option<String>,

    /// Entry kind
    pub kind: PropertyKind,
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn hex_clsid(clsid: &[u8; 16]) -> Option<String> {
    if clsid.iter().all(|&b| b == 0) {
        return None;
    }
    Some(clsid.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Path-based compound file API
///
/// A thin wrapper around [`Filesystem`] that addresses entries by
/// `/`-separated paths from the root.
///
/// # Examples
///
/// ```rust
/// use cfbf_rs::{CompoundFile, Result};
///
/// # fn main() -> Result<()> {
/// let mut file = CompoundFile::create()?;
/// file.write("\u{5}SummaryInformation", &[0xFE, 0xFF])?;
/// assert!(file.exists("\u{5}SummaryInformation")?);
/// # Ok(())
/// # }
/// ```
pub struct CompoundFile {
    inner: Filesystem,
}

impl CompoundFile {
    /// New in-memory container with default options
    pub fn create() -> Result<Self> {
        CompoundFileBuilder::new().build()
    }

    /// New container file at `path` (truncates an existing file)
    pub fn create_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        CompoundFileBuilder::new().path(path.as_ref()).build()
    }

    /// Open an existing container file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening compound file at {:?}", path.as_ref());
        let inner = Filesystem::open(path)?;
        Ok(CompoundFile { inner })
    }

    /// Open an existing container file without write access
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = Filesystem::open_read_only(path)?;
        Ok(CompoundFile { inner })
    }

    /// Open a container held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let inner = Filesystem::from_bytes(bytes)?;
        Ok(CompoundFile { inner })
    }

    /// Make sure every storage along `names` exists, returning its path
    fn ensure_storages(&mut self, names: &[EntryName], create: bool) -> Result<String> {
        let mut current = String::new();
        for name in names {
            let next = join(&current, name.as_str());
            match self.inner.resolve(&next) {
                Ok(_) => {}
                Err(CfbError::NotFound(_)) if create => {
                    self.inner
                        .directory(&current)?
                        .create_directory(name.as_str())?;
                    debug!("Created storage {}", next);
                }
                Err(e) => return Err(e),
            }
            current = next;
        }
        Ok(current)
    }

    /// Split a path into its parent storage path and leaf name
    fn split_leaf(path: &str) -> Result<(Vec<EntryName>, EntryName)> {
        let mut names = split_path(path)?;
        let leaf = names
            .pop()
            .ok_or_else(|| CfbError::InvalidName(format!("'{}' names the root", path)))?;
        Ok((names, leaf))
    }

    /// Write a stream, creating or replacing it
    ///
    /// Missing parent storages are created when the options allow it.
    pub fn write<P: AsRef<str>>(&mut self, path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        debug!("Writing {} bytes to {}", content.len(), path);

        let (parents, leaf) = Self::split_leaf(path)?;
        let create = self.inner.options().create_missing_parents;
        let parent = self.ensure_storages(&parents, create)?;

        self.inner
            .directory(&parent)?
            .create_or_update_document(leaf.as_str(), content)?;
        Ok(())
    }

    /// Read a whole stream
    pub fn read<P: AsRef<str>>(&self, path: P) -> Result<Vec<u8>> {
        let path = path.as_ref();
        debug!("Reading {}", path);
        self.inner.open_path(path)?.read_to_vec()
    }

    /// Delete a stream or an empty storage
    ///
    /// Returns `false` for a storage that still has entries.
    pub fn delete<P: AsRef<str>>(&mut self, path: P) -> Result<bool> {
        let path = path.as_ref();
        debug!("Deleting {}", path);

        let (parents, leaf) = Self::split_leaf(path)?;
        let parent = self.ensure_storages(&parents, false)?;
        self.inner.directory(&parent)?.delete(leaf.as_str())
    }

    /// Rename an entry in place; `false` if a sibling already uses `new_name`
    pub fn rename<P: AsRef<str>>(&mut self, path: P, new_name: &str) -> Result<bool> {
        let path = path.as_ref();
        let (parents, leaf) = Self::split_leaf(path)?;
        let parent = self.ensure_storages(&parents, false)?;

        if !self.inner.directory(&parent)?.has_entry(leaf.as_str())? {
            return Err(CfbError::NotFound(path.to_string()));
        }
        self.inner
            .directory(&parent)?
            .rename(leaf.as_str(), new_name)
    }

    /// Create a storage (and, when allowed, its parents)
    pub fn create_dir<P: AsRef<str>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let (parents, leaf) = Self::split_leaf(path)?;
        let create = self.inner.options().create_missing_parents;
        let parent = self.ensure_storages(&parents, create)?;

        let mut dir = self.inner.directory(&parent)?;
        match dir.entry(leaf.as_str()) {
            Ok(info) if info.is_directory() => Ok(()),
            Ok(_) => Err(CfbError::DuplicateName(path.to_string())),
            Err(CfbError::NotFound(_)) => dir.create_directory(leaf.as_str()).map(|_| ()),
            Err(e) => Err(e),
        }
    }

    pub fn exists<P: AsRef<str>>(&self, path: P) -> Result<bool> {
        match self.inner.resolve(path.as_ref()) {
            Ok(_) => Ok(true),
            Err(CfbError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Metadata for one entry
    pub fn metadata<P: AsRef<str>>(&self, path: P) -> Result<EntryInfo> {
        let id = self.inner.resolve(path.as_ref())?;
        Ok(EntryInfo::from_property(
            self.inner.properties().property(id)?,
        ))
    }

    /// Names of the entries in a storage, in sibling order
    pub fn list<P: AsRef<str>>(&self, path: P) -> Result<Vec<String>> {
        let path = path.as_ref();
        debug!("Listing storage {}", path);

        let table = self.inner.properties();
        let id = self.inner.resolve(path)?;
        if !table.property(id)?.is_container() {
            return Err(CfbError::NotADirectory(path.to_string()));
        }
        table
            .children(id)?
            .iter()
            .map(|&c| Ok(table.property(c)?.name.clone()))
            .collect()
    }

    /// Every entry below a storage, storages first, then by path
    pub fn list_entries<P: AsRef<str>>(&self, path: P) -> Result<Vec<Entry>> {
        let path = path.as_ref();
        let table = self.inner.properties();
        let start = self.inner.resolve(path)?;
        if !table.property(start)?.is_container() {
            return Err(CfbError::NotADirectory(path.to_string()));
        }

        let prefix = split_path(path)?
            .iter()
            .map(|n| n.as_str())
            .collect::<Vec<_>>()
            .join("/");

        let mut entries = Vec::new();
        let mut stack = vec![(start, prefix)];
        while let Some((id, parent)) = stack.pop() {
            for &child in table.children(id)? {
                let prop = table.property(child)?;
                let info = EntryInfo::from_property(prop);
                let child_path = join(&parent, &prop.name);

                if prop.is_container() {
                    stack.push((child, child_path.clone()));
                }

                entries.push(Entry {
                    path: child_path,
                    name: info.name,
                    parent: parent.clone(),
                    is_dir: info.kind != PropertyKind::Document,
                    size: (info.kind == PropertyKind::Document).then_some(info.size),
                    created: info.created,
                    modified: info.modified,
                    clsid: hex_clsid(&info.clsid),
                    kind: info.kind,
                });
            }
        }

        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.path.cmp(&b.path),
        });

        Ok(entries)
    }

    /// The root storage, for tree-style access
    pub fn root(&mut self) -> Directory<'_> {
        self.inner.root()
    }

    pub fn stats(&self) -> FilesystemStats {
        self.inner.stats()
    }

    /// Check every chain for loops and cross-links
    pub fn verify(&self) -> Result<()> {
        self.inner.verify()
    }

    /// Write pending changes to the medium
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    pub fn close(self) -> Result<()> {
        self.inner.close()
    }

    /// Flush and return the container bytes
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        self.inner.into_bytes()
    }

    pub fn inner(&self) -> &Filesystem {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Filesystem {
        &mut self.inner
    }

    pub fn into_inner(self) -> Filesystem {
        self.inner
    }

    /// True if the root is the only entry
    pub fn is_empty(&self) -> bool {
        self.inner
            .properties()
            .children(ROOT_ID)
            .map_or(true, |c| c.is_empty())
    }
}

/// Builder for [`CompoundFile`] with custom options
///
/// ```rust
/// use cfbf_rs::{CompoundFileBuilder, Result};
///
/// # fn main() -> Result<()> {
/// let file = CompoundFileBuilder::new()
///     .block_size(4096)
///     .create_missing_parents(false)
///     .build()?;
/// assert_eq!(file.stats().block_size, 4096);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompoundFileBuilder {
    path: Option<PathBuf>,
    options: Options,
}

impl CompoundFileBuilder {
    pub fn new() -> Self {
        CompoundFileBuilder::default()
    }

    /// Write the container to a file instead of memory
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Main block size (512 or 4096)
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.options.block_size = block_size;
        self
    }

    pub fn verify_chains_on_open(mut self, verify: bool) -> Self {
        self.options.verify_chains_on_open = verify;
        self
    }

    pub fn create_missing_parents(mut self, create: bool) -> Self {
        self.options.create_missing_parents = create;
        self
    }

    /// Replace all options at once
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<CompoundFile> {
        self.options.validate()?;

        let inner = match self.path {
            Some(path) => {
                info!(
                    "Creating compound file at {:?} ({} byte blocks)",
                    path, self.options.block_size
                );
                Filesystem::create_file(path, self.options)?
            }
            None => {
                debug!(
                    "Creating in-memory compound file ({} byte blocks)",
                    self.options.block_size
                );
                Filesystem::create(self.options)?
            }
        };

        Ok(CompoundFile { inner })
    }
}
