//! Compound File Binary Format engine
//!
//! Layers, bottom up:
//! - `header`, `io`: fixed header codec and the byte medium
//! - `allocator`: main and mini block stores, allocation tables, loop detection
//! - `stream`: chains of blocks as byte streams
//! - `property`: the directory tree as stored in the property table
//! - `filesystem`, `directory`, `document`: the navigable container

pub mod allocator;
pub mod config;
pub mod directory;
pub mod document;
pub mod error;
pub mod filesystem;
pub mod header;
pub mod io;
pub mod property;
pub mod stream;
pub mod validation;

pub use directory::{Directory, Document, EntryInfo};
pub use document::{DocumentReader, DocumentWriter};
pub use filesystem::{Filesystem, FilesystemStats, SharedFilesystem};
