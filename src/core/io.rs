//! Backing medium for compound files
//!
//! A container lives either in a growable in-memory buffer or in a file on
//! disk. Both are addressed by absolute byte offset; reads past the end return
//! short counts and writes past the end extend the medium.

use crate::error::{CfbError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Byte-addressable storage under a compound file
#[derive(Debug)]
pub enum Medium {
    /// In-memory buffer
    Memory(Vec<u8>),

    /// Disk-backed file
    File {
        file: File,
        path: PathBuf,
        len: u64,
        read_only: bool,
    },
}

impl Medium {
    /// Empty in-memory medium
    pub fn memory() -> Self {
        Medium::Memory(Vec::new())
    }

    /// Create (or truncate) a file medium
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(Medium::File {
            file,
            path: path.as_ref().to_path_buf(),
            len: 0,
            read_only: false,
        })
    }

    /// Open an existing file medium
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)?;
        let len = file.metadata()?.len();

        Ok(Medium::File {
            file,
            path: path.as_ref().to_path_buf(),
            len,
            read_only,
        })
    }

    /// Current length in bytes
    pub fn len(&self) -> u64 {
        match self {
            Medium::Memory(bytes) => bytes.len() as u64,
            Medium::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Medium::File { read_only: true, .. })
    }

    /// File path, if disk-backed
    pub fn path(&self) -> Option<&Path> {
        match self {
            Medium::Memory(_) => None,
            Medium::File { path, .. } => Some(path),
        }
    }

    /// Read into `buf` starting at `offset`
    ///
    /// Returns the number of bytes read, which is short (possibly zero) when
    /// the range runs past the end of the medium.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let available = self.len().saturating_sub(offset);
        let wanted = (buf.len() as u64).min(available) as usize;
        if wanted == 0 {
            return Ok(0);
        }

        match self {
            Medium::Memory(bytes) => {
                let start = offset as usize;
                buf[..wanted].copy_from_slice(&bytes[start..start + wanted]);
            }
            Medium::File { file, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buf[..wanted])?;
            }
        }

        Ok(wanted)
    }

    /// Write `data` at `offset`, extending the medium as needed
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        match self {
            Medium::Memory(bytes) => {
                let start = offset as usize;
                let end = start + data.len();
                if bytes.len() < end {
                    bytes.resize(end, 0);
                }
                bytes[start..end].copy_from_slice(data);
            }
            Medium::File {
                file,
                len,
                read_only,
                ..
            } => {
                if *read_only {
                    return Err(CfbError::ReadOnly);
                }
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(data)?;
                *len = (*len).max(offset + data.len() as u64);
            }
        }

        Ok(())
    }

    /// Grow the medium with zeros to at least `new_len` bytes
    pub fn extend_to(&mut self, new_len: u64) -> Result<()> {
        if new_len <= self.len() {
            return Ok(());
        }

        match self {
            Medium::Memory(bytes) => bytes.resize(new_len as usize, 0),
            Medium::File {
                file,
                len,
                read_only,
                ..
            } => {
                if *read_only {
                    return Err(CfbError::ReadOnly);
                }
                file.set_len(new_len)?;
                *len = new_len;
            }
        }

        Ok(())
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        if let Medium::File {
            file,
            read_only: false,
            ..
        } = self
        {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Take the full contents of the medium
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Medium::Memory(bytes) => Ok(bytes),
            Medium::File { mut file, len, .. } => {
                let mut bytes = Vec::with_capacity(len as usize);
                file.seek(SeekFrom::Start(0))?;
                file.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}
