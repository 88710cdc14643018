//! Byte-stream access to documents
//!
//! [`DocumentReader`] resolves a document's chain once and then reads its
//! blocks on demand. [`DocumentWriter`] collects bytes (optionally under a
//! size ceiling) and stores them when closed.

use crate::allocator::{chain_indices, BlockRead, END_OF_CHAIN};
use crate::error::{CfbError, Result};
use crate::filesystem::Filesystem;
use crate::header::MINI_STREAM_CUTOFF;
use crate::property::PropertyId;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::warn;

/// Reads a document's bytes
pub struct DocumentReader<'fs> {
    fs: &'fs Filesystem,
    name: String,
    blocks: Vec<u32>,
    mini: bool,
    block_size: usize,
    size: u64,
    position: u64,
    mark: u64,
    cached: Option<(usize, Vec<u8>)>,
}

impl<'fs> DocumentReader<'fs> {
    pub(crate) fn open(fs: &'fs Filesystem, id: PropertyId) -> Result<Self> {
        let prop = fs.properties().property(id)?;
        if !prop.is_document() {
            return Err(CfbError::NotADocument(prop.name.clone()));
        }

        let mini = prop.size < MINI_STREAM_CUTOFF as u64;
        let view = fs.mini_view();
        let block_size = if mini {
            view.block_size()
        } else {
            fs.main().block_size()
        };
        let blocks = match (prop.start_block, mini) {
            (END_OF_CHAIN, _) => Vec::new(),
            (start, true) => chain_indices(&view, start)?,
            (start, false) => chain_indices(fs.main(), start)?,
        };

        let expected = (prop.size as usize).div_ceil(block_size);
        if blocks.len() < expected {
            return Err(CfbError::ShortChain {
                name: prop.name.clone(),
                expected,
                actual: blocks.len(),
            });
        }

        Ok(DocumentReader {
            fs,
            name: prop.name.clone(),
            blocks,
            mini,
            block_size,
            size: prop.size,
            position: 0,
            mark: 0,
            cached: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Document length in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left before the end of the document
    pub fn available(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }

    /// Remember the current position for [`DocumentReader::reset`]
    pub fn mark(&mut self) {
        self.mark = self.position;
    }

    /// Return to the last marked position (the start if never marked)
    pub fn reset(&mut self) {
        self.position = self.mark;
    }

    /// Read exactly `buf.len()` bytes at `offset` without moving the cursor
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let saved = self.position;
        self.position = offset;
        let result = self.read_exact(buf);
        self.position = saved;
        result
    }

    /// Read everything from the current position on
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.available() as usize);
        self.read_to_end(&mut data)?;
        Ok(data)
    }

    fn block(&mut self, ordinal: usize) -> Result<&[u8]> {
        let hit = matches!(&self.cached, Some((cached, _)) if *cached == ordinal);
        if !hit {
            let index = self.blocks[ordinal];
            let bytes = if self.mini {
                self.fs.mini_view().read_block(index)?
            } else {
                self.fs.main().read_block(index)?
            };
            self.cached = Some((ordinal, bytes));
        }

        Ok(self.cached.as_ref().map_or(&[][..], |(_, bytes)| bytes.as_slice()))
    }
}

impl Read for DocumentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.size {
            return Ok(0);
        }

        let ordinal = (self.position / self.block_size as u64) as usize;
        let offset = (self.position % self.block_size as u64) as usize;
        let remaining = self.available();

        let block = self.block(ordinal)?;
        let count = buf
            .len()
            .min(block.len().saturating_sub(offset))
            .min(remaining as usize);
        buf[..count].copy_from_slice(&block[offset..offset + count]);

        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for DocumentReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.size) + i128::from(delta),
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot seek before the start of a document",
            ));
        }

        self.position = target as u64;
        Ok(self.position)
    }
}

/// Writes a document's bytes, storing them on close
///
/// With a limit, a write that would push the total past it is rejected with
/// [`CfbError::CapacityExceeded`]; what was accepted before stays.
pub struct DocumentWriter<'fs> {
    fs: &'fs mut Filesystem,
    id: PropertyId,
    limit: Option<u64>,
    buffer: Vec<u8>,
    closed: bool,
}

impl<'fs> DocumentWriter<'fs> {
    pub(crate) fn new(fs: &'fs mut Filesystem, id: PropertyId, limit: Option<u64>) -> Self {
        DocumentWriter {
            fs,
            id,
            limit,
            buffer: Vec::new(),
            closed: false,
        }
    }

    /// Bytes accepted so far
    pub fn written(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(CfbError::StreamClosed);
        }

        let attempted = self.written() + data.len() as u64;
        if let Some(limit) = self.limit {
            if attempted > limit {
                return Err(CfbError::CapacityExceeded { limit, attempted });
            }
        }

        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Pad with `fill` until `total` bytes have been written
    pub fn write_filler(&mut self, total: u64, fill: u8) -> Result<()> {
        let missing = total.saturating_sub(self.written()) as usize;
        if missing > 0 {
            self.write_bytes(&vec![fill; missing])?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.fs.store_document(self.id, &self.buffer)
    }

    /// Finish without storing anything buffered since the last flush
    pub(crate) fn abandon(mut self) {
        self.closed = true;
    }

    /// Store the accepted bytes and finish
    pub fn close(mut self) -> Result<()> {
        if self.closed {
            return Err(CfbError::StreamClosed);
        }
        self.closed = true;
        self.commit()
    }
}

impl Write for DocumentWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(CfbError::StreamClosed.into());
        }
        Ok(self.commit()?)
    }
}

impl Drop for DocumentWriter<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.commit() {
            warn!("Document writer dropped without close; commit failed: {}", e);
        }
    }
}
