//! Compound file filesystem
//!
//! Owns the main store, the mini store bookkeeping and the property table, and
//! keeps them consistent across create, open, mutation and flush.

use crate::allocator::{
    chain_indices, BlockRead, ChainLoopDetector, MainStore, MiniState, MiniStore, MiniView,
    DIFAT_SECTOR_BLOCK, END_OF_CHAIN, FAT_SECTOR_BLOCK,
};
use crate::config::Options;
use crate::directory::Directory;
use crate::document::DocumentReader;
use crate::error::{CfbError, Result};
use crate::header::{BlockSize, MINI_STREAM_CUTOFF};
use crate::io::Medium;
use crate::property::{PropertyId, PropertyKind, PropertyTable, ROOT_ID};
use crate::stream::ChainStream;
use crate::validation::split_path;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Byte used to pad the last block of a document
pub const DOCUMENT_FILL: u8 = 0xFF;

/// One filesystem shared between threads behind a single lock
pub type SharedFilesystem = Arc<Mutex<Filesystem>>;

/// Allocation summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemStats {
    pub block_size: usize,
    pub main_blocks: usize,
    pub free_main_blocks: usize,
    pub bat_blocks: usize,
    pub xbat_blocks: usize,
    pub mini_blocks: usize,
    pub free_mini_blocks: usize,
    pub properties: usize,
    pub documents: usize,
}

pub struct Filesystem {
    main: MainStore,
    mini: MiniState,
    properties: PropertyTable,
    options: Options,
}

impl Filesystem {
    /// Empty in-memory container
    pub fn create(options: Options) -> Result<Self> {
        Self::create_on(Medium::memory(), options)
    }

    /// Empty container written to `path` (truncating any existing file)
    pub fn create_file<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let mut fs = Self::create_on(Medium::create(&path)?, options)?;
        fs.flush()?;
        info!("Created compound file at {}", path.as_ref().display());
        Ok(fs)
    }

    fn create_on(medium: Medium, options: Options) -> Result<Self> {
        let block_size = options.block_size_kind()?;
        let main = MainStore::create(medium, block_size)?;
        let start = main.header().property_start;

        Ok(Filesystem {
            main,
            mini: MiniState::new(),
            properties: PropertyTable::new(start),
            options,
        })
    }

    /// Open an existing file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, Options::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let fs = Self::load(Medium::open(&path, false)?, options)?;
        info!("Opened compound file {}", path.as_ref().display());
        Ok(fs)
    }

    /// Open an existing file; any flush fails with [`CfbError::ReadOnly`]
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let fs = Self::load(Medium::open(&path, true)?, Options::default())?;
        info!("Opened compound file {} (read-only)", path.as_ref().display());
        Ok(fs)
    }

    /// Open a container held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with(bytes, Options::default())
    }

    pub fn from_bytes_with(bytes: Vec<u8>, options: Options) -> Result<Self> {
        Self::load(Medium::Memory(bytes), options)
    }

    /// Read a whole container from `reader` and open it in memory
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(bytes)
    }

    fn load(medium: Medium, options: Options) -> Result<Self> {
        let mut main = MainStore::open(medium)?;

        // Every structural chain shares one detector: no block may belong to two of them
        let mut detector = main.opening_detector();
        main.load_tables(&mut detector)?;

        let property_start = main.header().property_start;
        let properties = PropertyTable::load(&main, property_start, &mut detector)?;

        let root = properties.property(ROOT_ID)?;
        let mini_start = if root.size == 0 {
            END_OF_CHAIN
        } else {
            root.start_block
        };
        let mini = MiniState::load(&main, mini_start, &mut detector)?;

        let fs = Filesystem {
            main,
            mini,
            properties,
            options,
        };

        if fs.options.verify_chains_on_open {
            fs.verify()?;
        }

        debug!(
            "Loaded compound file: {} byte blocks, {} entries",
            fs.main.block_size(),
            fs.properties.len()
        );
        Ok(fs)
    }

    /// Root storage
    pub fn root(&mut self) -> Directory<'_> {
        Directory::new(self, ROOT_ID)
    }

    /// Storage at a `/`-separated path
    pub fn directory(&mut self, path: &str) -> Result<Directory<'_>> {
        let id = self.resolve(path)?;
        if !self.properties.property(id)?.is_container() {
            return Err(CfbError::NotADirectory(path.to_string()));
        }
        Ok(Directory::new(self, id))
    }

    /// Reader for the document at a `/`-separated path
    pub fn open_path(&self, path: &str) -> Result<DocumentReader<'_>> {
        let id = self.resolve(path)?;
        DocumentReader::open(self, id)
    }

    /// Reader for a document by id
    pub fn open_document(&self, id: PropertyId) -> Result<DocumentReader<'_>> {
        DocumentReader::open(self, id)
    }

    /// Find the entry at a `/`-separated path
    pub fn resolve(&self, path: &str) -> Result<PropertyId> {
        let mut current = ROOT_ID;
        for name in split_path(path)? {
            if !self.properties.property(current)?.is_container() {
                return Err(CfbError::NotADirectory(path.to_string()));
            }
            current = self
                .properties
                .find_child(current, name.as_str())?
                .ok_or_else(|| CfbError::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn block_size(&self) -> BlockSize {
        self.main.block_size_kind()
    }

    pub fn is_read_only(&self) -> bool {
        self.main.is_read_only()
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    pub(crate) fn properties_mut(&mut self) -> &mut PropertyTable {
        &mut self.properties
    }

    pub fn main(&self) -> &MainStore {
        &self.main
    }

    pub fn mini_view(&self) -> MiniView<'_> {
        MiniView::new(&self.main, &self.mini)
    }

    /// Replace a document's contents, choosing the store from the new size
    ///
    /// When the size class changes the old chain is freed in its own store
    /// and the data is written fresh into the other one.
    pub(crate) fn store_document(&mut self, id: PropertyId, data: &[u8]) -> Result<()> {
        let prop = self.properties.property(id)?;
        if !prop.is_document() {
            return Err(CfbError::NotADocument(prop.name.clone()));
        }

        let was_mini = prop.size < MINI_STREAM_CUTOFF as u64;
        let to_mini = data.len() < MINI_STREAM_CUTOFF;
        let mut start = prop.start_block;

        if start != END_OF_CHAIN && was_mini != to_mini {
            self.free_chain(start, was_mini)?;
            start = END_OF_CHAIN;
        }

        let new_start = if to_mini {
            let mut mini = MiniStore::new(&mut self.main, &mut self.mini);
            ChainStream::new(&mut mini, start).overwrite_padded(data, DOCUMENT_FILL)?
        } else {
            ChainStream::new(&mut self.main, start).overwrite_padded(data, DOCUMENT_FILL)?
        };

        let prop = self.properties.property_mut(id)?;
        prop.start_block = new_start;
        prop.size = data.len() as u64;

        debug!(
            "Stored {} bytes in '{}' ({} store)",
            data.len(),
            prop.name,
            if to_mini { "mini" } else { "main" }
        );
        Ok(())
    }

    /// Release a document's blocks and mark it empty
    pub(crate) fn free_document(&mut self, id: PropertyId) -> Result<()> {
        let prop = self.properties.property(id)?;
        if !prop.is_document() {
            return Err(CfbError::NotADocument(prop.name.clone()));
        }

        let (start, mini) = (prop.start_block, prop.size < MINI_STREAM_CUTOFF as u64);
        if start != END_OF_CHAIN {
            self.free_chain(start, mini)?;
        }

        let prop = self.properties.property_mut(id)?;
        prop.start_block = END_OF_CHAIN;
        prop.size = 0;
        Ok(())
    }

    fn free_chain(&mut self, start: u32, mini: bool) -> Result<()> {
        if mini {
            let mut store = MiniStore::new(&mut self.main, &mut self.mini);
            ChainStream::new(&mut store, start).free()
        } else {
            ChainStream::new(&mut self.main, start).free()
        }
    }

    /// Write all pending state back to the medium
    ///
    /// Order: SBAT blocks (and the root's mini stream description), the
    /// property table, then the header with every BAT and XBAT block.
    pub fn flush(&mut self) -> Result<()> {
        if self.main.is_read_only() {
            return Err(CfbError::ReadOnly);
        }

        let (mini_start, mini_size) = self.mini.sync(&mut self.main)?;
        {
            let root = self.properties.property_mut(ROOT_ID)?;
            root.start_block = mini_start;
            root.size = mini_size;
        }

        let block_size = self.main.block_size_kind();
        let bytes = self.properties.serialize(block_size);
        let start =
            ChainStream::new(&mut self.main, self.properties.start_block()).overwrite(&bytes)?;
        self.properties.set_start_block(start);

        let directory_count = match block_size {
            BlockSize::Small => 0,
            BlockSize::Large => chain_indices(&self.main, start)?.len() as u32,
        };
        let header = self.main.header_mut();
        header.property_start = start;
        header.directory_count = directory_count;

        self.main.sync()?;

        debug!(
            "Flushed compound file: {} entries, mini stream {} bytes",
            self.properties.len(),
            mini_size
        );
        Ok(())
    }

    /// Flush (unless read-only) and release the medium
    pub fn close(mut self) -> Result<()> {
        if !self.main.is_read_only() {
            self.flush()?;
        }
        info!("Closed compound file");
        Ok(())
    }

    /// Flush (unless read-only) and return the container's bytes
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        if !self.main.is_read_only() {
            self.flush()?;
        }
        self.main.into_medium().into_bytes()
    }

    pub fn into_shared(self) -> SharedFilesystem {
        Arc::new(Mutex::new(self))
    }

    pub fn stats(&self) -> FilesystemStats {
        let view = self.mini_view();
        FilesystemStats {
            block_size: self.main.block_size(),
            main_blocks: self.main.medium_block_count(),
            free_main_blocks: self.main.free_block_count(),
            bat_blocks: self.main.bat_count(),
            xbat_blocks: self.main.xbat_count(),
            mini_blocks: view.medium_block_count(),
            free_mini_blocks: view.free_block_count(),
            properties: self.properties.len(),
            documents: self
                .properties
                .iter()
                .filter(|(_, p)| p.kind == PropertyKind::Document)
                .count(),
        }
    }

    /// Walk every chain and check that no block belongs to two of them
    ///
    /// Covers the BAT/XBAT blocks themselves, the SBAT chain, the property
    /// table, the mini stream and each document (in the store its size
    /// selects).
    pub fn verify(&self) -> Result<()> {
        let mut owners = self.main.new_loop_detector();

        for location in self.main.table_locations().collect::<Vec<_>>() {
            let marker = self.main.next_of(location)?;
            let expected = if self.main.tables().iter().any(|t| t.location() == location) {
                FAT_SECTOR_BLOCK
            } else {
                DIFAT_SECTOR_BLOCK
            };
            if marker != expected {
                return Err(CfbError::CorruptChain {
                    block: location,
                    next: marker,
                });
            }
            claim_exclusive(&mut owners, location)?;
        }

        let sbat_start = self.mini.sbat_locations().next().unwrap_or(END_OF_CHAIN);
        let structural = [
            sbat_start,
            self.properties.start_block(),
            self.mini.stream_start(),
        ];
        for start in structural {
            for block in chain_indices(&self.main, start)? {
                claim_exclusive(&mut owners, block)?;
            }
        }

        let view = self.mini_view();
        let mut mini_owners = view.new_loop_detector();

        for (_, prop) in self.properties.iter() {
            if !prop.is_document() || prop.start_block == END_OF_CHAIN {
                continue;
            }

            let mini = prop.size < MINI_STREAM_CUTOFF as u64;
            let (blocks, block_size, detector) = if mini {
                (chain_indices(&view, prop.start_block)?, view.block_size(), &mut mini_owners)
            } else {
                (
                    chain_indices(&self.main, prop.start_block)?,
                    self.main.block_size(),
                    &mut owners,
                )
            };

            let expected = (prop.size as usize).div_ceil(block_size);
            if blocks.len() < expected {
                return Err(CfbError::ShortChain {
                    name: prop.name.clone(),
                    expected,
                    actual: blocks.len(),
                });
            }

            for block in blocks {
                claim_exclusive(detector, block)?;
            }
        }

        Ok(())
    }
}

fn claim_exclusive(detector: &mut ChainLoopDetector, block: u32) -> Result<()> {
    detector.claim(block).map_err(|e| match e {
        CfbError::ChainLoop { block } => CfbError::CrossLinkedBlock { block },
        other => other,
    })
}
