//! Mini block store
//!
//! Small documents are packed into 64-byte mini blocks. The mini blocks live
//! inside an ordinary main-store chain (the mini stream, owned by the root
//! entry) and are tracked by their own allocation table, the SBAT, which is
//! itself a main-store chain.

use crate::allocator::{
    AllocationTable, BlockRead, BlockStore, ChainLoopDetector, MainStore, END_OF_CHAIN,
    UNUSED_BLOCK,
};
use crate::error::{CfbError, Result};
use crate::header::MINI_BLOCK_SIZE;
use tracing::debug;

/// Persistent mini-store bookkeeping, owned by the filesystem
#[derive(Debug, Clone, Default)]
pub struct MiniState {
    /// SBAT blocks, in chain order
    sbat_blocks: Vec<AllocationTable>,

    /// Main blocks backing the mini stream, in chain order
    stream_blocks: Vec<u32>,
}

impl MiniState {
    /// State for a container without any mini blocks
    pub fn new() -> Self {
        MiniState::default()
    }

    /// Load the SBAT chain and the mini stream chain
    ///
    /// Both chains are claimed in the caller's shared detector.
    pub fn load(
        main: &MainStore,
        stream_start: u32,
        detector: &mut ChainLoopDetector,
    ) -> Result<Self> {
        let mut sbat_blocks = Vec::new();
        let mut current = match main.header().sbat_count {
            0 => END_OF_CHAIN,
            _ => main.header().sbat_start,
        };
        while current != END_OF_CHAIN {
            detector.claim(current)?;
            let bytes = main.read_block(current)?;
            sbat_blocks.push(AllocationTable::from_bytes(&bytes, current));
            current = main.successor(current)?;
        }

        let mut stream_blocks = Vec::new();
        let mut current = stream_start;
        while current != END_OF_CHAIN {
            detector.claim(current)?;
            stream_blocks.push(current);
            current = main.successor(current)?;
        }

        debug!(
            "Loaded mini store: {} SBAT blocks, {} stream blocks",
            sbat_blocks.len(),
            stream_blocks.len()
        );

        Ok(MiniState {
            sbat_blocks,
            stream_blocks,
        })
    }

    /// First main block of the mini stream
    pub fn stream_start(&self) -> u32 {
        self.stream_blocks.first().copied().unwrap_or(END_OF_CHAIN)
    }

    pub fn stream_blocks(&self) -> &[u32] {
        &self.stream_blocks
    }

    pub fn sbat_locations(&self) -> impl Iterator<Item = u32> + '_ {
        self.sbat_blocks.iter().map(|t| t.location())
    }

    /// Bytes of the mini stream up to the highest occupied mini block
    pub fn stream_size(&self, entries_per_table: usize) -> u64 {
        let occupied = self
            .sbat_blocks
            .iter()
            .enumerate()
            .rev()
            .find(|(_, t)| t.occupied_len() > 0)
            .map_or(0, |(i, t)| i * entries_per_table + t.occupied_len());
        (occupied * MINI_BLOCK_SIZE) as u64
    }

    /// Write SBAT blocks back and record the SBAT chain in the header
    ///
    /// Returns the mini stream's start block and byte size for the root entry.
    /// A mini stream with no occupied mini block is released to the main store,
    /// since a root of size zero describes no chain.
    pub fn sync(&mut self, main: &mut MainStore) -> Result<(u32, u64)> {
        let size = self.stream_size(main.entries_per_table());
        if size == 0 && !self.stream_blocks.is_empty() {
            for &block in &self.stream_blocks {
                main.set_next_of(block, UNUSED_BLOCK)?;
            }
            debug!("Released empty mini stream ({} blocks)", self.stream_blocks.len());
            self.stream_blocks.clear();
        }

        for table in &self.sbat_blocks {
            main.write_block(table.location(), &table.to_bytes())?;
        }

        let header = main.header_mut();
        header.sbat_start = self
            .sbat_blocks
            .first()
            .map_or(END_OF_CHAIN, |t| t.location());
        header.sbat_count = self.sbat_blocks.len() as u32;

        Ok((self.stream_start(), size))
    }
}

/// Map a mini block to its main block and byte offset within it
fn locate(main_block_size: usize, state: &MiniState, index: u32) -> Result<(u32, usize)> {
    let byte = index as usize * MINI_BLOCK_SIZE;
    let big = byte / main_block_size;

    state
        .stream_blocks
        .get(big)
        .map(|&block| (block, byte % main_block_size))
        .ok_or(CfbError::InvalidBlockIndex(index))
}

/// Read-only view of the mini store
pub struct MiniView<'a> {
    main: &'a MainStore,
    state: &'a MiniState,
}

impl<'a> MiniView<'a> {
    pub fn new(main: &'a MainStore, state: &'a MiniState) -> Self {
        MiniView { main, state }
    }
}

impl BlockRead for MiniView<'_> {
    fn block_size(&self) -> usize {
        MINI_BLOCK_SIZE
    }

    fn read_block(&self, index: u32) -> Result<Vec<u8>> {
        let (big, offset) = locate(self.main.block_size(), self.state, index)?;
        let bytes = self.main.read_block(big)?;
        Ok(bytes[offset..offset + MINI_BLOCK_SIZE].to_vec())
    }

    fn tables(&self) -> &[AllocationTable] {
        &self.state.sbat_blocks
    }

    fn entries_per_table(&self) -> usize {
        self.main.entries_per_table()
    }

    fn medium_block_count(&self) -> usize {
        self.state.stream_blocks.len() * (self.main.block_size() / MINI_BLOCK_SIZE)
    }
}

/// Mutable mini store, borrowing the main store for its own allocations
pub struct MiniStore<'a> {
    main: &'a mut MainStore,
    state: &'a mut MiniState,
}

impl<'a> MiniStore<'a> {
    pub fn new(main: &'a mut MainStore, state: &'a mut MiniState) -> Self {
        MiniStore { main, state }
    }

    /// Append one main block to the mini stream
    fn grow_stream(&mut self) -> Result<()> {
        let block = self.main.allocate_free_block()?;
        self.main.set_next_of(block, END_OF_CHAIN)?;
        self.main.ensure_block(block)?;

        if let Some(&tail) = self.state.stream_blocks.last() {
            self.main.set_next_of(tail, block)?;
        }
        self.state.stream_blocks.push(block);

        debug!(
            "Mini stream grew to {} blocks (added {})",
            self.state.stream_blocks.len(),
            block
        );
        Ok(())
    }
}

impl BlockRead for MiniStore<'_> {
    fn block_size(&self) -> usize {
        MINI_BLOCK_SIZE
    }

    fn read_block(&self, index: u32) -> Result<Vec<u8>> {
        MiniView::new(&*self.main, &*self.state).read_block(index)
    }

    fn tables(&self) -> &[AllocationTable] {
        &self.state.sbat_blocks
    }

    fn entries_per_table(&self) -> usize {
        self.main.entries_per_table()
    }

    fn medium_block_count(&self) -> usize {
        self.state.stream_blocks.len() * (self.main.block_size() / MINI_BLOCK_SIZE)
    }
}

impl BlockStore for MiniStore<'_> {
    fn ensure_block(&mut self, index: u32) -> Result<()> {
        let needed = (index as usize * MINI_BLOCK_SIZE) / self.main.block_size() + 1;
        while self.state.stream_blocks.len() < needed {
            self.grow_stream()?;
        }
        Ok(())
    }

    fn write_block(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let (big, offset) = locate(self.main.block_size(), self.state, index)?;
        let len = data.len().min(MINI_BLOCK_SIZE);
        self.main.write_block_at(big, offset, &data[..len])
    }

    fn tables_mut(&mut self) -> &mut [AllocationTable] {
        &mut self.state.sbat_blocks
    }

    fn allocate_free_block(&mut self) -> Result<u32> {
        let per_table = self.entries_per_table();

        let mut offset = 0usize;
        for sbat in &self.state.sbat_blocks {
            if let Some(slot) = sbat.first_free_slot() {
                return Ok((offset + slot) as u32);
            }
            offset += per_table;
        }

        // Append a new SBAT block to the SBAT chain
        let location = self.main.allocate_free_block()?;
        self.main.set_next_of(location, END_OF_CHAIN)?;
        self.main.ensure_block(location)?;

        match self.state.sbat_blocks.last() {
            Some(previous) => self.main.set_next_of(previous.location(), location)?,
            None => self.main.header_mut().sbat_start = location,
        }
        self.state
            .sbat_blocks
            .push(AllocationTable::empty(per_table, false, location));
        self.main.header_mut().sbat_count = self.state.sbat_blocks.len() as u32;

        debug!("Added SBAT block {} covering mini blocks from {}", location, offset);
        Ok(offset as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::BlockSize;
    use crate::io::Medium;

    fn fixture() -> (MainStore, MiniState) {
        (
            MainStore::create(Medium::memory(), BlockSize::Small).unwrap(),
            MiniState::new(),
        )
    }

    #[test]
    fn test_first_allocation_creates_sbat() {
        let (mut main, mut state) = fixture();
        let mut mini = MiniStore::new(&mut main, &mut state);

        assert_eq!(mini.allocate_free_block().unwrap(), 0);
        assert_eq!(mini.tables().len(), 1);
        assert_eq!(main.header().sbat_count, 1);
        assert_eq!(main.header().sbat_start, 2);
    }

    #[test]
    fn test_addressing_spans_main_blocks() {
        let (mut main, mut state) = fixture();
        {
            let mut mini = MiniStore::new(&mut main, &mut state);
            for i in 0..10u32 {
                let block = mini.allocate_free_block().unwrap();
                assert_eq!(block, i);
                mini.set_next_of(block, END_OF_CHAIN).unwrap();
                mini.ensure_block(block).unwrap();
                mini.write_block(block, &[i as u8; 64]).unwrap();
            }
        }

        // 10 mini blocks need two 512-byte blocks of mini stream
        assert_eq!(state.stream_blocks().len(), 2);

        let view = MiniView::new(&main, &state);
        assert_eq!(view.read_block(9).unwrap(), vec![9u8; 64]);
        assert_eq!(view.read_block(3).unwrap(), vec![3u8; 64]);
        assert!(view.read_block(16).is_err());
    }

    #[test]
    fn test_stream_size_tracks_high_water_mark() {
        let (mut main, mut state) = fixture();
        {
            let mut mini = MiniStore::new(&mut main, &mut state);
            for _ in 0..3 {
                let block = mini.allocate_free_block().unwrap();
                mini.set_next_of(block, END_OF_CHAIN).unwrap();
            }
            mini.set_next_of(1, crate::allocator::UNUSED_BLOCK).unwrap();
        }

        assert_eq!(state.stream_size(128), 3 * 64);
        let (_, size) = state.sync(&mut main).unwrap();
        assert_eq!(size, 192);
    }

    #[test]
    fn test_sync_releases_empty_stream() {
        let (mut main, mut state) = fixture();
        {
            let mut mini = MiniStore::new(&mut main, &mut state);
            let block = mini.allocate_free_block().unwrap();
            mini.set_next_of(block, END_OF_CHAIN).unwrap();
            mini.ensure_block(block).unwrap();
            mini.set_next_of(block, UNUSED_BLOCK).unwrap();
        }
        let stream_block = state.stream_blocks()[0];

        assert_eq!(state.sync(&mut main).unwrap(), (END_OF_CHAIN, 0));
        assert!(state.stream_blocks().is_empty());
        assert_eq!(main.next_of(stream_block).unwrap(), UNUSED_BLOCK);
    }

    #[test]
    fn test_mini_blocks_large_main() {
        let mut main = MainStore::create(Medium::memory(), BlockSize::Large).unwrap();
        let mut state = MiniState::new();
        let mut mini = MiniStore::new(&mut main, &mut state);

        let block = mini.allocate_free_block().unwrap();
        mini.ensure_block(block).unwrap();
        assert_eq!(mini.block_size(), 64);
        assert_eq!(mini.medium_block_count(), 64);
        assert_eq!(mini.entries_per_table(), 1024);
    }
}
