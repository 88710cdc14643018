//! Block stores for compound files
//!
//! Two stores share one contract:
//! - The main store addresses `block_size` blocks of the medium through the
//!   BAT (grown via the XBAT once the header's 109 direct slots are used)
//! - The mini store addresses 64-byte blocks carved out of the root entry's
//!   chain, tracked by the SBAT
//!
//! Chains are singly linked through the allocation tables: the entry for
//! block `n` holds the index of the block that follows it.

pub mod loop_detector;
pub mod main_store;
pub mod mini_store;
pub mod table;

pub use loop_detector::ChainLoopDetector;
pub use main_store::MainStore;
pub use mini_store::{MiniState, MiniStore, MiniView};
pub use table::AllocationTable;

use crate::error::{CfbError, Result};

/// Free slot marker
pub const UNUSED_BLOCK: u32 = 0xFFFF_FFFF;

/// Terminates a chain
pub const END_OF_CHAIN: u32 = 0xFFFF_FFFE;

/// Marks a block holding part of the BAT
pub const FAT_SECTOR_BLOCK: u32 = 0xFFFF_FFFD;

/// Marks a block holding part of the XBAT
pub const DIFAT_SECTOR_BLOCK: u32 = 0xFFFF_FFFC;

/// Largest value that can name a real block
pub const MAX_REGULAR_BLOCK: u32 = 0xFFFF_FFFA;

/// True for sentinel values that never name a block
pub fn is_reserved(value: u32) -> bool {
    value > MAX_REGULAR_BLOCK
}

/// Position of a block's entry inside a store's allocation tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    /// Index into the store's table list
    pub table: usize,

    /// Slot within that table
    pub slot: usize,
}

/// Read side of a block store
///
/// Everything needed to walk a chain without mutating the container.
pub trait BlockRead {
    /// Size in bytes of one block of this store
    fn block_size(&self) -> usize;

    /// Read the full contents of a block
    fn read_block(&self, index: u32) -> Result<Vec<u8>>;

    /// Allocation tables of this store, in index order
    fn tables(&self) -> &[AllocationTable];

    /// Entries addressed by one allocation table
    fn entries_per_table(&self) -> usize;

    /// Blocks currently backed by storage
    fn medium_block_count(&self) -> usize;

    /// Locate the table entry describing `index`
    fn allocation_entry_for(&self, index: u32) -> Result<BlockLocation> {
        let per_table = self.entries_per_table();
        let table = index as usize / per_table;

        if is_reserved(index) || table >= self.tables().len() {
            return Err(CfbError::InvalidBlockIndex(index));
        }

        Ok(BlockLocation {
            table,
            slot: index as usize % per_table,
        })
    }

    /// Raw table value for `index`
    fn next_of(&self, index: u32) -> Result<u32> {
        let loc = self.allocation_entry_for(index)?;
        Ok(self.tables()[loc.table].value(loc.slot))
    }

    /// Next block of a chain, rejecting anything that cannot follow a chain member
    fn successor(&self, index: u32) -> Result<u32> {
        let next = self.next_of(index)?;
        if next != END_OF_CHAIN && is_reserved(next) {
            return Err(CfbError::CorruptChain { block: index, next });
        }
        Ok(next)
    }

    /// Number of blocks the allocation tables can describe
    fn table_capacity(&self) -> usize {
        self.tables().len() * self.entries_per_table()
    }

    /// Unused slots across all tables
    fn free_block_count(&self) -> usize {
        self.tables().iter().map(|t| t.free_slot_count()).sum()
    }

    /// Fresh detector sized for any block this store can name
    fn new_loop_detector(&self) -> ChainLoopDetector {
        ChainLoopDetector::new(self.medium_block_count().max(self.table_capacity()))
    }
}

/// Mutating side of a block store
pub trait BlockStore: BlockRead {
    /// Make sure storage for `index` exists, extending the backing as needed
    fn ensure_block(&mut self, index: u32) -> Result<()>;

    /// Write up to one block of data at the start of `index`
    fn write_block(&mut self, index: u32, data: &[u8]) -> Result<()>;

    fn tables_mut(&mut self) -> &mut [AllocationTable];

    /// Point the entry for `index` at `next`
    fn set_next_of(&mut self, index: u32, next: u32) -> Result<()> {
        let loc = self.allocation_entry_for(index)?;
        self.tables_mut()[loc.table].set_value(loc.slot, next);
        Ok(())
    }

    /// Find (or make room for) a free block
    ///
    /// The returned block's entry is still `UNUSED_BLOCK`; the caller claims
    /// it with [`BlockStore::set_next_of`].
    fn allocate_free_block(&mut self) -> Result<u32>;
}

/// Collect the block indices of the chain starting at `start`
pub fn chain_indices<S: BlockRead + ?Sized>(store: &S, start: u32) -> Result<Vec<u32>> {
    let mut detector = store.new_loop_detector();
    let mut indices = Vec::new();
    let mut current = start;

    while current != END_OF_CHAIN {
        if is_reserved(current) {
            return Err(CfbError::InvalidBlockIndex(current));
        }
        detector.claim(current)?;
        indices.push(current);
        current = store.successor(current)?;
    }

    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_values() {
        assert!(is_reserved(UNUSED_BLOCK));
        assert!(is_reserved(END_OF_CHAIN));
        assert!(is_reserved(FAT_SECTOR_BLOCK));
        assert!(is_reserved(DIFAT_SECTOR_BLOCK));
        assert!(!is_reserved(MAX_REGULAR_BLOCK));
        assert!(!is_reserved(0));
    }
}
