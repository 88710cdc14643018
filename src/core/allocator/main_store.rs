//! Main block store
//!
//! Blocks of the header's block size, addressed through the BAT. The BAT grows
//! one table block at a time; past 109 table blocks their indices spill into
//! the XBAT chain.

use crate::allocator::{
    is_reserved, AllocationTable, BlockRead, BlockStore, ChainLoopDetector, DIFAT_SECTOR_BLOCK,
    END_OF_CHAIN, FAT_SECTOR_BLOCK, UNUSED_BLOCK,
};
use crate::error::{CfbError, Result};
use crate::header::{BlockSize, Header, HEADER_BAT_SLOTS, HEADER_SIZE};
use crate::io::Medium;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub struct MainStore {
    /// Backing medium (locked so shared readers can seek)
    medium: Mutex<Medium>,

    header: Header,

    bat_blocks: Vec<AllocationTable>,

    xbat_blocks: Vec<AllocationTable>,
}

impl MainStore {
    /// Lay out an empty container: block 0 for the property table, block 1
    /// for the first BAT block
    pub fn create(medium: Medium, block_size: BlockSize) -> Result<Self> {
        let mut header = Header::new(block_size);
        header.property_start = 0;
        header.bat_count = 1;
        header.bat_array = vec![1];

        let mut bat = AllocationTable::empty(block_size.bat_entries_per_block(), false, 1);
        bat.set_value(0, END_OF_CHAIN);
        bat.set_value(1, FAT_SECTOR_BLOCK);

        let mut store = MainStore {
            medium: Mutex::new(medium),
            header,
            bat_blocks: vec![bat],
            xbat_blocks: Vec::new(),
        };
        store.ensure_block(1)?;

        debug!("Created main store with {} byte blocks", block_size.bytes());
        Ok(store)
    }

    /// Read and validate the header of an existing container
    ///
    /// Allocation tables are not loaded yet; see [`MainStore::load_tables`].
    pub fn open(mut medium: Medium) -> Result<Self> {
        let mut buffer = vec![0u8; HEADER_SIZE];
        let read = medium.read_at(0, &mut buffer)?;
        let header = Header::from_bytes(&buffer[..read])?;

        let store = MainStore {
            medium: Mutex::new(medium),
            header,
            bat_blocks: Vec::new(),
            xbat_blocks: Vec::new(),
        };

        let blocks = store.medium_block_count();
        if store.header.bat_count as usize > blocks || store.header.xbat_count as usize > blocks {
            return Err(CfbError::InvalidHeader(format!(
                "{} BAT and {} XBAT blocks declared in a container of {} blocks",
                store.header.bat_count, store.header.xbat_count, blocks
            )));
        }

        Ok(store)
    }

    /// Detector sized for the whole container as the header describes it
    pub fn opening_detector(&self) -> ChainLoopDetector {
        let declared = self.header.bat_count as usize * self.entries_per_table();
        ChainLoopDetector::new(self.medium_block_count().max(declared))
    }

    /// Load the BAT blocks named by the header and the XBAT chain
    ///
    /// Every table block is claimed in `detector`, which the caller shares with
    /// the other structural chains.
    pub fn load_tables(&mut self, detector: &mut ChainLoopDetector) -> Result<()> {
        let bat_count = self.header.bat_count as usize;

        for index in self.header.bat_array.clone() {
            detector.claim(index)?;
            let bytes = self.read_block(index)?;
            self.bat_blocks.push(AllocationTable::from_bytes(&bytes, index));
        }

        let per_xbat = self.header.block_size.xbat_entries_per_block();
        let mut next = self.header.xbat_start;

        for _ in 0..self.header.xbat_count {
            if is_reserved(next) {
                break;
            }
            detector.claim(next)?;
            let xbat = AllocationTable::from_bytes(&self.read_block(next)?, next);

            for slot in 0..per_xbat {
                let index = xbat.value(slot);
                if is_reserved(index) || self.bat_blocks.len() >= bat_count {
                    break;
                }
                detector.claim(index)?;
                let bytes = self.read_block(index)?;
                self.bat_blocks.push(AllocationTable::from_bytes(&bytes, index));
            }

            next = xbat.next_xbat();
            self.xbat_blocks.push(xbat);
        }

        if self.bat_blocks.len() != bat_count {
            warn!(
                "Header declares {} BAT blocks but {} were reachable",
                bat_count,
                self.bat_blocks.len()
            );
        }

        debug!(
            "Loaded {} BAT and {} XBAT blocks",
            self.bat_blocks.len(),
            self.xbat_blocks.len()
        );
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn block_size_kind(&self) -> BlockSize {
        self.header.block_size
    }

    pub fn bat_count(&self) -> usize {
        self.bat_blocks.len()
    }

    pub fn xbat_count(&self) -> usize {
        self.xbat_blocks.len()
    }

    /// Locations of every BAT and XBAT block
    pub fn table_locations(&self) -> impl Iterator<Item = u32> + '_ {
        self.bat_blocks
            .iter()
            .chain(self.xbat_blocks.iter())
            .map(|t| t.location())
    }

    pub fn is_read_only(&self) -> bool {
        self.medium.lock().is_read_only()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.medium.lock().path().map(|p| p.to_path_buf())
    }

    pub fn medium_len(&self) -> u64 {
        self.medium.lock().len()
    }

    fn block_offset(&self, index: u32) -> u64 {
        (u64::from(index) + 1) * self.block_size() as u64
    }

    /// Write `data` into block `index` starting `offset` bytes in
    pub fn write_block_at(&mut self, index: u32, offset: usize, data: &[u8]) -> Result<()> {
        let block_size = self.block_size();
        if offset + data.len() > block_size {
            return Err(CfbError::CapacityExceeded {
                limit: block_size as u64,
                attempted: (offset + data.len()) as u64,
            });
        }

        self.ensure_block(index)?;
        let at = self.block_offset(index) + offset as u64;
        self.medium.lock().write_at(at, data)
    }

    /// Write the header, then every BAT and XBAT block at its own index
    pub fn sync(&mut self) -> Result<()> {
        self.header.bat_count = self.bat_blocks.len() as u32;
        self.header.bat_array = self
            .bat_blocks
            .iter()
            .take(HEADER_BAT_SLOTS)
            .map(|t| t.location())
            .collect();
        self.header.xbat_count = self.xbat_blocks.len() as u32;
        self.header.xbat_start = self
            .xbat_blocks
            .first()
            .map_or(END_OF_CHAIN, |t| t.location());

        let mut medium = self.medium.lock();
        medium.write_at(0, &self.header.to_bytes())?;

        for table in self.bat_blocks.iter().chain(self.xbat_blocks.iter()) {
            let at = (u64::from(table.location()) + 1) * self.header.block_size.bytes() as u64;
            medium.write_at(at, &table.to_bytes())?;
        }

        medium.sync()
    }

    /// Give back the medium (call [`MainStore::sync`] first)
    pub fn into_medium(self) -> Medium {
        self.medium.into_inner()
    }

    /// Record a newly created BAT block in the header list or an XBAT
    ///
    /// Returns the number of extra blocks consumed (1 if an XBAT was created).
    fn register_bat(&mut self, bat_location: u32) -> Result<u32> {
        if self.bat_blocks.len() <= HEADER_BAT_SLOTS {
            self.header.bat_array.push(bat_location);
            return Ok(0);
        }

        let per_xbat = self.header.block_size.xbat_entries_per_block();
        if let Some(xbat) = self.xbat_blocks.iter_mut().find(|x| x.has_free_slots()) {
            if let Some(slot) = xbat.first_free_slot().filter(|&s| s < per_xbat) {
                xbat.set_value(slot, bat_location);
                return Ok(0);
            }
        }

        // Need a new XBAT too; it takes the slot after the new BAT block
        let xbat_location = bat_location + 1;
        let mut xbat = AllocationTable::empty(self.entries_per_table(), true, xbat_location);
        xbat.set_value(0, bat_location);

        if let Some(bat) = self.bat_blocks.last_mut() {
            bat.set_value(1, DIFAT_SECTOR_BLOCK);
        }

        match self.xbat_blocks.last_mut() {
            Some(previous) => previous.set_next_xbat(xbat_location),
            None => self.header.xbat_start = xbat_location,
        }
        self.xbat_blocks.push(xbat);
        self.header.xbat_count = self.xbat_blocks.len() as u32;
        self.ensure_block(xbat_location)?;

        info!(
            "Extended allocation table: XBAT block {} added ({} total)",
            xbat_location,
            self.xbat_blocks.len()
        );
        Ok(1)
    }
}

impl BlockRead for MainStore {
    fn block_size(&self) -> usize {
        self.header.block_size.bytes()
    }

    fn read_block(&self, index: u32) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; self.block_size()];
        let read = self
            .medium
            .lock()
            .read_at(self.block_offset(index), &mut buffer)?;

        // A truncated final block reads as zero padded
        if read == 0 {
            return Err(CfbError::InvalidBlockIndex(index));
        }
        Ok(buffer)
    }

    fn tables(&self) -> &[AllocationTable] {
        &self.bat_blocks
    }

    fn entries_per_table(&self) -> usize {
        self.header.block_size.bat_entries_per_block()
    }

    fn medium_block_count(&self) -> usize {
        let block_size = self.block_size() as u64;
        let len = self.medium.lock().len();
        (len.saturating_sub(block_size) + block_size - 1) as usize / block_size as usize
    }
}

impl BlockStore for MainStore {
    fn ensure_block(&mut self, index: u32) -> Result<()> {
        let end = self.block_offset(index) + self.block_size() as u64;
        self.medium.lock().extend_to(end)
    }

    fn write_block(&mut self, index: u32, data: &[u8]) -> Result<()> {
        self.write_block_at(index, 0, data)
    }

    fn tables_mut(&mut self) -> &mut [AllocationTable] {
        &mut self.bat_blocks
    }

    fn allocate_free_block(&mut self) -> Result<u32> {
        let per_table = self.entries_per_table();

        let mut offset = 0usize;
        for bat in &self.bat_blocks {
            if let Some(slot) = bat.first_free_slot() {
                return Ok((offset + slot) as u32);
            }
            offset += per_table;
        }

        if offset as u64 + per_table as u64 > u64::from(crate::allocator::MAX_REGULAR_BLOCK) {
            return Err(CfbError::CapacityExceeded {
                limit: u64::from(crate::allocator::MAX_REGULAR_BLOCK),
                attempted: offset as u64 + per_table as u64,
            });
        }

        // Every table is full: the new BAT block describes itself in its first slot
        let bat_location = offset as u32;
        let mut bat = AllocationTable::empty(per_table, false, bat_location);
        bat.set_value(0, FAT_SECTOR_BLOCK);
        self.bat_blocks.push(bat);
        self.ensure_block(bat_location)?;

        let consumed = self.register_bat(bat_location)?;
        self.header.bat_count = self.bat_blocks.len() as u32;

        info!(
            "Growing allocation table: BAT block {} added ({} total)",
            bat_location,
            self.bat_blocks.len()
        );

        let first_free = bat_location + 1 + consumed;
        debug_assert_eq!(self.next_of(first_free).ok(), Some(UNUSED_BLOCK));
        Ok(first_free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim_all(store: &mut MainStore, count: usize) -> Vec<u32> {
        (0..count)
            .map(|_| {
                let block = store.allocate_free_block().unwrap();
                store.set_next_of(block, END_OF_CHAIN).unwrap();
                block
            })
            .collect()
    }

    #[test]
    fn test_create_layout() {
        let store = MainStore::create(Medium::memory(), BlockSize::Small).unwrap();
        assert_eq!(store.next_of(0).unwrap(), END_OF_CHAIN);
        assert_eq!(store.next_of(1).unwrap(), FAT_SECTOR_BLOCK);
        assert_eq!(store.next_of(2).unwrap(), UNUSED_BLOCK);
        assert_eq!(store.medium_block_count(), 2);
        assert_eq!(store.free_block_count(), 126);
    }

    #[test]
    fn test_allocate_does_not_claim() {
        let mut store = MainStore::create(Medium::memory(), BlockSize::Small).unwrap();
        assert_eq!(store.allocate_free_block().unwrap(), 2);
        assert_eq!(store.allocate_free_block().unwrap(), 2);
        store.set_next_of(2, END_OF_CHAIN).unwrap();
        assert_eq!(store.allocate_free_block().unwrap(), 3);
    }

    #[test]
    fn test_bat_growth() {
        let mut store = MainStore::create(Medium::memory(), BlockSize::Small).unwrap();
        let blocks = claim_all(&mut store, 126);
        assert_eq!(*blocks.last().unwrap(), 127);
        assert_eq!(store.bat_count(), 1);

        // Second BAT block lands at 128 and describes itself
        let next = store.allocate_free_block().unwrap();
        assert_eq!(next, 129);
        assert_eq!(store.bat_count(), 2);
        assert_eq!(store.next_of(128).unwrap(), FAT_SECTOR_BLOCK);
        assert_eq!(store.header().bat_array, vec![1, 128]);
    }

    #[test]
    fn test_xbat_growth_past_header_slots() {
        let mut store = MainStore::create(Medium::memory(), BlockSize::Small).unwrap();

        while store.bat_count() <= HEADER_BAT_SLOTS {
            claim_all(&mut store, 1);
        }

        assert_eq!(store.bat_count(), HEADER_BAT_SLOTS + 1);
        assert_eq!(store.xbat_count(), 1);

        let bat_location = store.bat_blocks.last().unwrap().location();
        let xbat_location = store.xbat_blocks[0].location();
        assert_eq!(xbat_location, bat_location + 1);
        assert_eq!(store.next_of(bat_location).unwrap(), FAT_SECTOR_BLOCK);
        assert_eq!(store.next_of(xbat_location).unwrap(), DIFAT_SECTOR_BLOCK);
        assert_eq!(store.xbat_blocks[0].value(0), bat_location);
        assert_eq!(store.header().xbat_start, xbat_location);
    }

    #[test]
    fn test_sync_and_reload_tables() {
        let mut store = MainStore::create(Medium::memory(), BlockSize::Small).unwrap();
        while store.bat_count() <= HEADER_BAT_SLOTS + 1 {
            claim_all(&mut store, 1);
        }
        store.sync().unwrap();

        let expected: Vec<u32> = store.table_locations().collect();
        let free = store.free_block_count();
        let medium = store.into_medium();

        let mut reopened = MainStore::open(medium).unwrap();
        let mut detector = reopened.opening_detector();
        reopened.load_tables(&mut detector).unwrap();

        assert_eq!(reopened.table_locations().collect::<Vec<_>>(), expected);
        assert_eq!(reopened.free_block_count(), free);
    }

    #[test]
    fn test_large_blocks() {
        let mut store = MainStore::create(Medium::memory(), BlockSize::Large).unwrap();
        assert_eq!(store.block_size(), 4096);
        assert_eq!(store.free_block_count(), 1022);

        let block = store.allocate_free_block().unwrap();
        store.set_next_of(block, END_OF_CHAIN).unwrap();
        store.write_block(block, &[0xAB; 4096]).unwrap();
        assert_eq!(store.read_block(block).unwrap(), vec![0xAB; 4096]);
    }

    #[test]
    fn test_read_past_end_fails() {
        let store = MainStore::create(Medium::memory(), BlockSize::Small).unwrap();
        assert!(matches!(
            store.read_block(40),
            Err(CfbError::InvalidBlockIndex(40))
        ));
    }
}
